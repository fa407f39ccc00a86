use crate::error::{ConfigError, ConfigResult};

fn invalid(section: &str, field: &str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidField {
        section: section.to_string(),
        field: field.to_string(),
        value: Some(value.to_string()),
        reason,
    }
}

pub(crate) fn parse_bool(value: &str, section: &str, field: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(section, field, value, "must be a boolean")),
    }
}

pub(crate) fn parse_bounded_usize(
    value: &str,
    section: &str,
    field: &str,
    min: usize,
    max: usize,
) -> ConfigResult<usize> {
    let parsed = value
        .trim()
        .parse::<usize>()
        .map_err(|_| invalid(section, field, value, "must be a non-negative integer"))?;
    if !(min..=max).contains(&parsed) {
        return Err(invalid(section, field, value, "out of range"));
    }
    Ok(parsed)
}

pub(crate) fn non_empty<'a>(value: &'a str, section: &str, field: &str) -> ConfigResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(section, field, value, "must not be empty"));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booleans_accept_common_spellings() {
        assert_eq!(parse_bool("Yes", "pull", "flag"), Ok(true));
        assert_eq!(parse_bool("0", "pull", "flag"), Ok(false));
        assert!(parse_bool("maybe", "pull", "flag").is_err());
    }

    #[test]
    fn bounded_integers_reject_out_of_range() {
        assert_eq!(parse_bounded_usize("8", "pull", "n", 1, 64), Ok(8));
        assert!(matches!(
            parse_bounded_usize("0", "pull", "n", 1, 64),
            Err(ConfigError::InvalidField { reason: "out of range", .. })
        ));
        assert!(matches!(
            parse_bounded_usize("-3", "pull", "n", 1, 64),
            Err(ConfigError::InvalidField { reason: "must be a non-negative integer", .. })
        ));
    }

    #[test]
    fn blank_values_are_rejected() {
        assert!(non_empty("   ", "pull", "workspace").is_err());
        assert_eq!(non_empty(" /data ", "pull", "workspace"), Ok("/data"));
    }
}
