//! Environment-backed settings loader.
//!
//! # Design
//! - Parsing takes a lookup closure so tests never touch process environment.
//! - Every rejected value is reported with its section, field, and reason.

use std::path::PathBuf;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{LogFormatSetting, MAX_PARALLEL_LIMIT, PullSettings};
use crate::validate::{non_empty, parse_bool, parse_bounded_usize};

/// Workspace directory (required).
pub const ENV_WORKSPACE: &str = "SATCHEL_WORKSPACE";
/// Preference store path.
pub const ENV_PREFERENCES: &str = "SATCHEL_PREFERENCES";
/// Pull pool width.
pub const ENV_MAX_PARALLEL: &str = "SATCHEL_MAX_PARALLEL";
/// Resume remote pulls from the stored cursor.
pub const ENV_START_FROM_LAST: &str = "SATCHEL_START_FROM_LAST";
/// Consent to store passwords.
pub const ENV_STORE_PASSWORDS: &str = "SATCHEL_STORE_PASSWORDS";
/// Log level directive.
pub const ENV_LOG_LEVEL: &str = "SATCHEL_LOG_LEVEL";
/// Log format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "SATCHEL_LOG_FORMAT";

const SECTION: &str = "pull";

impl PullSettings {
    /// Load settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is missing or a value is invalid.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings from `lookup`, which maps variable names to values.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is missing or a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_workspace = lookup(ENV_WORKSPACE).ok_or_else(|| ConfigError::MissingField {
            section: SECTION.to_string(),
            field: ENV_WORKSPACE.to_string(),
        })?;
        let mut settings =
            Self::for_workspace(PathBuf::from(non_empty(&raw_workspace, SECTION, ENV_WORKSPACE)?));

        if let Some(raw) = lookup(ENV_PREFERENCES) {
            settings.preferences_path = PathBuf::from(non_empty(&raw, SECTION, ENV_PREFERENCES)?);
        }
        if let Some(raw) = lookup(ENV_MAX_PARALLEL) {
            settings.max_parallel =
                parse_bounded_usize(&raw, SECTION, ENV_MAX_PARALLEL, 1, MAX_PARALLEL_LIMIT)?;
        }
        if let Some(raw) = lookup(ENV_START_FROM_LAST) {
            settings.start_from_last = parse_bool(&raw, SECTION, ENV_START_FROM_LAST)?;
        }
        if let Some(raw) = lookup(ENV_STORE_PASSWORDS) {
            settings.store_passwords = parse_bool(&raw, SECTION, ENV_STORE_PASSWORDS)?;
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            settings.log_level = non_empty(&raw, SECTION, ENV_LOG_LEVEL)?.to_string();
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            settings.log_format = parse_log_format(&raw)?;
        }

        debug!(
            workspace = %settings.workspace.display(),
            max_parallel = settings.max_parallel,
            "pull settings loaded"
        );
        Ok(settings)
    }
}

fn parse_log_format(raw: &str) -> ConfigResult<LogFormatSetting> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Ok(LogFormatSetting::Json),
        "pretty" => Ok(LogFormatSetting::Pretty),
        "auto" | "" => Ok(LogFormatSetting::Auto),
        _ => Err(ConfigError::InvalidField {
            section: SECTION.to_string(),
            field: ENV_LOG_FORMAT.to_string(),
            value: Some(raw.to_string()),
            reason: "must be json or pretty",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DEFAULT_MAX_PARALLEL;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn workspace_is_required() {
        assert_eq!(
            PullSettings::from_lookup(lookup(&[])),
            Err(ConfigError::MissingField {
                section: "pull".to_string(),
                field: ENV_WORKSPACE.to_string(),
            })
        );
    }

    #[test]
    fn defaults_apply_when_only_workspace_is_set() -> ConfigResult<()> {
        let settings = PullSettings::from_lookup(lookup(&[(ENV_WORKSPACE, "/data/w")]))?;
        assert_eq!(settings, PullSettings::for_workspace("/data/w"));
        assert_eq!(settings.max_parallel, DEFAULT_MAX_PARALLEL);
        Ok(())
    }

    #[test]
    fn every_field_can_be_overridden() -> ConfigResult<()> {
        let settings = PullSettings::from_lookup(lookup(&[
            (ENV_WORKSPACE, "/data/w"),
            (ENV_PREFERENCES, "/etc/satchel/prefs.json"),
            (ENV_MAX_PARALLEL, "12"),
            (ENV_START_FROM_LAST, "true"),
            (ENV_STORE_PASSWORDS, "yes"),
            (ENV_LOG_LEVEL, "satchel_jobs=debug"),
            (ENV_LOG_FORMAT, "JSON"),
        ]))?;
        assert_eq!(settings.preferences_path, PathBuf::from("/etc/satchel/prefs.json"));
        assert_eq!(settings.max_parallel, 12);
        assert!(settings.start_from_last);
        assert!(settings.store_passwords);
        assert_eq!(settings.log_level, "satchel_jobs=debug");
        assert_eq!(settings.log_format, LogFormatSetting::Json);
        Ok(())
    }

    #[test]
    fn invalid_values_name_the_field() {
        let err = PullSettings::from_lookup(lookup(&[
            (ENV_WORKSPACE, "/data/w"),
            (ENV_MAX_PARALLEL, "500"),
        ]))
        .expect_err("too wide");
        assert!(matches!(
            err,
            ConfigError::InvalidField { ref field, reason: "out of range", .. } if field == ENV_MAX_PARALLEL
        ));

        let err = PullSettings::from_lookup(lookup(&[
            (ENV_WORKSPACE, "/data/w"),
            (ENV_LOG_FORMAT, "xml"),
        ]))
        .expect_err("unknown format");
        assert!(matches!(err, ConfigError::InvalidField { value: Some(ref v), .. } if v == "xml"));
    }
}
