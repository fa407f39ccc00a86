//! Typed settings consumed by the application bootstrap.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default number of concurrently running pulls.
pub const DEFAULT_MAX_PARALLEL: usize = 4;
/// Upper bound accepted for the pull pool width.
pub const MAX_PARALLEL_LIMIT: usize = 64;
/// File name of the preference store inside the workspace.
pub const DEFAULT_PREFERENCES_FILE: &str = "preferences.json";

/// Requested log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormatSetting {
    /// Let the build profile decide.
    #[default]
    Auto,
    /// Structured JSON lines.
    Json,
    /// Human-readable output.
    Pretty,
}

/// Settings for a pull session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSettings {
    /// Directory forms are pulled into.
    pub workspace: PathBuf,
    /// JSON preference store location.
    pub preferences_path: PathBuf,
    /// Maximum number of concurrently running pulls.
    pub max_parallel: usize,
    /// Resume remote pulls after the last stored submission.
    pub start_from_last: bool,
    /// Consent to persist server passwords.
    pub store_passwords: bool,
    /// Log level directive.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormatSetting,
}

impl PullSettings {
    /// Settings rooted at `workspace` with every other field defaulted.
    #[must_use]
    pub fn for_workspace(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            preferences_path: workspace.join(DEFAULT_PREFERENCES_FILE),
            workspace,
            max_parallel: DEFAULT_MAX_PARALLEL,
            start_from_last: false,
            store_passwords: false,
            log_level: "info".to_string(),
            log_format: LogFormatSetting::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_live_under_the_workspace() {
        let settings = PullSettings::for_workspace("/data/satchel");
        assert_eq!(
            settings.preferences_path,
            PathBuf::from("/data/satchel/preferences.json")
        );
        assert_eq!(settings.max_parallel, DEFAULT_MAX_PARALLEL);
        assert!(!settings.store_passwords);
    }

    #[test]
    fn settings_serialize_with_snake_case_format() -> Result<(), serde_json::Error> {
        let mut settings = PullSettings::for_workspace("/w");
        settings.log_format = LogFormatSetting::Json;
        let value = serde_json::to_value(&settings)?;
        assert_eq!(value["log_format"], "json");
        Ok(())
    }
}
