//! Per-record transfer configuration and its preference-key encoding.
//!
//! Each option is persisted under `exportConf.<formId>.<option>`; a record has
//! a custom configuration iff at least one known option key exists.

use std::collections::BTreeMap;
use std::path::PathBuf;

use satchel_events::RecordId;
use serde::{Deserialize, Serialize};
use tracing::warn;

const CONF_KEY_ROOT: &str = "exportConf";
const DATE_TIME_KEY_ROOT: &str = "exportDateTime";

const OPTION_TARGET_DIR: &str = "target_dir";
const OPTION_INCLUDE_MEDIA: &str = "include_media";
const OPTION_START_FROM_LAST: &str = "start_from_last";
const OPTION_OVERWRITE_EXISTING: &str = "overwrite_existing";

const OPTIONS: [&str; 4] = [
    OPTION_TARGET_DIR,
    OPTION_INCLUDE_MEDIA,
    OPTION_START_FROM_LAST,
    OPTION_OVERWRITE_EXISTING,
];

/// Key prefix (including the trailing dot) for a record's configuration.
#[must_use]
pub fn custom_conf_prefix(record_id: &RecordId) -> String {
    format!("{CONF_KEY_ROOT}.{record_id}.")
}

/// Key holding a record's last successful transfer instant.
#[must_use]
pub fn transfer_date_time_key(record_id: &RecordId) -> String {
    format!("{DATE_TIME_KEY_ROOT}.{record_id}")
}

/// Options controlling how a record is pulled. Unset options fall back to the
/// registry default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfiguration {
    /// Directory the form and its submissions are written into.
    pub target_dir: Option<PathBuf>,
    /// Copy the form's media attachments.
    pub include_media: Option<bool>,
    /// Resume from the last pulled submission when the source supports it.
    pub start_from_last: Option<bool>,
    /// Replace submissions that already exist at the target.
    pub overwrite_existing: Option<bool>,
}

impl TransferConfiguration {
    /// Configuration with only the target directory set.
    #[must_use]
    pub fn with_target_dir(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: Some(target_dir.into()),
            ..Self::default()
        }
    }

    /// Whether no option is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.target_dir.is_none()
            && self.include_media.is_none()
            && self.start_from_last.is_none()
            && self.overwrite_existing.is_none()
    }

    /// Fill unset options from `default`.
    #[must_use]
    pub fn fallback_to(&self, default: &Self) -> Self {
        Self {
            target_dir: self
                .target_dir
                .clone()
                .or_else(|| default.target_dir.clone()),
            include_media: self.include_media.or(default.include_media),
            start_from_last: self.start_from_last.or(default.start_from_last),
            overwrite_existing: self.overwrite_existing.or(default.overwrite_existing),
        }
    }

    /// Media attachments are copied unless disabled.
    #[must_use]
    pub fn include_media_or_default(&self) -> bool {
        self.include_media.unwrap_or(true)
    }

    /// Pulls start from scratch unless enabled.
    #[must_use]
    pub fn start_from_last_or_default(&self) -> bool {
        self.start_from_last.unwrap_or(false)
    }

    /// Existing submissions are kept unless enabled.
    #[must_use]
    pub fn overwrite_existing_or_default(&self) -> bool {
        self.overwrite_existing.unwrap_or(false)
    }

    /// Encode the set options as preference entries under `prefix`.
    #[must_use]
    pub fn as_map(&self, prefix: &str) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        if let Some(dir) = &self.target_dir {
            entries.insert(
                format!("{prefix}{OPTION_TARGET_DIR}"),
                dir.to_string_lossy().into_owned(),
            );
        }
        let flags = [
            (OPTION_INCLUDE_MEDIA, self.include_media),
            (OPTION_START_FROM_LAST, self.start_from_last),
            (OPTION_OVERWRITE_EXISTING, self.overwrite_existing),
        ];
        for (option, value) in flags {
            if let Some(value) = value {
                entries.insert(format!("{prefix}{option}"), value.to_string());
            }
        }
        entries
    }

    /// Every key [`Self::as_map`] may produce under `prefix`.
    #[must_use]
    pub fn option_keys(prefix: &str) -> Vec<String> {
        OPTIONS
            .iter()
            .map(|option| format!("{prefix}{option}"))
            .collect()
    }

    /// Decode options stored under `prefix`. Returns `None` when no known
    /// option key is present.
    ///
    /// Unparseable flag values are logged and treated as unset.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut found = false;
        let mut read = |option: &str| {
            let value = lookup(&format!("{prefix}{option}"));
            found |= value.is_some();
            value
        };

        let target_dir = read(OPTION_TARGET_DIR).map(PathBuf::from);
        let include_media = read(OPTION_INCLUDE_MEDIA);
        let start_from_last = read(OPTION_START_FROM_LAST);
        let overwrite_existing = read(OPTION_OVERWRITE_EXISTING);
        if !found {
            return None;
        }

        Some(Self {
            target_dir,
            include_media: parse_flag(prefix, OPTION_INCLUDE_MEDIA, include_media),
            start_from_last: parse_flag(prefix, OPTION_START_FROM_LAST, start_from_last),
            overwrite_existing: parse_flag(prefix, OPTION_OVERWRITE_EXISTING, overwrite_existing),
        })
    }
}

fn parse_flag(prefix: &str, option: &str, value: Option<String>) -> Option<bool> {
    let value = value?;
    match value.as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => {
            warn!(key = %format!("{prefix}{option}"), %value, "ignoring unparseable configuration flag");
            None
        }
    }
}

/// Decides whether a configuration is complete enough to pull with.
pub trait ConfigurationPolicy: Send + Sync {
    /// Whether `configuration` can be used as-is.
    fn is_valid(&self, configuration: &TransferConfiguration) -> bool;
}

/// Default policy: a configuration is valid once it names a target directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireTargetDir;

impl ConfigurationPolicy for RequireTargetDir {
    fn is_valid(&self, configuration: &TransferConfiguration) -> bool {
        configuration.target_dir.is_some()
    }
}
