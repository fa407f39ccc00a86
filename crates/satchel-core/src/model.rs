//! Records tracked by the transfer registry.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use satchel_events::RecordId;
use serde::{Deserialize, Serialize};

use crate::configuration::TransferConfiguration;

/// Descriptive attributes of a form as reported by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormDescriptor {
    /// Form identifier, unique within a source.
    pub id: RecordId,
    /// Human-readable title.
    pub display_name: String,
    /// Location of the form definition at the source.
    pub file_path: PathBuf,
    /// Whether submissions are encrypted.
    pub is_encrypted: bool,
}

impl FormDescriptor {
    /// Describe an unencrypted form.
    #[must_use]
    pub fn new(
        id: impl Into<RecordId>,
        display_name: impl Into<String>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            file_path: file_path.into(),
            is_encrypted: false,
        }
    }

    /// Mark the form as encrypted or not.
    #[must_use]
    pub const fn encrypted(mut self, is_encrypted: bool) -> Self {
        self.is_encrypted = is_encrypted;
        self
    }
}

/// One timestamped line of a record's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// When the status was observed.
    pub at: DateTime<Utc>,
    /// Status text.
    pub message: String,
}

impl Display for StatusEntry {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} {}",
            self.at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.message
        )
    }
}

/// One transferable form and the state the operator and the engine attach to it.
///
/// Records are owned by [`crate::TransferRegistry`]; callers receive clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    descriptor: FormDescriptor,
    selected: bool,
    configuration: Option<TransferConfiguration>,
    status_history: Vec<StatusEntry>,
    last_transfer: Option<DateTime<Utc>>,
}

impl TransferRecord {
    /// Fresh, unselected record without configuration or history.
    #[must_use]
    pub const fn new(descriptor: FormDescriptor) -> Self {
        Self {
            descriptor,
            selected: false,
            configuration: None,
            status_history: Vec::new(),
            last_transfer: None,
        }
    }

    /// Record identifier.
    #[must_use]
    pub const fn id(&self) -> &RecordId {
        &self.descriptor.id
    }

    /// Descriptive attributes.
    #[must_use]
    pub const fn descriptor(&self) -> &FormDescriptor {
        &self.descriptor
    }

    /// Human-readable title.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.descriptor.display_name
    }

    /// Location of the form definition at the source.
    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.descriptor.file_path
    }

    /// Whether submissions are encrypted.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.descriptor.is_encrypted
    }

    /// Whether the operator selected this record.
    #[must_use]
    pub const fn is_selected(&self) -> bool {
        self.selected
    }

    /// Custom configuration override, if any.
    #[must_use]
    pub const fn configuration(&self) -> Option<&TransferConfiguration> {
        self.configuration.as_ref()
    }

    /// Ordered status history.
    #[must_use]
    pub fn status_history(&self) -> &[StatusEntry] {
        &self.status_history
    }

    /// Status history rendered one entry per line.
    #[must_use]
    pub fn status_history_text(&self) -> String {
        self.status_history
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Instant of the last successful transfer.
    #[must_use]
    pub const fn last_transfer(&self) -> Option<DateTime<Utc>> {
        self.last_transfer
    }

    pub(crate) fn refresh_descriptor(&mut self, descriptor: FormDescriptor) {
        self.descriptor = descriptor;
    }

    pub(crate) const fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub(crate) fn set_configuration(&mut self, configuration: Option<TransferConfiguration>) {
        self.configuration = configuration;
    }

    pub(crate) fn push_status(&mut self, entry: StatusEntry) {
        self.status_history.push(entry);
    }

    /// Move the last transfer forward; returns `false` if `at` is older than the
    /// current value, which is left untouched.
    pub(crate) fn advance_last_transfer(&mut self, at: DateTime<Utc>) -> bool {
        match self.last_transfer {
            Some(current) if current > at => false,
            _ => {
                self.last_transfer = Some(at);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn last_transfer_never_moves_backwards() {
        let mut record = TransferRecord::new(FormDescriptor::new("f", "F", "forms/f.xml"));
        let later = Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        assert!(record.advance_last_transfer(later));
        assert!(!record.advance_last_transfer(earlier));
        assert_eq!(record.last_transfer(), Some(later));
    }

    #[test]
    fn status_history_text_renders_each_entry() {
        let mut record = TransferRecord::new(FormDescriptor::new("f", "F", "forms/f.xml"));
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        record.push_status(StatusEntry {
            at,
            message: "Pulled 1 of 2 submissions".into(),
        });
        record.push_status(StatusEntry {
            at,
            message: "Success".into(),
        });

        assert_eq!(
            record.status_history_text(),
            "2024-03-01T10:00:00Z Pulled 1 of 2 submissions\n2024-03-01T10:00:00Z Success"
        );
    }
}
