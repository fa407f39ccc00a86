//! Error types for registry, preference, source, and unit operations.

use std::error::Error;
use std::path::PathBuf;

use satchel_events::RecordId;
use thiserror::Error;

/// Errors raised by [`crate::TransferRegistry`] queries and mutators.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Positional access outside `[0, size)`.
    #[error("record index out of range")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Registry size at the time of the call.
        size: usize,
    },
    /// No record carries the requested id.
    #[error("record not found")]
    NotFound {
        /// Requested record id.
        record_id: RecordId,
    },
    /// The event does not address a record.
    #[error("event does not address a record")]
    NotAddressed {
        /// Event kind label.
        event_kind: &'static str,
    },
}

/// Convenience alias for registry results.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised by preference stores.
#[derive(Debug, Error)]
pub enum PreferenceError {
    /// Reading or writing the backing file failed.
    #[error("preference file operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// File involved in the failure.
        path: PathBuf,
        /// Source IO error.
        #[source]
        source: std::io::Error,
    },
    /// The backing file did not contain a flat string map.
    #[error("preference file could not be parsed")]
    Parse {
        /// File involved in the failure.
        path: PathBuf,
        /// Source serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience alias for preference results.
pub type PreferenceResult<T> = Result<T, PreferenceError>;

/// Errors raised while selecting or using a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The candidate location failed adapter validation.
    #[error("source failed validation")]
    Validation {
        /// Description of the rejected source.
        description: String,
    },
    /// Listing the available forms failed.
    #[error("failed to enumerate forms")]
    Enumerate {
        /// Description of the source.
        description: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Persisting source details failed.
    #[error("failed to persist source preferences")]
    Persist {
        /// Underlying preference failure.
        #[source]
        source: PreferenceError,
    },
}

/// Convenience alias for source results.
pub type SourceResult<T> = Result<T, SourceError>;

/// Outcome of a unit-of-work that did not finish successfully.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The unit observed cancellation at a checkpoint and stopped.
    #[error("pull cancelled at checkpoint")]
    Cancelled,
    /// The unit failed while performing an operation.
    #[error("pull operation failed")]
    Failed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The unit panicked; the payload message is preserved when available.
    #[error("pull operation panicked")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
}

impl UnitError {
    /// Wrap an underlying failure for `operation`.
    pub fn failed(operation: &'static str, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Failed {
            operation,
            source: source.into(),
        }
    }

    /// Human-readable cause suitable for a status history entry.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Cancelled => self.to_string(),
            Self::Failed { operation, source } => {
                format!("{operation}: {}", error_chain(source.as_ref()))
            }
            Self::Panicked { message } => format!("{self}: {message}"),
        }
    }
}

/// Render an error and its sources as `outer: inner: root`.
#[must_use]
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        current = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn unit_error_reason_includes_operation_and_chain() {
        let err = UnitError::failed("copy_form", io::Error::other("disk full"));
        assert_eq!(err.to_string(), "pull operation failed");
        assert_eq!(err.reason(), "copy_form: disk full");
    }

    #[test]
    fn error_chain_walks_sources() {
        let err = PreferenceError::Io {
            operation: "write",
            path: PathBuf::from("prefs.json"),
            source: io::Error::other("read-only filesystem"),
        };
        assert_eq!(
            error_chain(&err),
            "preference file operation failed: read-only filesystem"
        );
    }

    #[test]
    fn panicked_reason_keeps_payload() {
        let err = UnitError::Panicked {
            message: "index out of bounds".into(),
        };
        assert_eq!(err.reason(), "pull operation panicked: index out of bounds");
    }
}
