//! Event payload types carried across the pull engine.

use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to each event published on a channel.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Identity of a transferable record (one form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap a raw form identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Typed events emitted while pulling forms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Intermediate status for one record.
    Progress {
        /// Record the status belongs to.
        record_id: RecordId,
        /// Human-readable status line.
        message: String,
    },
    /// A record's pull operation finished successfully.
    Succeeded {
        /// Record that was pulled.
        record_id: RecordId,
        /// Human-readable summary of the transfer.
        message: String,
    },
    /// A record's pull operation failed.
    Failed {
        /// Record whose pull failed.
        record_id: RecordId,
        /// Human-readable failure cause.
        message: String,
    },
    /// Every unit of a batch reached a terminal state.
    BatchCompleted {
        /// Batch identifier.
        batch_id: Uuid,
        /// Units that finished successfully.
        succeeded: usize,
        /// Units that failed.
        failed: usize,
        /// Units that stopped at a checkpoint after cancellation.
        cancelled: usize,
        /// Units that never started.
        skipped: usize,
    },
}

/// Discriminator used by subscribers to declare interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::Progress`].
    Progress,
    /// [`Event::Succeeded`].
    Success,
    /// [`Event::Failed`].
    Failure,
    /// [`Event::BatchCompleted`].
    BatchComplete,
}

impl EventKind {
    /// Machine-friendly label for logs and stream consumers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::BatchComplete => "batch_complete",
        }
    }
}

impl Event {
    /// Kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Progress { .. } => EventKind::Progress,
            Self::Succeeded { .. } => EventKind::Success,
            Self::Failed { .. } => EventKind::Failure,
            Self::BatchCompleted { .. } => EventKind::BatchComplete,
        }
    }

    /// Record addressed by the event, if any.
    #[must_use]
    pub const fn record_id(&self) -> Option<&RecordId> {
        match self {
            Self::Progress { record_id, .. }
            | Self::Succeeded { record_id, .. }
            | Self::Failed { record_id, .. } => Some(record_id),
            Self::BatchCompleted { .. } => None,
        }
    }

    /// Build a progress event.
    #[must_use]
    pub fn progress(record_id: RecordId, message: impl Into<String>) -> Self {
        Self::Progress {
            record_id,
            message: message.into(),
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier assigned by the channel.
    pub id: EventId,
    /// Emission instant; success events use it as the transfer timestamp.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event.
    pub event: Event,
}
