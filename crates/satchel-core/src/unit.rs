//! Units-of-work and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use satchel_events::{Event, EventChannel, EventId, RecordId};

use crate::error::UnitError;

/// One-way cancellation flag shared by every unit of a batch.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    /// Fresh, uncancelled signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Irreversible.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Execution context handed to a running pull operation.
#[derive(Clone)]
pub struct UnitContext {
    record_id: RecordId,
    events: EventChannel,
    cancel: CancelSignal,
}

impl UnitContext {
    /// Context for the unit pulling `record_id`.
    #[must_use]
    pub fn new(record_id: RecordId, events: EventChannel, cancel: CancelSignal) -> Self {
        Self {
            record_id,
            events,
            cancel,
        }
    }

    /// Record being pulled.
    #[must_use]
    pub const fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    /// Natural stopping point: fails with [`UnitError::Cancelled`] once the
    /// batch has been cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`UnitError::Cancelled`] when cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), UnitError> {
        if self.cancel.is_cancelled() {
            Err(UnitError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Publish a progress line for the record.
    pub fn progress(&self, message: impl Into<String>) -> EventId {
        self.events
            .publish(Event::progress(self.record_id.clone(), message))
    }
}

/// Result of a successful pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSummary {
    /// Submissions written to the target.
    pub submissions: usize,
    /// Status line recorded on success.
    pub message: String,
}

impl PullSummary {
    /// Summary for a pull that wrote `submissions` instances out of `total`.
    #[must_use]
    pub fn pulled(submissions: usize, total: usize) -> Self {
        Self {
            submissions,
            message: format!("Success: pulled {submissions} of {total} submissions"),
        }
    }
}

/// One record's pull operation, executed independently of its siblings.
///
/// Implementations call [`UnitContext::checkpoint`] between steps so a
/// cancelled batch stops them without interrupting a step mid-flight.
#[async_trait]
pub trait PullOperation: Send + Sync {
    /// Record this unit pulls.
    fn record_id(&self) -> &RecordId;

    /// Perform the pull.
    async fn run(&self, ctx: &UnitContext) -> Result<PullSummary, UnitError>;
}
