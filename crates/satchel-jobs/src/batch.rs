//! Batch handles and completion bookkeeping.

use std::fmt::{self, Debug, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use satchel_core::{CancelSignal, UnitError};
use satchel_events::RecordId;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{JobError, JobResult};
use crate::orchestrator::describe_panic;

/// Lifecycle of a launched batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Units are running or queued.
    Running,
    /// Cancellation was requested; running units are winding down.
    Cancelling,
    /// Every unit has finished and completion callbacks have run.
    Completed,
}

/// Outcome counts of a finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    /// Batch identifier.
    pub batch_id: Uuid,
    /// Units that returned a pull summary.
    pub succeeded: usize,
    /// Units that failed or panicked.
    pub failed: usize,
    /// Units that stopped at a checkpoint after cancellation.
    pub cancelled: usize,
    /// Units never started because the batch was cancelled first.
    pub skipped: usize,
}

impl BatchSummary {
    pub(crate) const fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            skipped: 0,
        }
    }

    /// Number of units in the batch.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled + self.skipped
    }

    pub(crate) const fn record(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Succeeded => self.succeeded += 1,
            UnitOutcome::Failed => self.failed += 1,
            UnitOutcome::Cancelled => self.cancelled += 1,
            UnitOutcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitOutcome {
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

/// A unit that failed, handed to the batch error callback.
#[derive(Debug)]
pub struct UnitFailure {
    /// Batch the unit belonged to.
    pub batch_id: Uuid,
    /// Record the unit was pulling.
    pub record_id: RecordId,
    /// Why it failed.
    pub error: UnitError,
}

type CompletionCallback = Box<dyn FnOnce(&BatchSummary) + Send>;

#[derive(Default)]
struct Completion {
    summary: Option<BatchSummary>,
    pending: Vec<CompletionCallback>,
}

pub(crate) struct BatchShared {
    id: Uuid,
    cancel: CancelSignal,
    completion: Mutex<Completion>,
}

impl BatchShared {
    pub(crate) fn new(id: Uuid) -> Self {
        Self {
            id,
            cancel: CancelSignal::new(),
            completion: Mutex::new(Completion::default()),
        }
    }

    pub(crate) fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Record the summary and drain pending callbacks outside the lock.
    pub(crate) fn complete(&self, summary: &BatchSummary) {
        let pending = {
            let mut completion = self
                .completion
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            completion.summary = Some(summary.clone());
            std::mem::take(&mut completion.pending)
        };
        for callback in pending {
            run_callback(self.id, callback, summary);
        }
    }
}

/// A panicking callback is logged and does not stop the ones after it.
fn run_callback<F>(batch_id: Uuid, callback: F, summary: &BatchSummary)
where
    F: FnOnce(&BatchSummary),
{
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(summary))) {
        error!(
            batch_id = %batch_id,
            panic = %describe_panic(payload),
            "completion callback panicked"
        );
    }
}

/// Caller's view of a launched batch. Clones observe the same batch.
#[derive(Clone)]
pub struct BatchHandle {
    shared: Arc<BatchShared>,
    done: watch::Receiver<Option<BatchSummary>>,
}

impl Debug for BatchHandle {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BatchHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

impl BatchHandle {
    pub(crate) const fn new(
        shared: Arc<BatchShared>,
        done: watch::Receiver<Option<BatchSummary>>,
    ) -> Self {
        Self { shared, done }
    }

    /// Batch identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BatchState {
        if self.done.borrow().is_some() {
            BatchState::Completed
        } else if self.shared.cancel.is_cancelled() {
            BatchState::Cancelling
        } else {
            BatchState::Running
        }
    }

    /// Request cancellation. Queued units are skipped and running units stop
    /// at their next checkpoint. Repeated calls are no-ops.
    pub fn cancel(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!(batch_id = %self.shared.id, "batch cancellation requested");
        }
        self.shared.cancel.cancel();
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Summary once the batch has completed.
    #[must_use]
    pub fn summary(&self) -> Option<BatchSummary> {
        self.done.borrow().clone()
    }

    /// Run `callback` exactly once when the batch completes. Registering after
    /// completion runs it immediately on the calling thread.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&BatchSummary) + Send + 'static,
    {
        let finished = {
            let mut completion = self
                .shared
                .completion
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match &completion.summary {
                Some(summary) => Some(summary.clone()),
                None => {
                    completion.pending.push(Box::new(callback));
                    return;
                }
            }
        };
        if let Some(summary) = finished {
            run_callback(self.shared.id, callback, &summary);
        }
    }

    /// Wait until every unit has finished and completion callbacks have run.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::SupervisorLost`] if the runtime shut down before
    /// the batch finished.
    pub async fn wait_for_completion(&self) -> JobResult<BatchSummary> {
        let mut done = self.done.clone();
        let lost = || JobError::SupervisorLost {
            batch_id: self.shared.id,
        };
        let summary = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| lost())?
            .clone();
        summary.ok_or_else(lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle() -> (BatchHandle, Arc<BatchShared>, watch::Sender<Option<BatchSummary>>) {
        let shared = Arc::new(BatchShared::new(Uuid::new_v4()));
        let (tx, rx) = watch::channel(None);
        (BatchHandle::new(Arc::clone(&shared), rx), shared, tx)
    }

    #[test]
    fn state_follows_cancel_and_completion() {
        let (handle, shared, tx) = handle();
        assert_eq!(handle.state(), BatchState::Running);

        handle.cancel();
        handle.cancel();
        assert_eq!(handle.state(), BatchState::Cancelling);

        let summary = BatchSummary::new(handle.id());
        shared.complete(&summary);
        tx.send_replace(Some(summary.clone()));
        assert_eq!(handle.state(), BatchState::Completed);
        assert_eq!(handle.summary(), Some(summary));
    }

    #[test]
    fn callbacks_fire_once_including_late_registrations() {
        let (handle, shared, _tx) = handle();
        let calls = Arc::new(AtomicUsize::new(0));
        let early = Arc::clone(&calls);
        handle.on_complete(move |_| {
            early.fetch_add(1, Ordering::SeqCst);
        });

        shared.complete(&BatchSummary::new(handle.id()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let late = Arc::clone(&calls);
        handle.on_complete(move |_| {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_callbacks_are_contained() {
        let (handle, shared, _tx) = handle();
        let calls = Arc::new(AtomicUsize::new(0));
        handle.on_complete(|_| panic!("early callback"));
        let after = Arc::clone(&calls);
        handle.on_complete(move |_| {
            after.fetch_add(1, Ordering::SeqCst);
        });

        shared.complete(&BatchSummary::new(handle.id()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.on_complete(|_| panic!("late callback"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn summary_counts_outcomes() {
        let mut summary = BatchSummary::new(Uuid::nil());
        for outcome in [
            UnitOutcome::Succeeded,
            UnitOutcome::Failed,
            UnitOutcome::Skipped,
            UnitOutcome::Skipped,
        ] {
            summary.record(outcome);
        }
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.skipped, 2);
    }

    #[tokio::test]
    async fn dropped_supervisor_is_reported() {
        let (handle, _shared, tx) = handle();
        drop(tx);
        let err = handle.wait_for_completion().await.expect_err("no summary");
        assert!(matches!(err, JobError::SupervisorLost { .. }));
    }
}
