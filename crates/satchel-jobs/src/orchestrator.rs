//! Launches pull operations as one batch on the Tokio runtime.
//!
//! # Design
//! - A semaphore bounds how many units run at once; queued units check the
//!   cancel signal after acquiring a permit and are skipped once it is set.
//! - Each unit runs in its own task so a panic is contained and reported as a
//!   failure of that unit alone.
//! - Exactly one terminal event (`Succeeded` or `Failed`) is published per
//!   started unit. Cancelled and skipped units publish nothing.
//! - Completion order: the active slot is released, completion callbacks run,
//!   `BatchCompleted` is published, then waiters are woken.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use satchel_core::{CancelSignal, PullOperation, UnitContext, UnitError};
use satchel_events::{Event, EventChannel};
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batch::{BatchHandle, BatchShared, BatchSummary, UnitFailure, UnitOutcome};
use crate::error::{JobError, JobResult};

/// Units run concurrently unless configured otherwise.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

type ErrorCallback = Arc<dyn Fn(UnitFailure) + Send + Sync>;

/// Runs batches of pull operations, one batch at a time.
#[derive(Clone)]
pub struct JobOrchestrator {
    events: EventChannel,
    max_parallel: usize,
    active: Arc<Mutex<Option<Uuid>>>,
}

impl JobOrchestrator {
    /// Orchestrator publishing to `events` with at most `max_parallel` units
    /// in flight (at least one).
    #[must_use]
    pub fn new(events: EventChannel, max_parallel: usize) -> Self {
        Self {
            events,
            max_parallel: max_parallel.max(1),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Channel terminal events are published to.
    #[must_use]
    pub const fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Maximum number of concurrently running units.
    #[must_use]
    pub const fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Identifier of the running batch, if any.
    #[must_use]
    pub fn active_batch(&self) -> Option<Uuid> {
        *self.lock_active()
    }

    /// Start `units` as a new batch and return immediately.
    ///
    /// `on_error` is invoked once per failed or panicked unit, from the task
    /// that ran it.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::BatchActive`] while another batch is running and
    /// [`JobError::NoRuntime`] outside a Tokio runtime.
    pub fn launch<F>(&self, units: Vec<Arc<dyn PullOperation>>, on_error: F) -> JobResult<BatchHandle>
    where
        F: Fn(UnitFailure) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|source| JobError::NoRuntime { source })?;
        let batch_id = Uuid::new_v4();
        {
            let mut active = self.lock_active();
            if let Some(active_batch) = *active {
                warn!(%active_batch, "launch rejected while a batch is active");
                return Err(JobError::BatchActive { active_batch });
            }
            *active = Some(batch_id);
        }

        let shared = Arc::new(BatchShared::new(batch_id));
        let (done_tx, done_rx) = watch::channel(None);
        info!(
            %batch_id,
            units = units.len(),
            max_parallel = self.max_parallel,
            "batch launched"
        );

        let supervisor = Supervisor {
            batch_id,
            shared: Arc::clone(&shared),
            events: self.events.clone(),
            active: Arc::clone(&self.active),
            runner: UnitRunner {
                batch_id,
                events: self.events.clone(),
                cancel: shared.cancel_signal(),
                semaphore: Arc::new(Semaphore::new(self.max_parallel)),
                on_error: Arc::new(on_error),
            },
        };
        runtime.spawn(supervisor.run(units, done_tx));

        Ok(BatchHandle::new(shared, done_rx))
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<Uuid>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Supervisor {
    batch_id: Uuid,
    shared: Arc<BatchShared>,
    events: EventChannel,
    active: Arc<Mutex<Option<Uuid>>>,
    runner: UnitRunner,
}

impl Supervisor {
    async fn run(
        self,
        units: Vec<Arc<dyn PullOperation>>,
        done: watch::Sender<Option<BatchSummary>>,
    ) {
        let mut tasks = JoinSet::new();
        for unit in units {
            tasks.spawn(self.runner.clone().run(unit));
        }

        let mut summary = BatchSummary::new(self.batch_id);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(err) => {
                    error!(batch_id = %self.batch_id, error = %err, "unit task aborted");
                    summary.record(UnitOutcome::Failed);
                }
            }
        }

        self.finish(&summary);
        done.send_replace(Some(summary));
    }

    fn finish(&self, summary: &BatchSummary) {
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if *active == Some(self.batch_id) {
                *active = None;
            }
        }
        self.shared.complete(summary);
        let _ = self.events.publish(Event::BatchCompleted {
            batch_id: self.batch_id,
            succeeded: summary.succeeded,
            failed: summary.failed,
            cancelled: summary.cancelled,
            skipped: summary.skipped,
        });
        info!(
            batch_id = %self.batch_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            "batch completed"
        );
    }
}

#[derive(Clone)]
struct UnitRunner {
    batch_id: Uuid,
    events: EventChannel,
    cancel: CancelSignal,
    semaphore: Arc<Semaphore>,
    on_error: ErrorCallback,
}

impl UnitRunner {
    async fn run(self, unit: Arc<dyn PullOperation>) -> UnitOutcome {
        let record_id = unit.record_id().clone();
        let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return UnitOutcome::Skipped;
        };
        if self.cancel.is_cancelled() {
            debug!(batch_id = %self.batch_id, record_id = %record_id, "unit skipped after cancellation");
            return UnitOutcome::Skipped;
        }

        let ctx = UnitContext::new(record_id.clone(), self.events.clone(), self.cancel.clone());
        let task = tokio::spawn(async move { unit.run(&ctx).await });
        let result = match task.await {
            Ok(result) => result,
            Err(err) => Err(UnitError::Panicked {
                message: panic_message(err),
            }),
        };

        match result {
            Ok(summary) => {
                debug!(
                    batch_id = %self.batch_id,
                    record_id = %record_id,
                    submissions = summary.submissions,
                    "unit succeeded"
                );
                let _ = self.events.publish(Event::Succeeded {
                    record_id,
                    message: summary.message,
                });
                UnitOutcome::Succeeded
            }
            Err(UnitError::Cancelled) => {
                debug!(batch_id = %self.batch_id, record_id = %record_id, "unit stopped at checkpoint");
                UnitOutcome::Cancelled
            }
            Err(error) => {
                let reason = error.reason();
                warn!(
                    batch_id = %self.batch_id,
                    record_id = %record_id,
                    error = %reason,
                    "pull operation failed"
                );
                let _ = self.events.publish(Event::Failed {
                    record_id: record_id.clone(),
                    message: reason,
                });
                (self.on_error)(UnitFailure {
                    batch_id: self.batch_id,
                    record_id,
                    error,
                });
                UnitOutcome::Failed
            }
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "pull operation was aborted".to_string();
    }
    describe_panic(err.into_panic())
}

pub(crate) fn describe_panic(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&'static str>()
            .map_or_else(|| "non-string panic payload".to_string(), |message| (*message).to_string()),
    }
}
