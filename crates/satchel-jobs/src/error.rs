//! # Design
//!
//! - Launch errors are the only fallible orchestration paths; unit failures are
//!   reported through events and the error callback instead.

use thiserror::Error;
use uuid::Uuid;

/// Result alias for orchestration operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors raised while launching or awaiting a batch.
#[derive(Debug, Error)]
pub enum JobError {
    /// Another batch is still running on this orchestrator.
    #[error("a batch is already active")]
    BatchActive {
        /// Identifier of the running batch.
        active_batch: Uuid,
    },
    /// No Tokio runtime was available to run the batch.
    #[error("no async runtime available")]
    NoRuntime {
        /// Runtime lookup failure.
        #[source]
        source: tokio::runtime::TryCurrentError,
    },
    /// The supervisor stopped before reporting completion.
    #[error("batch supervisor stopped before completion")]
    SupervisorLost {
        /// Identifier of the abandoned batch.
        batch_id: Uuid,
    },
}
