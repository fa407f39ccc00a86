#![forbid(unsafe_code)]
#![warn(
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Bounded-parallel execution of pull operations with cooperative
//! cancellation and exactly-once completion.
//!
//! Layout: `orchestrator.rs` (`JobOrchestrator`, unit execution), `batch.rs`
//! (`BatchHandle`, `BatchSummary`), `error.rs` (`JobError`).

pub mod batch;
pub mod error;
pub mod orchestrator;

pub use batch::{BatchHandle, BatchState, BatchSummary, UnitFailure};
pub use error::{JobError, JobResult};
pub use orchestrator::{DEFAULT_MAX_PARALLEL, JobOrchestrator};
