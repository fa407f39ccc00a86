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

//! Satchel application wiring: settings, logging, the pull session, and the
//! command line.
//!
//! Layout: `bootstrap.rs` (settings, logging, and store wiring), `session.rs`
//! (`PullSession` facade over source, registry, and orchestrator), `cli.rs`
//! (clap front end), `error.rs` (`AppError`).

/// Settings loading and session construction.
pub mod bootstrap;
/// Command-line front end.
pub mod cli;
/// Application error type.
pub mod error;
/// Source selection and batch lifecycle.
pub mod session;

pub use bootstrap::{build_session, init_logging, load_settings, logging_config};
pub use error::{AppError, AppResult};
pub use session::{ActionState, CANCELLED_BY_USER, PullSession, SessionOptions};
