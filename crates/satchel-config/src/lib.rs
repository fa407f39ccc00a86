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

//! Runtime settings for pull sessions, read from the environment.
//!
//! Layout: `model.rs` (`PullSettings`), `loader.rs` (environment parsing),
//! `validate.rs` (field parsers), `error.rs` (`ConfigError`).

pub mod error;
pub mod loader;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    ENV_LOG_FORMAT, ENV_LOG_LEVEL, ENV_MAX_PARALLEL, ENV_PREFERENCES, ENV_START_FROM_LAST,
    ENV_STORE_PASSWORDS, ENV_WORKSPACE,
};
pub use model::{LogFormatSetting, PullSettings};
