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

//! Source adapters: Collect storage directories and remote form servers.
//!
//! Layout: `collect.rs` (`CollectDirSource`), `remote.rs` (`RemoteSource` over
//! an injected `FormServerClient`), `scan.rs` (form and submission XML
//! scanning), `layout.rs` (target tree naming and copying), `factory.rs`
//! (`SourceFactory`), `error.rs` (`SourcesError`).

pub mod collect;
pub mod error;
pub mod factory;
pub mod layout;
pub mod remote;
pub mod scan;

pub use collect::CollectDirSource;
pub use error::{SourcesError, SourcesResult};
pub use factory::{ClientFactory, SourceFactory};
pub use remote::{RemoteSource, cursor_key};
pub use scan::{FormDefinition, FormScanner};
