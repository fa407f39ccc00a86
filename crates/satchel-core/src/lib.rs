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

//! Source-agnostic pull interfaces, the transfer registry, and preference
//! contracts.
//!
//! Layout: `model.rs` (records and descriptors), `configuration.rs`
//! (per-record overrides and their preference encoding), `registry.rs`
//! (`TransferRegistry`), `prefs.rs` (`PreferenceStore` plus in-memory and
//! file-backed stores), `source.rs` (`SourceKind`, `SourceAdapter`,
//! `FormServerClient`), `unit.rs` (pull operations and cooperative
//! cancellation), `error.rs` (error types).

pub mod configuration;
pub mod error;
pub mod model;
pub mod prefs;
pub mod registry;
pub mod source;
pub mod unit;

pub use configuration::{
    ConfigurationPolicy, RequireTargetDir, TransferConfiguration, custom_conf_prefix,
    transfer_date_time_key,
};
pub use error::{
    PreferenceError, PreferenceResult, RegistryError, RegistryResult, SourceError, SourceResult,
    UnitError, error_chain,
};
pub use model::{FormDescriptor, StatusEntry, TransferRecord};
pub use prefs::{FilePreferences, InMemoryPreferences, PreferenceStore};
pub use registry::TransferRegistry;
pub use satchel_events::RecordId;
pub use source::{
    Credentials, FormServerClient, SELECTED_SOURCE_PREFIX, ServerEndpoint, SourceAdapter,
    SourceKind, is_source_pref_key, remembered_source_prefix,
};
pub use unit::{CancelSignal, PullOperation, PullSummary, UnitContext};
