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

//! Event channel shared by the pull engine and its observers.
//!
//! Layout: `payloads.rs` (typed events and envelopes), `routing.rs` (the
//! [`EventChannel`] with synchronous subscribers and a replayable stream).

pub mod payloads;
pub mod routing;

pub use payloads::{
    DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId, EventKind, RecordId,
};
pub use routing::{EventChannel, EventStream, Interest, SubscriptionId};
