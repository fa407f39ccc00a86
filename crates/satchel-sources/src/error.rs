//! # Design
//!
//! - Construction-time failures only; pull and enumeration failures travel as
//!   `UnitError` and `anyhow::Error` respectively.

use thiserror::Error;

/// Result alias for adapter construction.
pub type SourcesResult<T> = Result<T, SourcesError>;

/// Errors raised while building a source adapter.
#[derive(Debug, Error)]
pub enum SourcesError {
    /// A scanning pattern failed to compile.
    #[error("failed to compile scanning pattern")]
    RegexCompile {
        /// Offending pattern.
        pattern: &'static str,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },
    /// The adapter does not handle this source kind.
    #[error("source kind not handled by this adapter")]
    UnsupportedKind {
        /// Tag of the rejected kind.
        kind: &'static str,
    },
    /// No form-server client is available for a remote kind.
    #[error("no form server client configured")]
    NoClient {
        /// Tag of the remote kind.
        kind: &'static str,
    },
}
