//! # Design
//!
//! - Centralize application-level errors for bootstrap, session, and CLI flows.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: satchel_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: satchel_telemetry::TelemetryError,
    },
    /// Preference store operations failed.
    #[error("preference operation failed")]
    Preferences {
        /// Operation identifier.
        operation: &'static str,
        /// Source preference error.
        source: satchel_core::PreferenceError,
    },
    /// Source selection or enumeration failed.
    #[error("source operation failed")]
    Source {
        /// Operation identifier.
        operation: &'static str,
        /// Source selection error.
        source: satchel_core::SourceError,
    },
    /// Building a source adapter failed.
    #[error("source adapter construction failed")]
    Adapter {
        /// Operation identifier.
        operation: &'static str,
        /// Source adapter error.
        source: satchel_sources::SourcesError,
    },
    /// Registry operations failed.
    #[error("registry operation failed")]
    Registry {
        /// Operation identifier.
        operation: &'static str,
        /// Source registry error.
        source: satchel_core::RegistryError,
    },
    /// Batch orchestration failed.
    #[error("batch operation failed")]
    Jobs {
        /// Operation identifier.
        operation: &'static str,
        /// Source orchestration error.
        source: satchel_jobs::JobError,
    },
    /// Values were invalid for the requested action.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
    /// Required session state was missing.
    #[error("missing state")]
    MissingState {
        /// State field that was missing.
        field: &'static str,
        /// Optional value associated with the missing state.
        value: Option<String>,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: satchel_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: satchel_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn preferences(
        operation: &'static str,
        source: satchel_core::PreferenceError,
    ) -> Self {
        Self::Preferences { operation, source }
    }

    pub(crate) const fn selection(operation: &'static str, source: satchel_core::SourceError) -> Self {
        Self::Source { operation, source }
    }

    pub(crate) const fn adapter(
        operation: &'static str,
        source: satchel_sources::SourcesError,
    ) -> Self {
        Self::Adapter { operation, source }
    }

    pub(crate) const fn registry(
        operation: &'static str,
        source: satchel_core::RegistryError,
    ) -> Self {
        Self::Registry { operation, source }
    }

    pub(crate) const fn jobs(operation: &'static str, source: satchel_jobs::JobError) -> Self {
        Self::Jobs { operation, source }
    }
}
