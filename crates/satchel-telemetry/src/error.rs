//! Errors raised while installing the log subscriber.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Telemetry failures.
#[derive(Debug)]
pub enum TelemetryError {
    /// A global subscriber was already set for this process.
    AlreadyInstalled {
        /// Error reported by `tracing-subscriber`.
        source: TryInitError,
    },
}

impl Display for TelemetryError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInstalled { .. } => {
                formatter.write_str("global log subscriber already installed")
            }
        }
    }
}

impl Error for TelemetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::AlreadyInstalled { source } => Some(source),
        }
    }
}
