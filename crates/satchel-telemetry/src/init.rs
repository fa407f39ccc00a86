//! Log subscriber installation.
//!
//! # Design
//! - One registry carries the output layer and an `EnvFilter`; `RUST_LOG`
//!   replaces the configured directive when set.
//! - JSON output flattens event fields so `record_id` and `batch_id` sit at the
//!   top level of each line.

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{Result, TelemetryError};

/// Directive used when nothing else is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How and what to log.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Filter directive, e.g. `info` or `satchel_jobs=debug,info`.
    pub level: &'a str,
    /// Output layout.
    pub format: LogFormat,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
        }
    }
}

/// Output layout of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl LogFormat {
    /// Pretty in debug builds, JSON otherwise.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Install the process-wide subscriber described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::AlreadyInstalled`] when a global subscriber is
/// already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let output = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_thread_ids(false).boxed(),
    };
    tracing_subscriber::registry()
        .with(output)
        .with(env_filter(config.level))
        .try_init()
        .map_err(|source| TelemetryError::AlreadyInstalled { source })
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_logs_at_info() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::infer());
    }

    #[test]
    fn only_the_first_installation_wins() {
        let config = LoggingConfig {
            level: "debug",
            format: LogFormat::Json,
        };
        let _ = init_logging(&config);
        let again = init_logging(&config);
        assert!(matches!(again, Err(TelemetryError::AlreadyInstalled { .. })));
        assert_eq!(
            again.err().map(|err| err.to_string()).as_deref(),
            Some("global log subscriber already installed")
        );
    }
}
