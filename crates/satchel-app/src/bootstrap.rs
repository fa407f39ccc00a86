//! Settings, logging, and session wiring for one run.

use std::path::Path;
use std::sync::Arc;

use satchel_config::{LogFormatSetting, PullSettings};
use satchel_core::{FilePreferences, PreferenceStore};
use satchel_events::EventChannel;
use satchel_sources::SourceFactory;
use satchel_telemetry::{LogFormat, LoggingConfig};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::session::{PullSession, SessionOptions};

const APP_PREFERENCES_EXTENSION: &str = "app.json";

/// Load settings from `lookup`, which maps variable names to values.
///
/// # Errors
///
/// Returns an error if the workspace is missing or a value is invalid.
pub fn load_settings<F>(lookup: F) -> AppResult<PullSettings>
where
    F: Fn(&str) -> Option<String>,
{
    PullSettings::from_lookup(lookup).map_err(|err| AppError::config("settings.load", err))
}

/// Logging configuration for `settings`.
#[must_use]
pub fn logging_config(settings: &PullSettings) -> LoggingConfig<'_> {
    let format = match settings.log_format {
        LogFormatSetting::Auto => LogFormat::infer(),
        LogFormatSetting::Json => LogFormat::Json,
        LogFormatSetting::Pretty => LogFormat::Pretty,
    };
    LoggingConfig {
        level: &settings.log_level,
        format,
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging(settings: &PullSettings) -> AppResult<()> {
    satchel_telemetry::init_logging(&logging_config(settings))
        .map_err(|err| AppError::telemetry("telemetry.init", err))
}

impl From<&PullSettings> for SessionOptions {
    fn from(settings: &PullSettings) -> Self {
        Self {
            workspace: settings.workspace.clone(),
            max_parallel: settings.max_parallel,
            start_from_last: settings.start_from_last,
            store_passwords: settings.store_passwords,
        }
    }
}

/// Open the preference stores and build a session publishing on `events`.
///
/// The pull store lives at the configured path; application-wide keys sit next
/// to it with an `app.json` extension.
///
/// # Errors
///
/// Returns an error if a preference file exists but cannot be read.
pub fn build_session(settings: &PullSettings, events: EventChannel) -> AppResult<PullSession> {
    let pull_prefs = open_store(&settings.preferences_path)?;
    let app_prefs = open_store(
        &settings
            .preferences_path
            .with_extension(APP_PREFERENCES_EXTENSION),
    )?;
    let factory = SourceFactory::new(&settings.workspace).with_cursor_store(Arc::clone(&pull_prefs));

    info!(
        workspace = %settings.workspace.display(),
        preferences = %settings.preferences_path.display(),
        max_parallel = settings.max_parallel,
        "pull session ready"
    );
    Ok(PullSession::new(
        &SessionOptions::from(settings),
        factory,
        events,
        pull_prefs,
        app_prefs,
    ))
}

fn open_store(path: &Path) -> AppResult<Arc<dyn PreferenceStore>> {
    let store = FilePreferences::open(path)
        .map_err(|err| AppError::preferences("preferences.open", err))?;
    Ok(Arc::new(store))
}
