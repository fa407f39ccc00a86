//! Pull session: the selected source, its records, and the running batch.
//!
//! # Design
//! - The registry is attached to the shared event channel once, so every
//!   status line reaches it through the same route regardless of who
//!   publishes it.
//! - Successful pulls persist the transfer instant and let the source remember
//!   itself for the record; the listener never holds the session lock while
//!   touching preferences.
//! - Configuration changes are written through to the pull preference store
//!   immediately.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::SecondsFormat;
use satchel_core::{
    FormDescriptor, PreferenceStore, RecordId, SELECTED_SOURCE_PREFIX, SourceAdapter, SourceError,
    SourceKind, TransferConfiguration, TransferRegistry, custom_conf_prefix, is_source_pref_key,
    transfer_date_time_key,
};
use satchel_events::{Event, EventChannel};
use satchel_jobs::{BatchHandle, BatchState, JobOrchestrator};
use satchel_sources::SourceFactory;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// Status line appended to every selected record when the user cancels.
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// Session parameters derived from the loaded settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Default target directory for records without an override.
    pub workspace: PathBuf,
    /// Units run concurrently within a batch.
    pub max_parallel: usize,
    /// Default for resuming remote pulls.
    pub start_from_last: bool,
    /// Consent to persist source passwords.
    pub store_passwords: bool,
}

/// Which user actions are currently available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionState {
    /// A source is selected, some record is selected, and nothing is running.
    pub pull_enabled: bool,
    /// A batch is running and can be cancelled.
    pub cancel_enabled: bool,
    /// The selected source supports reloading and nothing is running.
    pub reload_enabled: bool,
    /// At least one record is listed.
    pub select_all_enabled: bool,
    /// Every record is selected.
    pub clear_all_visible: bool,
}

#[derive(Default)]
struct SessionState {
    source: Option<Arc<dyn SourceAdapter>>,
    batch: Option<BatchHandle>,
    store_passwords: bool,
}

impl SessionState {
    fn running_batch(&self) -> Option<&BatchHandle> {
        self.batch
            .as_ref()
            .filter(|batch| batch.state() != BatchState::Completed)
    }
}

/// Application facade tying a source, the registry, and the orchestrator
/// together.
#[derive(Clone)]
pub struct PullSession {
    registry: TransferRegistry,
    orchestrator: JobOrchestrator,
    factory: SourceFactory,
    pull_prefs: Arc<dyn PreferenceStore>,
    app_prefs: Arc<dyn PreferenceStore>,
    state: Arc<Mutex<SessionState>>,
}

impl PullSession {
    /// Session publishing on `events` and persisting into the given stores.
    #[must_use]
    pub fn new(
        options: &SessionOptions,
        factory: SourceFactory,
        events: EventChannel,
        pull_prefs: Arc<dyn PreferenceStore>,
        app_prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        let registry = TransferRegistry::new(TransferConfiguration {
            target_dir: Some(options.workspace.clone()),
            start_from_last: Some(options.start_from_last),
            ..TransferConfiguration::default()
        });
        let _ = registry.attach(&events);

        let state = Arc::new(Mutex::new(SessionState {
            store_passwords: options.store_passwords,
            ..SessionState::default()
        }));
        register_success_listener(&registry, &state, &pull_prefs, &app_prefs);

        Self {
            registry,
            orchestrator: JobOrchestrator::new(events, options.max_parallel),
            factory,
            pull_prefs,
            app_prefs,
            state,
        }
    }

    /// Records of the current source.
    #[must_use]
    pub const fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Channel every status line is published on.
    #[must_use]
    pub const fn events(&self) -> &EventChannel {
        self.orchestrator.events()
    }

    /// Description of the selected source.
    #[must_use]
    pub fn source_description(&self) -> Option<String> {
        self.lock_state().source.as_ref().map(|source| source.describe())
    }

    /// Handle of the most recent batch, running or not.
    #[must_use]
    pub fn current_batch(&self) -> Option<BatchHandle> {
        self.lock_state().batch.clone()
    }

    /// Re-select the source stored by a previous run. Returns `false` when
    /// nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::select_source`].
    pub async fn restore_selected_source(&self) -> AppResult<bool> {
        let Some(kind) = SourceKind::read_from(self.pull_prefs.as_ref(), SELECTED_SOURCE_PREFIX)
        else {
            debug!("no stored source to restore");
            return Ok(false);
        };
        self.select_source(kind).await.map(|_| true)
    }

    /// Build, validate, and load the source described by `kind`. Returns the
    /// number of listed records.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter exists for the kind, the location fails
    /// validation, enumeration fails, or a batch is running.
    pub async fn select_source(&self, kind: SourceKind) -> AppResult<usize> {
        let adapter = self
            .factory
            .build(kind)
            .map_err(|source| AppError::adapter("session.build_source", source))?;
        self.use_source(adapter).await
    }

    /// Validate and load an already built adapter. Records of a previous source
    /// are replaced; overrides and timestamps are restored from preferences.
    ///
    /// # Errors
    ///
    /// Returns an error if the location fails validation, enumeration fails,
    /// the selection cannot be persisted, or a batch is running.
    pub async fn use_source(&self, adapter: Arc<dyn SourceAdapter>) -> AppResult<usize> {
        self.ensure_idle("session.select_source")?;
        if !adapter.validate().await {
            return Err(AppError::selection(
                "session.validate_source",
                SourceError::Validation {
                    description: adapter.describe(),
                },
            ));
        }
        let forms = enumerate(adapter.as_ref()).await?;

        let store_passwords = self.lock_state().store_passwords;
        adapter
            .persist(self.pull_prefs.as_ref(), store_passwords)
            .map_err(|source| {
                AppError::selection("session.persist_source", SourceError::Persist { source })
            })?;

        self.registry.clear();
        self.registry.merge(forms);
        self.registry.restore_from(self.pull_prefs.as_ref());
        let count = self.registry.size();
        info!(source = %adapter.describe(), forms = count, "source selected");
        self.lock_state().source = Some(adapter);
        Ok(count)
    }

    /// Enumerate the selected source again, keeping selection and overrides of
    /// records that are still listed.
    ///
    /// # Errors
    ///
    /// Returns an error if no source is selected, it cannot be reloaded,
    /// enumeration fails, or a batch is running.
    pub async fn reload(&self) -> AppResult<usize> {
        self.ensure_idle("session.reload")?;
        let source = self.selected_source()?;
        if !source.can_be_reloaded() {
            return Err(AppError::InvalidConfig {
                field: "source",
                reason: "source cannot be reloaded",
                value: Some(source.describe()),
            });
        }
        let forms = enumerate(source.as_ref()).await?;
        self.registry.merge(forms);
        self.registry.restore_from(self.pull_prefs.as_ref());
        let count = self.registry.size();
        info!(source = %source.describe(), forms = count, "source reloaded");
        Ok(count)
    }

    /// Forget the selected source and its records.
    ///
    /// # Errors
    ///
    /// Returns an error if a batch is running or the stored source cannot be
    /// removed.
    pub fn reset(&self) -> AppResult<()> {
        self.ensure_idle("session.reset")?;
        self.registry.clear();
        self.lock_state().source = None;
        SourceKind::clear_stored(self.pull_prefs.as_ref(), SELECTED_SOURCE_PREFIX)
            .map_err(|source| AppError::preferences("session.reset", source))?;
        info!("session reset");
        Ok(())
    }

    /// Launch one batch pulling every selected record.
    ///
    /// # Errors
    ///
    /// Returns an error if no source or record is selected, a selected record
    /// has no usable configuration, or a batch is already running.
    pub fn pull(&self) -> AppResult<BatchHandle> {
        let source = self.selected_source()?;
        let selected = self.registry.selected_forms();
        if selected.is_empty() {
            return Err(AppError::MissingState {
                field: "selection",
                value: None,
            });
        }
        if !self.registry.all_selected_forms_have_configuration() {
            let unconfigured = selected
                .iter()
                .filter(|record| {
                    self.registry
                        .effective_configuration(record.id())
                        .map_or(true, |configuration| configuration.target_dir.is_none())
                })
                .map(|record| record.id().to_string())
                .collect::<Vec<_>>();
            return Err(AppError::InvalidConfig {
                field: "target_dir",
                reason: "selected forms have no target directory",
                value: Some(unconfigured.join(", ")),
            });
        }

        let units = selected
            .iter()
            .map(|record| {
                let configuration = self
                    .registry
                    .effective_configuration(record.id())
                    .map_err(|source| AppError::registry("session.pull", source))?;
                Ok(source.build_pull_operation(record, &configuration))
            })
            .collect::<AppResult<Vec<_>>>()?;

        let batch = self
            .orchestrator
            .launch(units, |failure| {
                debug!(
                    batch_id = %failure.batch_id,
                    record_id = %failure.record_id,
                    "pull failure recorded"
                );
            })
            .map_err(|source| AppError::jobs("session.pull", source))?;
        info!(
            batch_id = %batch.id(),
            forms = selected.len(),
            source = %source.describe(),
            "pull started"
        );
        self.lock_state().batch = Some(batch.clone());
        Ok(batch)
    }

    /// Cancel the running batch and mark every selected record. Returns
    /// `false` when nothing was running or cancellation was already requested.
    pub fn cancel(&self) -> bool {
        let Some(batch) = self
            .lock_state()
            .batch
            .clone()
            .filter(|batch| batch.state() == BatchState::Running)
        else {
            return false;
        };
        batch.cancel();
        for record in self.registry.selected_forms() {
            let _ = self
                .events()
                .publish(Event::progress(record.id().clone(), CANCELLED_BY_USER));
        }
        true
    }

    /// Currently available actions.
    #[must_use]
    pub fn action_state(&self) -> ActionState {
        let (has_source, reloadable, batch_state) = {
            let state = self.lock_state();
            (
                state.source.is_some(),
                state
                    .source
                    .as_ref()
                    .is_some_and(|source| source.can_be_reloaded()),
                state.running_batch().map(BatchHandle::state),
            )
        };
        let running = batch_state.is_some();
        ActionState {
            pull_enabled: has_source && self.registry.some_selected() && !running,
            cancel_enabled: batch_state == Some(BatchState::Running),
            reload_enabled: reloadable && !running,
            select_all_enabled: !self.registry.is_empty(),
            clear_all_visible: self.registry.all_selected(),
        }
    }

    /// Set the override of `id` and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ids or when the store cannot be written.
    pub fn put_configuration(
        &self,
        id: &RecordId,
        configuration: TransferConfiguration,
    ) -> AppResult<()> {
        self.registry
            .put_configuration(id, configuration.clone())
            .map_err(|source| AppError::registry("session.put_configuration", source))?;
        let prefix = custom_conf_prefix(id);
        self.pull_prefs
            .remove_all(&TransferConfiguration::option_keys(&prefix))
            .and_then(|()| self.pull_prefs.put_all(&configuration.as_map(&prefix)))
            .map_err(|source| AppError::preferences("session.put_configuration", source))
    }

    /// Drop the override of `id` from the registry and the store.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ids or when the store cannot be written.
    pub fn remove_configuration(&self, id: &RecordId) -> AppResult<Option<TransferConfiguration>> {
        let previous = self
            .registry
            .remove_configuration(id)
            .map_err(|source| AppError::registry("session.remove_configuration", source))?;
        self.pull_prefs
            .remove_all(&TransferConfiguration::option_keys(&custom_conf_prefix(id)))
            .map_err(|source| AppError::preferences("session.remove_configuration", source))?;
        Ok(previous)
    }

    /// Grant or revoke consent to store source passwords.
    ///
    /// Revoking removes every stored source key from both stores; the selected
    /// source is then persisted again without its password.
    ///
    /// # Errors
    ///
    /// Returns an error if a store cannot be written.
    pub fn set_store_passwords(&self, consent: bool) -> AppResult<()> {
        let source = {
            let mut state = self.lock_state();
            state.store_passwords = consent;
            state.source.clone()
        };
        if !consent {
            for store in [&self.pull_prefs, &self.app_prefs] {
                let keys = store
                    .keys()
                    .into_iter()
                    .filter(|key| is_source_pref_key(key))
                    .collect::<Vec<_>>();
                store
                    .remove_all(&keys)
                    .map_err(|source| AppError::preferences("session.revoke_consent", source))?;
            }
            info!("stored source credentials removed");
        }
        if let Some(source) = source {
            source
                .persist(self.pull_prefs.as_ref(), consent)
                .map_err(|source| AppError::preferences("session.persist_source", source))?;
        }
        Ok(())
    }

    fn selected_source(&self) -> AppResult<Arc<dyn SourceAdapter>> {
        self.lock_state()
            .source
            .clone()
            .ok_or(AppError::MissingState {
                field: "source",
                value: None,
            })
    }

    fn ensure_idle(&self, operation: &'static str) -> AppResult<()> {
        match self.lock_state().running_batch() {
            Some(batch) => {
                debug!(operation, batch_id = %batch.id(), "rejected while a pull is running");
                Err(AppError::InvalidConfig {
                    field: "batch",
                    reason: "a pull is in progress",
                    value: Some(batch.id().to_string()),
                })
            }
            None => Ok(()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn enumerate(adapter: &dyn SourceAdapter) -> AppResult<Vec<FormDescriptor>> {
    adapter.enumerate().await.map_err(|err| {
        warn!(source = %adapter.describe(), error = %err, "unable to load form list");
        AppError::selection(
            "session.enumerate",
            SourceError::Enumerate {
                description: adapter.describe(),
                source: err.into(),
            },
        )
    })
}

fn register_success_listener(
    registry: &TransferRegistry,
    state: &Arc<Mutex<SessionState>>,
    pull_prefs: &Arc<dyn PreferenceStore>,
    app_prefs: &Arc<dyn PreferenceStore>,
) {
    let state = Arc::clone(state);
    let pull_prefs = Arc::clone(pull_prefs);
    let app_prefs = Arc::clone(app_prefs);
    registry.on_successful_export(move |record_id, at| {
        let stamp = at.to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Err(err) = pull_prefs.put(&transfer_date_time_key(record_id), &stamp) {
            warn!(record_id = %record_id, error = %err, "failed to persist transfer time");
        }
        let (source, store_passwords) = {
            let state = state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.source.clone(), state.store_passwords)
        };
        if let Some(source) = source
            && let Err(err) =
                source.remember_for_record(app_prefs.as_ref(), store_passwords, record_id)
        {
            warn!(record_id = %record_id, error = %err, "failed to remember source for form");
        }
    });
}
