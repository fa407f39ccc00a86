//! Ordered ledger of transferable records.
//!
//! # Design
//! - One mutex guards every record; a status entry and the matching
//!   last-transfer update are applied under the same guard.
//! - Success listeners run after the guard is released, synchronously and in
//!   registration order, so they may call back into the registry.
//! - Handles are cheap clones over shared state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDateTime, Utc};
use satchel_events::{Event, EventChannel, EventEnvelope, EventKind, Interest, RecordId, SubscriptionId};
use tracing::{debug, warn};

use crate::configuration::{
    ConfigurationPolicy, RequireTargetDir, TransferConfiguration, custom_conf_prefix,
    transfer_date_time_key,
};
use crate::error::{RegistryError, RegistryResult};
use crate::model::{FormDescriptor, StatusEntry, TransferRecord};
use crate::prefs::PreferenceStore;

type SuccessListener = Arc<dyn Fn(&RecordId, DateTime<Utc>) + Send + Sync>;

struct RegistryState {
    records: Vec<TransferRecord>,
    positions: HashMap<RecordId, usize>,
    default_configuration: TransferConfiguration,
}

impl RegistryState {
    fn record(&self, id: &RecordId) -> RegistryResult<&TransferRecord> {
        self.positions
            .get(id)
            .map(|&index| &self.records[index])
            .ok_or_else(|| RegistryError::NotFound {
                record_id: id.clone(),
            })
    }

    fn record_mut(&mut self, id: &RecordId) -> RegistryResult<&mut TransferRecord> {
        match self.positions.get(id) {
            Some(&index) => Ok(&mut self.records[index]),
            None => Err(RegistryError::NotFound {
                record_id: id.clone(),
            }),
        }
    }
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    listeners: Mutex<Vec<SuccessListener>>,
    policy: Arc<dyn ConfigurationPolicy>,
}

/// Registry of transferable records, shared by the session and running units.
#[derive(Clone)]
pub struct TransferRegistry {
    inner: Arc<RegistryInner>,
}

impl TransferRegistry {
    /// Empty registry validating configurations with [`RequireTargetDir`].
    #[must_use]
    pub fn new(default_configuration: TransferConfiguration) -> Self {
        Self::with_policy(default_configuration, Arc::new(RequireTargetDir))
    }

    /// Empty registry with a custom configuration policy.
    #[must_use]
    pub fn with_policy(
        default_configuration: TransferConfiguration,
        policy: Arc<dyn ConfigurationPolicy>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    records: Vec::new(),
                    positions: HashMap::new(),
                    default_configuration,
                }),
                listeners: Mutex::new(Vec::new()),
                policy,
            }),
        }
    }

    /// Registry populated from `discovered`.
    #[must_use]
    pub fn from_descriptors<I>(default_configuration: TransferConfiguration, discovered: I) -> Self
    where
        I: IntoIterator<Item = FormDescriptor>,
    {
        let registry = Self::new(default_configuration);
        registry.merge(discovered);
        registry
    }

    /// Build a registry from `discovered` and restore each record's
    /// configuration and last transfer instant from `store`.
    #[must_use]
    pub fn load<I>(
        default_configuration: TransferConfiguration,
        discovered: I,
        store: &dyn PreferenceStore,
    ) -> Self
    where
        I: IntoIterator<Item = FormDescriptor>,
    {
        let registry = Self::from_descriptors(default_configuration, discovered);
        registry.restore_from(store);
        registry
    }

    /// Restore persisted state for every record: configuration where none is
    /// set yet, and the last transfer instant when it is newer.
    pub fn restore_from(&self, store: &dyn PreferenceStore) {
        let mut state = self.lock_state();
        for record in &mut state.records {
            let id = record.id().clone();
            if record.configuration().is_none() {
                let prefix = custom_conf_prefix(&id);
                if let Some(configuration) =
                    TransferConfiguration::from_lookup(&prefix, |key| store.get(key))
                {
                    record.set_configuration(Some(configuration));
                }
            }
            let key = transfer_date_time_key(&id);
            if let Some(raw) = store.get(&key) {
                match parse_timestamp(&raw) {
                    Some(at) => {
                        let _ = record.advance_last_transfer(at);
                    }
                    None => warn!(%key, value = %raw, "ignoring unparseable transfer timestamp"),
                }
            }
        }
    }

    /// Merge newly discovered forms. Known ids only get their descriptive
    /// attributes refreshed; new ids are appended in incoming order.
    pub fn merge<I>(&self, incoming: I)
    where
        I: IntoIterator<Item = FormDescriptor>,
    {
        let mut state = self.lock_state();
        let mut appended = 0_usize;
        for descriptor in incoming {
            if let Some(&index) = state.positions.get(&descriptor.id) {
                state.records[index].refresh_descriptor(descriptor);
            } else {
                let index = state.records.len();
                state.positions.insert(descriptor.id.clone(), index);
                state.records.push(TransferRecord::new(descriptor));
                appended += 1;
            }
        }
        debug!(appended, size = state.records.len(), "records merged");
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.records.clear();
        state.positions.clear();
    }

    /// Number of records.
    #[must_use]
    pub fn size(&self) -> usize {
        self.lock_state().records.len()
    }

    /// Whether the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_state().records.is_empty()
    }

    /// Snapshot of the record at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::IndexOutOfRange`] outside `[0, size)`.
    pub fn get(&self, index: usize) -> RegistryResult<TransferRecord> {
        let state = self.lock_state();
        state
            .records
            .get(index)
            .cloned()
            .ok_or(RegistryError::IndexOutOfRange {
                index,
                size: state.records.len(),
            })
    }

    /// Snapshot of the record with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn find(&self, id: &RecordId) -> RegistryResult<TransferRecord> {
        self.lock_state().record(id).cloned()
    }

    /// Snapshot of every record in order.
    #[must_use]
    pub fn records(&self) -> Vec<TransferRecord> {
        self.lock_state().records.clone()
    }

    /// Selected records in registry order.
    #[must_use]
    pub fn selected_forms(&self) -> Vec<TransferRecord> {
        self.lock_state()
            .records
            .iter()
            .filter(|record| record.is_selected())
            .cloned()
            .collect()
    }

    /// Select or deselect one record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn set_selected(&self, id: &RecordId, selected: bool) -> RegistryResult<()> {
        self.lock_state().record_mut(id)?.set_selected(selected);
        Ok(())
    }

    /// Select every record.
    pub fn select_all(&self) {
        self.set_all_selected(true);
    }

    /// Deselect every record.
    pub fn clear_all(&self) {
        self.set_all_selected(false);
    }

    /// Whether at least one record is selected.
    #[must_use]
    pub fn some_selected(&self) -> bool {
        self.lock_state()
            .records
            .iter()
            .any(TransferRecord::is_selected)
    }

    /// Whether no record is selected; true for an empty registry.
    #[must_use]
    pub fn none_selected(&self) -> bool {
        !self.some_selected()
    }

    /// Whether every record is selected; false for an empty registry.
    #[must_use]
    pub fn all_selected(&self) -> bool {
        let state = self.lock_state();
        !state.records.is_empty() && state.records.iter().all(TransferRecord::is_selected)
    }

    /// Set a custom configuration for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn put_configuration(
        &self,
        id: &RecordId,
        configuration: TransferConfiguration,
    ) -> RegistryResult<()> {
        self.lock_state()
            .record_mut(id)?
            .set_configuration(Some(configuration));
        Ok(())
    }

    /// Remove the custom configuration of `id`, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn remove_configuration(
        &self,
        id: &RecordId,
    ) -> RegistryResult<Option<TransferConfiguration>> {
        let mut state = self.lock_state();
        let record = state.record_mut(id)?;
        let previous = record.configuration().cloned();
        record.set_configuration(None);
        Ok(previous)
    }

    /// Whether `id` has a custom configuration. Unknown ids have none.
    #[must_use]
    pub fn has_configuration(&self, id: &RecordId) -> bool {
        self.lock_state()
            .record(id)
            .is_ok_and(|record| record.configuration().is_some())
    }

    /// Custom configuration of `id`, or the registry default when it has none.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn configuration(&self, id: &RecordId) -> RegistryResult<TransferConfiguration> {
        let state = self.lock_state();
        let record = state.record(id)?;
        Ok(record
            .configuration()
            .cloned()
            .unwrap_or_else(|| state.default_configuration.clone()))
    }

    /// Custom configuration of `id` with unset options filled from the default.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn effective_configuration(&self, id: &RecordId) -> RegistryResult<TransferConfiguration> {
        let state = self.lock_state();
        let record = state.record(id)?;
        Ok(record.configuration().map_or_else(
            || state.default_configuration.clone(),
            |custom| custom.fallback_to(&state.default_configuration),
        ))
    }

    /// Every custom configuration keyed by record id.
    #[must_use]
    pub fn custom_configurations(&self) -> BTreeMap<RecordId, TransferConfiguration> {
        self.lock_state()
            .records
            .iter()
            .filter_map(|record| {
                record
                    .configuration()
                    .map(|configuration| (record.id().clone(), configuration.clone()))
            })
            .collect()
    }

    /// Default configuration applied to records without an override.
    #[must_use]
    pub fn default_configuration(&self) -> TransferConfiguration {
        self.lock_state().default_configuration.clone()
    }

    /// Whether every selected record has a custom configuration or the default
    /// configuration satisfies the policy.
    #[must_use]
    pub fn all_selected_forms_have_configuration(&self) -> bool {
        let state = self.lock_state();
        let default_is_valid = self.inner.policy.is_valid(&state.default_configuration);
        state
            .records
            .iter()
            .filter(|record| record.is_selected())
            .all(|record| record.configuration().is_some() || default_is_valid)
    }

    /// Last successful transfer of `id`.
    #[must_use]
    pub fn last_transfer_timestamp(&self, id: &RecordId) -> Option<DateTime<Utc>> {
        self.lock_state()
            .record(id)
            .ok()
            .and_then(TransferRecord::last_transfer)
    }

    /// Register a listener invoked with `(id, timestamp)` on every success.
    pub fn on_successful_export<F>(&self, listener: F)
    where
        F: Fn(&RecordId, DateTime<Utc>) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Append the status carried by `envelope` to the addressed record.
    ///
    /// Success events also advance the record's last transfer instant and then
    /// notify success listeners in registration order. Listeners receive the
    /// record's last transfer after the advance, which never moves backwards.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotAddressed`] for batch-level events and
    /// [`RegistryError::NotFound`] for unknown records.
    pub fn append_status(&self, envelope: &EventEnvelope) -> RegistryResult<()> {
        let (record_id, message, succeeded) = match &envelope.event {
            Event::Progress { record_id, message } => (record_id, message.clone(), false),
            Event::Succeeded { record_id, message } => (record_id, message.clone(), true),
            Event::Failed { record_id, message } => (record_id, format!("Failed: {message}"), false),
            Event::BatchCompleted { .. } => {
                return Err(RegistryError::NotAddressed {
                    event_kind: envelope.event.kind().as_str(),
                });
            }
        };

        let effective = {
            let mut state = self.lock_state();
            let record = state.record_mut(record_id)?;
            record.push_status(StatusEntry {
                at: envelope.timestamp,
                message,
            });
            if succeeded && !record.advance_last_transfer(envelope.timestamp) {
                warn!(
                    record_id = %record_id,
                    timestamp = %envelope.timestamp,
                    "success event older than last transfer; keeping the newer instant"
                );
            }
            record.last_transfer().unwrap_or(envelope.timestamp)
        };

        if succeeded {
            let listeners = self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for listener in &listeners {
                listener(record_id, effective);
            }
        }
        Ok(())
    }

    /// Subscribe this registry to record-level events on `events`.
    pub fn attach(&self, events: &EventChannel) -> SubscriptionId {
        let registry = self.clone();
        events.subscribe(
            Interest::only(&[EventKind::Progress, EventKind::Success, EventKind::Failure]),
            move |envelope| {
                if let Err(err) = registry.append_status(envelope) {
                    warn!(error = %err, event_id = envelope.id, "status event not applied");
                }
            },
        )
    }

    fn set_all_selected(&self, selected: bool) {
        for record in &mut self.lock_state().records {
            record.set_selected(selected);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parse an ISO-8601 instant; offset-less values are read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::InMemoryPreferences;
    use chrono::{SecondsFormat, TimeZone};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn descriptors(count: usize) -> Vec<FormDescriptor> {
        (0..count)
            .map(|n| {
                FormDescriptor::new(
                    format!("form-{n}"),
                    format!("Form #{n}"),
                    format!("forms/form-{n}.xml"),
                )
            })
            .collect()
    }

    fn registry(count: usize) -> TransferRegistry {
        TransferRegistry::from_descriptors(TransferConfiguration::default(), descriptors(count))
    }

    fn valid_configuration() -> TransferConfiguration {
        TransferConfiguration::with_target_dir("/data/pulls")
    }

    fn id(n: usize) -> RecordId {
        RecordId::new(format!("form-{n}"))
    }

    fn envelope(event: Event, timestamp: DateTime<Utc>) -> EventEnvelope {
        EventEnvelope {
            id: 1,
            timestamp,
            event,
        }
    }

    #[test]
    fn merges_an_incoming_list_of_forms() {
        let registry = TransferRegistry::new(TransferConfiguration::default());
        assert_eq!(registry.size(), 0);

        registry.merge(descriptors(10));

        assert_eq!(registry.size(), 10);
        assert_eq!(registry.get(9).map(|r| r.id().clone()), Ok(id(9)));
    }

    #[test]
    fn merge_keeps_operator_state_and_refreshes_descriptions() {
        let registry = registry(3);
        registry.set_selected(&id(1), true).expect("known record");
        registry
            .put_configuration(&id(1), valid_configuration())
            .expect("known record");

        registry.merge(vec![
            FormDescriptor::new("form-1", "Renamed", "forms/renamed.xml").encrypted(true),
            FormDescriptor::new("form-new", "New", "forms/new.xml"),
        ]);

        let record = registry.get(1).expect("index 1");
        assert_eq!(record.display_name(), "Renamed");
        assert!(record.is_encrypted());
        assert!(record.is_selected());
        assert_eq!(record.configuration(), Some(&valid_configuration()));
        assert_eq!(registry.size(), 4);
        assert_eq!(registry.get(3).expect("index 3").id(), &RecordId::from("form-new"));
    }

    #[test]
    fn positional_access_is_bounded() {
        let registry = registry(2);
        assert_eq!(
            registry.get(2),
            Err(RegistryError::IndexOutOfRange { index: 2, size: 2 })
        );
    }

    #[test]
    fn manages_a_forms_configuration() {
        let registry = registry(2);
        let invalid = TransferConfiguration::default();

        assert!(!registry.has_configuration(&id(0)));
        registry
            .put_configuration(&id(0), valid_configuration())
            .expect("known record");
        assert!(registry.has_configuration(&id(0)));
        assert_eq!(registry.configuration(&id(0)), Ok(valid_configuration()));

        registry
            .put_configuration(&id(1), invalid.clone())
            .expect("known record");
        let custom = registry.custom_configurations();
        assert_eq!(custom.len(), 2);
        assert_eq!(custom.get(&id(1)), Some(&invalid));

        let removed = registry.remove_configuration(&id(0)).expect("known record");
        assert_eq!(removed, Some(valid_configuration()));
        assert!(!registry.has_configuration(&id(0)));
    }

    #[test]
    fn configuration_falls_back_to_default_for_known_records() {
        let default = TransferConfiguration::with_target_dir("/workspace");
        let registry = TransferRegistry::from_descriptors(default.clone(), descriptors(1));

        assert_eq!(registry.configuration(&id(0)), Ok(default));
        assert_eq!(
            registry.configuration(&RecordId::from("missing")),
            Err(RegistryError::NotFound {
                record_id: RecordId::from("missing")
            })
        );
    }

    #[test]
    fn effective_configuration_merges_override_with_default() {
        let default = TransferConfiguration::with_target_dir("/workspace");
        let registry = TransferRegistry::from_descriptors(default, descriptors(1));
        registry
            .put_configuration(
                &id(0),
                TransferConfiguration {
                    include_media: Some(false),
                    ..TransferConfiguration::default()
                },
            )
            .expect("known record");

        let effective = registry.effective_configuration(&id(0)).expect("known");
        assert_eq!(effective.target_dir, Some(PathBuf::from("/workspace")));
        assert_eq!(effective.include_media, Some(false));
    }

    #[test]
    fn manages_forms_selection() {
        let registry = registry(10);
        assert!(registry.selected_forms().is_empty());
        assert!(!registry.all_selected());
        assert!(registry.none_selected());
        assert!(!registry.some_selected());

        registry.set_selected(&id(0), true).expect("known record");
        assert_eq!(registry.selected_forms().len(), 1);
        assert!(!registry.all_selected());
        assert!(!registry.none_selected());
        assert!(registry.some_selected());

        registry.select_all();
        assert_eq!(registry.selected_forms().len(), 10);
        assert!(registry.all_selected());
        assert!(registry.some_selected());

        registry.clear_all();
        assert!(registry.selected_forms().is_empty());
        assert!(!registry.all_selected());
        assert!(registry.none_selected());
        assert!(registry.records().iter().all(|r| !r.is_selected()));
    }

    #[test]
    fn empty_registry_selection_predicates() {
        let registry = registry(0);
        assert!(registry.none_selected());
        assert!(!registry.some_selected());
        assert!(!registry.all_selected());
    }

    #[test]
    fn selected_forms_keep_registry_order() {
        let registry = registry(5);
        registry.set_selected(&id(3), true).expect("known");
        registry.set_selected(&id(1), true).expect("known");

        let ids: Vec<_> = registry
            .selected_forms()
            .iter()
            .map(|r| r.id().clone())
            .collect();
        assert_eq!(ids, vec![id(1), id(3)]);
    }

    #[test]
    fn knows_if_all_selected_forms_have_a_valid_configuration() {
        let registry = registry(10);
        registry.set_selected(&id(0), true).expect("known record");
        assert!(!registry.all_selected_forms_have_configuration());

        registry
            .put_configuration(&id(0), valid_configuration())
            .expect("known record");
        assert!(registry.all_selected_forms_have_configuration());
    }

    #[test]
    fn valid_default_covers_selected_forms_without_override() {
        let registry = TransferRegistry::from_descriptors(valid_configuration(), descriptors(3));
        registry.select_all();
        assert!(registry.all_selected_forms_have_configuration());
    }

    #[test]
    fn appends_status_history_on_forms() {
        let registry = registry(10);
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        registry
            .append_status(&envelope(
                Event::progress(id(0), "Pulled 33% of the submissions"),
                at,
            ))
            .expect("known record");

        let record = registry.get(0).expect("index 0");
        assert_eq!(record.status_history().len(), 1);
        assert!(
            record
                .status_history_text()
                .contains("Pulled 33% of the submissions")
        );
        assert!(record.last_transfer().is_none());
    }

    #[test]
    fn failure_entries_are_marked() {
        let registry = registry(1);
        registry
            .append_status(&envelope(
                Event::Failed {
                    record_id: id(0),
                    message: "server unreachable".into(),
                },
                Utc::now(),
            ))
            .expect("known record");

        let record = registry.get(0).expect("index 0");
        assert_eq!(record.status_history()[0].message, "Failed: server unreachable");
        assert!(record.last_transfer().is_none());
    }

    #[test]
    fn success_sets_last_transfer_and_notifies_listeners_once() {
        let registry = registry(10);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let count = Arc::clone(&count);
            let target = id(0);
            registry.on_successful_export(move |record_id, _| {
                if *record_id == target {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        {
            let seen = Arc::clone(&seen);
            registry.on_successful_export(move |record_id, at| {
                seen.lock().expect("seen").push((record_id.clone(), at));
            });
        }
        assert!(registry.last_transfer_timestamp(&id(0)).is_none());

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        registry
            .append_status(&envelope(
                Event::Succeeded {
                    record_id: id(0),
                    message: "Success".into(),
                },
                at,
            ))
            .expect("known record");

        assert_eq!(registry.last_transfer_timestamp(&id(0)), Some(at));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().expect("seen"), vec![(id(0), at)]);
    }

    #[test]
    fn listeners_run_in_registration_order_and_may_reenter() {
        let registry = registry(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["persist", "notify"] {
            let order = Arc::clone(&order);
            let reentrant = registry.clone();
            registry.on_successful_export(move |record_id, _| {
                let _ = reentrant.find(record_id);
                order.lock().expect("order").push(label);
            });
        }

        registry
            .append_status(&envelope(
                Event::Succeeded {
                    record_id: id(0),
                    message: "Success".into(),
                },
                Utc::now(),
            ))
            .expect("known record");

        assert_eq!(*order.lock().expect("order"), vec!["persist", "notify"]);
    }

    #[test]
    fn older_success_does_not_rewind_last_transfer() {
        let registry = registry(1);
        let newer = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        let older = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        for at in [newer, older] {
            registry
                .append_status(&envelope(
                    Event::Succeeded {
                        record_id: id(0),
                        message: "Success".into(),
                    },
                    at,
                ))
                .expect("known record");
        }

        assert_eq!(registry.last_transfer_timestamp(&id(0)), Some(newer));
        assert_eq!(registry.get(0).expect("index 0").status_history().len(), 2);
    }

    #[test]
    fn listeners_see_the_newer_instant_after_an_older_success() {
        let registry = registry(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            registry.on_successful_export(move |_, at| {
                seen.lock().expect("seen").push(at);
            });
        }
        let newer = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        let older = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        for at in [newer, older] {
            registry
                .append_status(&envelope(
                    Event::Succeeded {
                        record_id: id(0),
                        message: "Success".into(),
                    },
                    at,
                ))
                .expect("known record");
        }

        assert_eq!(*seen.lock().expect("seen"), vec![newer, newer]);
    }

    #[test]
    fn unknown_and_unaddressed_events_are_rejected() {
        let registry = registry(1);
        let missing = registry.append_status(&envelope(
            Event::progress(RecordId::from("nope"), "x"),
            Utc::now(),
        ));
        assert!(matches!(missing, Err(RegistryError::NotFound { .. })));

        let batch = registry.append_status(&envelope(
            Event::BatchCompleted {
                batch_id: uuid::Uuid::nil(),
                succeeded: 0,
                failed: 0,
                cancelled: 0,
                skipped: 0,
            },
            Utc::now(),
        ));
        assert!(matches!(batch, Err(RegistryError::NotAddressed { .. })));
    }

    #[test]
    fn attached_registry_consumes_channel_events() {
        let registry = registry(2);
        let events = EventChannel::new();
        let _ = registry.attach(&events);

        let _ = events.publish(Event::progress(id(1), "Pulled 1 of 2 submissions"));
        let _ = events.publish(Event::Succeeded {
            record_id: id(1),
            message: "Success".into(),
        });

        let record = registry.get(1).expect("index 1");
        assert_eq!(record.status_history().len(), 2);
        assert!(record.last_transfer().is_some());
    }

    #[test]
    fn factory_restores_saved_preferences() -> crate::PreferenceResult<()> {
        let store = InMemoryPreferences::empty();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let form = id(0);
        store.put_all(&valid_configuration().as_map(&custom_conf_prefix(&form)))?;
        store.put(
            &transfer_date_time_key(&form),
            &at.to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;

        let registry =
            TransferRegistry::load(TransferConfiguration::default(), descriptors(10), &store);

        assert_eq!(registry.size(), 10);
        assert!(registry.has_configuration(&form));
        assert_eq!(registry.configuration(&form), Ok(valid_configuration()));
        assert_eq!(registry.last_transfer_timestamp(&form), Some(at));
        assert!(!registry.has_configuration(&id(1)));
        assert!(registry.last_transfer_timestamp(&id(1)).is_none());
        Ok(())
    }

    #[test]
    fn offset_less_timestamps_are_read_as_utc() {
        let parsed = parse_timestamp("2024-05-01T09:00:00.123");
        assert_eq!(
            parsed.map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Some("2024-05-01T09:00:00.123Z".to_string())
        );
        assert!(parse_timestamp("yesterday").is_none());
    }
}
