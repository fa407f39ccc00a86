//! Remote form servers reached through an injected [`FormServerClient`].

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use satchel_core::{
    FormDescriptor, FormServerClient, PreferenceResult, PreferenceStore, PullOperation,
    PullSummary, ServerEndpoint, SourceAdapter, SourceKind, TransferConfiguration, TransferRecord,
    UnitContext, UnitError, remembered_source_prefix,
};
use satchel_events::RecordId;
use tracing::{debug, warn};

use crate::error::{SourcesError, SourcesResult};
use crate::layout::{form_dir, instances_dir, is_single_component};

const CURSOR_KEY_ROOT: &str = "pullCursor";

/// Key holding the last submission pulled for `record_id`.
#[must_use]
pub fn cursor_key(record_id: &RecordId) -> String {
    format!("{CURSOR_KEY_ROOT}.{record_id}")
}

/// Remote, aggregate, or central server source.
pub struct RemoteSource {
    kind: SourceKind,
    client: Arc<dyn FormServerClient>,
    cursors: Option<Arc<dyn PreferenceStore>>,
}

impl RemoteSource {
    /// Adapter for a remote `kind` talking through `client`.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError::UnsupportedKind`] for filesystem kinds.
    pub fn new(kind: SourceKind, client: Arc<dyn FormServerClient>) -> SourcesResult<Self> {
        if kind.endpoint().is_none() {
            return Err(SourcesError::UnsupportedKind { kind: kind.tag() });
        }
        Ok(Self {
            kind,
            client,
            cursors: None,
        })
    }

    /// Track and resume from per-form submission cursors in `store`.
    #[must_use]
    pub fn with_cursor_store(mut self, store: Arc<dyn PreferenceStore>) -> Self {
        self.cursors = Some(store);
        self
    }

    /// Server location.
    #[must_use]
    pub fn endpoint(&self) -> Option<&ServerEndpoint> {
        self.kind.endpoint()
    }

    fn url(&self) -> &str {
        self.kind.endpoint().map_or("", |endpoint| endpoint.url.as_str())
    }
}

fn is_http_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    ["http://", "https://"]
        .iter()
        .any(|scheme| lower.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty()))
}

#[async_trait]
impl SourceAdapter for RemoteSource {
    fn kind(&self) -> &SourceKind {
        &self.kind
    }

    async fn validate(&self) -> bool {
        if !is_http_url(self.url()) {
            debug!(url = %self.url(), "rejecting non-http server url");
            return false;
        }
        self.client.is_reachable().await
    }

    async fn enumerate(&self) -> Result<Vec<FormDescriptor>> {
        self.client
            .list_forms()
            .await
            .with_context(|| format!("failed to list forms at {}", self.url()))
    }

    fn build_pull_operation(
        &self,
        record: &TransferRecord,
        configuration: &TransferConfiguration,
    ) -> Arc<dyn PullOperation> {
        Arc::new(RemotePullOperation {
            form: record.descriptor().clone(),
            configuration: configuration.clone(),
            client: Arc::clone(&self.client),
            cursors: self.cursors.clone(),
        })
    }

    fn describe(&self) -> String {
        self.url().to_string()
    }

    fn can_be_reloaded(&self) -> bool {
        true
    }

    fn remember_for_record(
        &self,
        store: &dyn PreferenceStore,
        store_passwords: bool,
        record_id: &RecordId,
    ) -> PreferenceResult<()> {
        self.kind
            .store_in(store, &remembered_source_prefix(record_id), store_passwords)
    }
}

struct RemotePullOperation {
    form: FormDescriptor,
    configuration: TransferConfiguration,
    client: Arc<dyn FormServerClient>,
    cursors: Option<Arc<dyn PreferenceStore>>,
}

impl RemotePullOperation {
    fn resume_after(&self) -> Option<String> {
        if !self.configuration.start_from_last_or_default() {
            return None;
        }
        self.cursors
            .as_ref()
            .and_then(|store| store.get(&cursor_key(&self.form.id)))
    }

    fn advance_cursor(&self, instance_id: &str) {
        let Some(store) = &self.cursors else {
            return;
        };
        if let Err(err) = store.put(&cursor_key(&self.form.id), instance_id) {
            warn!(record_id = %self.form.id, error = %err, "failed to store pull cursor");
        }
    }
}

#[async_trait]
impl PullOperation for RemotePullOperation {
    fn record_id(&self) -> &RecordId {
        &self.form.id
    }

    async fn run(&self, ctx: &UnitContext) -> Result<PullSummary, UnitError> {
        let target_dir = self
            .configuration
            .target_dir
            .clone()
            .ok_or_else(|| UnitError::failed("remote.target_dir", "no target directory configured"))?;
        let destination = form_dir(&target_dir, &self.form.display_name);
        let overwrite = self.configuration.overwrite_existing_or_default();

        ctx.checkpoint()?;
        self.client
            .download_form(
                &self.form,
                &destination,
                self.configuration.include_media_or_default(),
            )
            .await
            .map_err(|err| UnitError::failed("remote.download_form", err))?;

        let after = self.resume_after();
        let instances = self
            .client
            .list_submissions(&self.form.id, after.as_deref())
            .await
            .map_err(|err| UnitError::failed("remote.list_submissions", err))?;
        if let Some(unsafe_id) = instances.iter().find(|id| !is_single_component(id)) {
            warn!(
                record_id = %self.form.id,
                instance_id = %unsafe_id,
                "server sent an unusable instance id"
            );
            return Err(UnitError::failed(
                "remote.instance_id",
                format!("instance id `{unsafe_id}` is not a single path component"),
            ));
        }
        let total = instances.len();
        let _ = ctx.progress(format!("Found {total} submissions"));

        let target_instances = instances_dir(&destination);
        let mut pulled = 0;
        for (index, instance_id) in instances.iter().enumerate() {
            ctx.checkpoint()?;
            if overwrite || !target_instances.join(instance_id).exists() {
                self.client
                    .download_submission(&self.form.id, instance_id, &target_instances)
                    .await
                    .map_err(|err| UnitError::failed("remote.download_submission", err))?;
                pulled += 1;
            }
            self.advance_cursor(instance_id);
            let _ = ctx.progress(format!("Pulled {} of {total} submissions", index + 1));
        }

        Ok(PullSummary::pulled(pulled, total))
    }
}
