//! Scripted pull operations and an in-memory form server.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use satchel_core::{
    FormDescriptor, FormServerClient, PullOperation, PullSummary, ServerEndpoint, SourceAdapter,
    SourceKind, TransferConfiguration, TransferRecord, UnitContext, UnitError,
};
use satchel_events::RecordId;

/// Behaviour of a [`ScriptedPull`].
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed immediately.
    Succeed {
        /// Submissions reported as pulled.
        submissions: usize,
    },
    /// Fail with the given reason.
    Fail(String),
    /// Panic with the given message.
    Panic(String),
    /// Sleep, then succeed.
    Delayed {
        /// Time spent before succeeding.
        delay: Duration,
        /// Submissions reported as pulled.
        submissions: usize,
    },
    /// Publish progress for each step, checking for cancellation between steps.
    Steps {
        /// Number of steps.
        steps: usize,
        /// Time spent per step.
        delay: Duration,
    },
    /// Spin on checkpoints until the batch is cancelled.
    UntilCancelled,
}

#[derive(Debug, Default)]
struct TrackerState {
    started: Mutex<Vec<RecordId>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

/// Observes which scripted units started and how many ran at once.
#[derive(Debug, Clone, Default)]
pub struct PullTracker {
    state: Arc<TrackerState>,
}

impl PullTracker {
    /// Fresh tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of units that started, in start order.
    #[must_use]
    pub fn started(&self) -> Vec<RecordId> {
        self.state
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest number of units observed running concurrently.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    fn enter(&self, record_id: &RecordId) -> RunningGuard {
        self.state
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record_id.clone());
        let running = self.state.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(running, Ordering::SeqCst);
        RunningGuard {
            state: Arc::clone(&self.state),
        }
    }
}

struct RunningGuard {
    state: Arc<TrackerState>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.state.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Pull operation whose outcome is fixed up front.
#[derive(Debug, Clone)]
pub struct ScriptedPull {
    record_id: RecordId,
    script: Script,
    tracker: PullTracker,
}

impl ScriptedPull {
    /// Unit for `record_id` following `script`.
    #[must_use]
    pub fn new(record_id: RecordId, script: Script) -> Self {
        Self {
            record_id,
            script,
            tracker: PullTracker::default(),
        }
    }

    /// Report starts to `tracker`.
    #[must_use]
    pub fn with_tracker(mut self, tracker: &PullTracker) -> Self {
        self.tracker = tracker.clone();
        self
    }

    /// Shared trait object, ready for the orchestrator.
    #[must_use]
    pub fn shared(self) -> Arc<dyn PullOperation> {
        Arc::new(self)
    }
}

/// One scripted unit per id, all reporting to `tracker`.
#[must_use]
pub fn scripted_batch<F>(ids: &[RecordId], tracker: &PullTracker, script: F) -> Vec<Arc<dyn PullOperation>>
where
    F: Fn(usize) -> Script,
{
    ids.iter()
        .enumerate()
        .map(|(index, id)| {
            ScriptedPull::new(id.clone(), script(index))
                .with_tracker(tracker)
                .shared()
        })
        .collect()
}

#[async_trait]
impl PullOperation for ScriptedPull {
    fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    async fn run(&self, ctx: &UnitContext) -> Result<PullSummary, UnitError> {
        let _running = self.tracker.enter(&self.record_id);
        match &self.script {
            Script::Succeed { submissions } => Ok(PullSummary::pulled(*submissions, *submissions)),
            Script::Fail(reason) => Err(UnitError::failed("scripted.pull", reason.clone())),
            Script::Panic(message) => panic!("{message}"),
            Script::Delayed { delay, submissions } => {
                tokio::time::sleep(*delay).await;
                Ok(PullSummary::pulled(*submissions, *submissions))
            }
            Script::Steps { steps, delay } => {
                for step in 1..=*steps {
                    ctx.checkpoint()?;
                    tokio::time::sleep(*delay).await;
                    let _ = ctx.progress(format!("Pulled {step} of {steps} submissions"));
                }
                Ok(PullSummary::pulled(*steps, *steps))
            }
            Script::UntilCancelled => loop {
                ctx.checkpoint()?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            },
        }
    }
}

/// Source adapter serving fixed forms whose pulls follow a script.
#[derive(Debug)]
pub struct ScriptedSource {
    kind: SourceKind,
    forms: Vec<FormDescriptor>,
    script: Script,
    valid: bool,
    reloadable: bool,
    tracker: PullTracker,
}

impl ScriptedSource {
    /// Valid, reloadable source listing `forms`; every pull follows `script`.
    #[must_use]
    pub fn new(forms: Vec<FormDescriptor>, script: Script) -> Self {
        Self {
            kind: SourceKind::RemoteServer {
                endpoint: ServerEndpoint::new("https://scripted.example.org"),
            },
            forms,
            script,
            valid: true,
            reloadable: true,
            tracker: PullTracker::default(),
        }
    }

    /// Fail validation.
    #[must_use]
    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Report unit starts to `tracker`.
    #[must_use]
    pub fn with_tracker(mut self, tracker: &PullTracker) -> Self {
        self.tracker = tracker.clone();
        self
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn kind(&self) -> &SourceKind {
        &self.kind
    }

    async fn validate(&self) -> bool {
        self.valid
    }

    async fn enumerate(&self) -> Result<Vec<FormDescriptor>> {
        Ok(self.forms.clone())
    }

    fn build_pull_operation(
        &self,
        record: &TransferRecord,
        _configuration: &TransferConfiguration,
    ) -> Arc<dyn PullOperation> {
        ScriptedPull::new(record.id().clone(), self.script.clone())
            .with_tracker(&self.tracker)
            .shared()
    }

    fn describe(&self) -> String {
        "scripted source".to_string()
    }

    fn can_be_reloaded(&self) -> bool {
        self.reloadable
    }
}

/// In-memory form server. Downloads write small placeholder files so callers
/// can assert on the resulting tree.
#[derive(Debug)]
pub struct FakeFormServer {
    reachable: bool,
    forms: Vec<FormDescriptor>,
    submissions: BTreeMap<RecordId, Vec<String>>,
    failing: HashSet<String>,
    downloaded: Mutex<Vec<(RecordId, String)>>,
    cursors_seen: Mutex<Vec<Option<String>>>,
}

impl Default for FakeFormServer {
    fn default() -> Self {
        Self {
            reachable: true,
            forms: Vec::new(),
            submissions: BTreeMap::new(),
            failing: HashSet::new(),
            downloaded: Mutex::new(Vec::new()),
            cursors_seen: Mutex::new(Vec::new()),
        }
    }
}

impl FakeFormServer {
    /// Reachable server without forms.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Server that never answers.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::default()
        }
    }

    /// Publish `form` with the given submission ids, oldest first.
    #[must_use]
    pub fn with_form(mut self, form: FormDescriptor, instances: &[&str]) -> Self {
        self.submissions.insert(
            form.id.clone(),
            instances.iter().map(ToString::to_string).collect(),
        );
        self.forms.push(form);
        self
    }

    /// Make downloading `instance_id` fail.
    #[must_use]
    pub fn failing_submission(mut self, instance_id: &str) -> Self {
        self.failing.insert(instance_id.to_string());
        self
    }

    /// Submissions downloaded so far.
    #[must_use]
    pub fn downloaded(&self) -> Vec<(RecordId, String)> {
        self.downloaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `after` cursors passed to `list_submissions`, in call order.
    #[must_use]
    pub fn cursors_seen(&self) -> Vec<Option<String>> {
        self.cursors_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl FormServerClient for FakeFormServer {
    async fn is_reachable(&self) -> bool {
        self.reachable
    }

    async fn list_forms(&self) -> Result<Vec<FormDescriptor>> {
        if !self.reachable {
            return Err(anyhow!("server unreachable"));
        }
        Ok(self.forms.clone())
    }

    async fn download_form(
        &self,
        form: &FormDescriptor,
        target_dir: &Path,
        include_media: bool,
    ) -> Result<()> {
        fs::create_dir_all(target_dir)?;
        fs::write(target_dir.join(format!("{}.xml", form.id)), "<h:html/>")?;
        if include_media {
            fs::create_dir_all(target_dir.join(format!("{}-media", form.id)))?;
        }
        Ok(())
    }

    async fn list_submissions(&self, form_id: &RecordId, after: Option<&str>) -> Result<Vec<String>> {
        self.cursors_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(after.map(ToString::to_string));
        let all = self
            .submissions
            .get(form_id)
            .ok_or_else(|| anyhow!("unknown form {form_id}"))?;
        let start = after
            .and_then(|cursor| all.iter().position(|id| id == cursor))
            .map_or(0, |position| position + 1);
        Ok(all[start..].to_vec())
    }

    async fn download_submission(
        &self,
        form_id: &RecordId,
        instance_id: &str,
        target_dir: &Path,
    ) -> Result<()> {
        if self.failing.contains(instance_id) {
            return Err(anyhow!("submission {instance_id} is corrupt"));
        }
        let dir = target_dir.join(instance_id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("submission.xml"), format!("<data id=\"{form_id}\"/>"))?;
        self.downloaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((form_id.clone(), instance_id.to_string()));
        Ok(())
    }
}
