//! Collect storage directory as a source of forms.
//!
//! # Design
//! - Filesystem work runs on the blocking pool; the async side only sequences
//!   steps and checks for cancellation between submissions.
//! - A Collect directory is a one-shot source: it is never reloaded and never
//!   remembered per form.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use satchel_core::{
    FormDescriptor, PullOperation, PullSummary, SourceAdapter, SourceKind, TransferConfiguration,
    TransferRecord, UnitContext, UnitError,
};
use satchel_events::RecordId;
use tracing::{debug, warn};

use crate::error::SourcesResult;
use crate::layout::{copy_tree, form_dir, instances_dir};
use crate::scan::FormScanner;

const FORMS_DIR: &str = "forms";
const INSTANCES_DIR: &str = "instances";
const MEDIA_SUFFIX: &str = "-media";

/// Forms stored in a Collect storage directory.
#[derive(Debug)]
pub struct CollectDirSource {
    kind: SourceKind,
    root: PathBuf,
    workspace: PathBuf,
    scanner: Arc<FormScanner>,
}

impl CollectDirSource {
    /// Adapter for the Collect directory at `root`. `workspace` is the
    /// directory forms are pulled into; a root inside it is never valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the scanning patterns fail to compile.
    pub fn new(root: impl Into<PathBuf>, workspace: impl Into<PathBuf>) -> SourcesResult<Self> {
        let root = root.into();
        Ok(Self {
            kind: SourceKind::FilesystemDirectory { path: root.clone() },
            root,
            workspace: workspace.into(),
            scanner: Arc::new(FormScanner::new()?),
        })
    }

    /// Collect directory root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `root` exists, is a directory outside `workspace`, and holds a
    /// `forms` directory.
    #[must_use]
    pub fn is_valid_location(root: &Path, workspace: &Path) -> bool {
        root.is_dir() && !is_within(root, workspace) && root.join(FORMS_DIR).is_dir()
    }

    /// Scan `forms/*.xml` synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the forms directory cannot be listed.
    pub fn scan(&self) -> Result<Vec<FormDescriptor>> {
        scan_forms(&self.root, &self.scanner)
    }
}

fn is_within(path: &Path, ancestor: &Path) -> bool {
    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let ancestor = fs::canonicalize(ancestor).unwrap_or_else(|_| ancestor.to_path_buf());
    path.starts_with(ancestor)
}

fn scan_forms(root: &Path, scanner: &FormScanner) -> Result<Vec<FormDescriptor>> {
    let forms_dir = root.join(FORMS_DIR);
    let mut paths = fs::read_dir(&forms_dir)
        .with_context(|| format!("failed to list {}", forms_dir.display()))?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "xml"))
        .collect::<Vec<_>>();
    paths.sort();

    let mut forms = Vec::with_capacity(paths.len());
    for path in paths {
        let xml = match fs::read_to_string(&path) {
            Ok(xml) => xml,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable form definition");
                continue;
            }
        };
        let Some(definition) = scanner.read_form(&xml) else {
            warn!(path = %path.display(), "skipping file without a primary instance id");
            continue;
        };
        let display_name = definition.title.unwrap_or_else(|| file_stem(&path));
        forms.push(
            FormDescriptor::new(definition.id, display_name, path).encrypted(definition.encrypted),
        );
    }
    debug!(root = %root.display(), forms = forms.len(), "collect directory scanned");
    Ok(forms)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl SourceAdapter for CollectDirSource {
    fn kind(&self) -> &SourceKind {
        &self.kind
    }

    async fn validate(&self) -> bool {
        let root = self.root.clone();
        let workspace = self.workspace.clone();
        tokio::task::spawn_blocking(move || Self::is_valid_location(&root, &workspace))
            .await
            .unwrap_or(false)
    }

    async fn enumerate(&self) -> Result<Vec<FormDescriptor>> {
        let root = self.root.clone();
        let scanner = Arc::clone(&self.scanner);
        tokio::task::spawn_blocking(move || scan_forms(&root, &scanner))
            .await
            .context("collect directory scan aborted")?
    }

    fn build_pull_operation(
        &self,
        record: &TransferRecord,
        configuration: &TransferConfiguration,
    ) -> Arc<dyn PullOperation> {
        Arc::new(CollectPullOperation {
            record_id: record.id().clone(),
            display_name: record.display_name().to_string(),
            form_file: record.file_path().to_path_buf(),
            root: self.root.clone(),
            configuration: configuration.clone(),
            scanner: Arc::clone(&self.scanner),
        })
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn can_be_reloaded(&self) -> bool {
        false
    }
}

/// Copies one form and its submissions out of a Collect directory.
struct CollectPullOperation {
    record_id: RecordId,
    display_name: String,
    form_file: PathBuf,
    root: PathBuf,
    configuration: TransferConfiguration,
    scanner: Arc<FormScanner>,
}

#[async_trait]
impl PullOperation for CollectPullOperation {
    fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    async fn run(&self, ctx: &UnitContext) -> Result<PullSummary, UnitError> {
        let target_dir = self
            .configuration
            .target_dir
            .clone()
            .ok_or_else(|| UnitError::failed("collect.target_dir", "no target directory configured"))?;
        let destination = form_dir(&target_dir, &self.display_name);
        let include_media = self.configuration.include_media_or_default();
        let overwrite = self.configuration.overwrite_existing_or_default();

        ctx.checkpoint()?;
        {
            let form_file = self.form_file.clone();
            let destination = destination.clone();
            run_blocking("collect.install_form", move || {
                install_form(&form_file, &destination, include_media)
            })
            .await?;
        }

        let instances = {
            let root = self.root.clone();
            let scanner = Arc::clone(&self.scanner);
            let form_id = self.record_id.clone();
            run_blocking("collect.scan_instances", move || {
                instances_of(&root, &scanner, &form_id)
            })
            .await?
        };
        let total = instances.len();
        let _ = ctx.progress(format!("Found {total} submissions"));

        let target_instances = instances_dir(&destination);
        let mut pulled = 0;
        for (index, instance) in instances.into_iter().enumerate() {
            ctx.checkpoint()?;
            let target_instances = target_instances.clone();
            let copied = run_blocking("collect.copy_instance", move || {
                copy_instance(&instance, &target_instances, overwrite)
            })
            .await?;
            if copied {
                pulled += 1;
            }
            let _ = ctx.progress(format!("Pulled {} of {total} submissions", index + 1));
        }

        Ok(PullSummary::pulled(pulled, total))
    }
}

async fn run_blocking<T, F>(operation: &'static str, work: F) -> Result<T, UnitError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(|err| UnitError::failed(operation, err)),
        Err(err) => Err(UnitError::failed(operation, err)),
    }
}

fn install_form(form_file: &Path, destination: &Path, include_media: bool) -> Result<()> {
    let file_name = form_file
        .file_name()
        .with_context(|| format!("form path {} has no file name", form_file.display()))?;
    copy_tree(form_file, &destination.join(file_name))?;

    if include_media {
        let media_name = format!("{}{MEDIA_SUFFIX}", file_stem(form_file));
        let media = form_file.with_file_name(&media_name);
        if media.is_dir() {
            copy_tree(&media, &destination.join(media_name))?;
        }
    }
    Ok(())
}

/// Submission directories under `instances/` whose root element names `form_id`.
fn instances_of(root: &Path, scanner: &FormScanner, form_id: &RecordId) -> Result<Vec<PathBuf>> {
    let instances_root = root.join(INSTANCES_DIR);
    if !instances_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = fs::read_dir(&instances_root)
        .with_context(|| format!("failed to list {}", instances_root.display()))?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    dirs.sort();

    let mut matching = Vec::new();
    for dir in dirs {
        let Some(submission) = submission_file(&dir) else {
            continue;
        };
        let xml = fs::read_to_string(&submission)
            .with_context(|| format!("failed to read {}", submission.display()))?;
        if scanner.submission_form_id(&xml).as_deref() == Some(form_id.as_str()) {
            matching.push(dir);
        }
    }
    Ok(matching)
}

/// `<dir>/<dir name>.xml`, or the first XML file in `dir`.
fn submission_file(dir: &Path) -> Option<PathBuf> {
    let named = dir.join(format!("{}.xml", dir.file_name()?.to_string_lossy()));
    if named.is_file() {
        return Some(named);
    }
    let mut candidates = fs::read_dir(dir)
        .ok()?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "xml"))
        .collect::<Vec<_>>();
    candidates.sort();
    candidates.into_iter().next()
}

/// Copy one submission directory; returns whether anything was written.
fn copy_instance(instance: &Path, target_instances: &Path, overwrite: bool) -> Result<bool> {
    let name = instance
        .file_name()
        .with_context(|| format!("instance path {} has no name", instance.display()))?;
    let destination = target_instances.join(name);
    if destination.exists() {
        if !overwrite {
            debug!(instance = %destination.display(), "submission already pulled");
            return Ok(false);
        }
        fs::remove_dir_all(&destination)
            .with_context(|| format!("failed to replace {}", destination.display()))?;
    }
    copy_tree(instance, &destination)?;
    Ok(true)
}
