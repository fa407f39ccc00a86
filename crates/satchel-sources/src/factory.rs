//! Builds the adapter matching a [`SourceKind`].

use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use satchel_core::{FormServerClient, PreferenceStore, SourceAdapter, SourceKind};

use crate::collect::CollectDirSource;
use crate::error::{SourcesError, SourcesResult};
use crate::remote::RemoteSource;

/// Produces a protocol client for a remote source kind, or `None` when the
/// kind is not served.
pub type ClientFactory =
    Arc<dyn Fn(&SourceKind) -> Option<Arc<dyn FormServerClient>> + Send + Sync>;

/// Maps source kinds to adapters.
#[derive(Clone)]
pub struct SourceFactory {
    workspace: PathBuf,
    clients: Option<ClientFactory>,
    cursors: Option<Arc<dyn PreferenceStore>>,
}

impl Debug for SourceFactory {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SourceFactory")
            .field("workspace", &self.workspace)
            .field("remote", &self.clients.is_some())
            .finish_non_exhaustive()
    }
}

impl SourceFactory {
    /// Factory for a session pulling into `workspace`. Only Collect
    /// directories are supported until a client factory is added.
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            clients: None,
            cursors: None,
        }
    }

    /// Serve remote kinds with clients from `clients`.
    #[must_use]
    pub fn with_client_factory(mut self, clients: ClientFactory) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Store remote pull cursors in `store`.
    #[must_use]
    pub fn with_cursor_store(mut self, store: Arc<dyn PreferenceStore>) -> Self {
        self.cursors = Some(store);
        self
    }

    /// Adapter for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError::NoClient`] for remote kinds without a client and
    /// propagates adapter construction failures.
    pub fn build(&self, kind: SourceKind) -> SourcesResult<Arc<dyn SourceAdapter>> {
        if let SourceKind::FilesystemDirectory { path } = &kind {
            return Ok(Arc::new(CollectDirSource::new(path.clone(), self.workspace.clone())?));
        }
        let client = self
            .clients
            .as_ref()
            .and_then(|clients| clients(&kind))
            .ok_or(SourcesError::NoClient { kind: kind.tag() })?;
        let mut source = RemoteSource::new(kind, client)?;
        if let Some(store) = &self.cursors {
            source = source.with_cursor_store(Arc::clone(store));
        }
        Ok(Arc::new(source))
    }
}
