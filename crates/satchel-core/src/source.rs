//! Source kinds and the capability contracts the pull engine consumes.

use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use satchel_events::RecordId;
use serde::{Deserialize, Serialize};

use crate::configuration::TransferConfiguration;
use crate::error::PreferenceResult;
use crate::model::{FormDescriptor, TransferRecord};
use crate::prefs::PreferenceStore;
use crate::unit::PullOperation;

/// Root of every preference key written for sources.
const SOURCE_KEY_ROOT: &str = "pull.source.";

/// Prefix of the currently selected source.
pub const SELECTED_SOURCE_PREFIX: &str = "pull.source.selected.";

const KEY_TYPE: &str = "type";
const KEY_PATH: &str = "path";
const KEY_URL: &str = "url";
const KEY_USERNAME: &str = "username";
const KEY_PASSWORD: &str = "password";
const KEY_PROJECT_ID: &str = "project_id";
const ALL_KEYS: [&str; 6] = [
    KEY_TYPE,
    KEY_PATH,
    KEY_URL,
    KEY_USERNAME,
    KEY_PASSWORD,
    KEY_PROJECT_ID,
];

/// Prefix under which the source a record was last pulled from is remembered.
#[must_use]
pub fn remembered_source_prefix(record_id: &RecordId) -> String {
    format!("{SOURCE_KEY_ROOT}form.{record_id}.")
}

/// Whether `key` belongs to stored source details (selected or remembered).
#[must_use]
pub fn is_source_pref_key(key: &str) -> bool {
    key.starts_with(SOURCE_KEY_ROOT)
}

/// Username and optional password for a remote server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account password, when known.
    pub password: Option<String>,
}

impl Debug for Credentials {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Location of a remote form server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// Base URL.
    pub url: String,
    /// Optional credentials.
    pub credentials: Option<Credentials>,
}

impl ServerEndpoint {
    /// Anonymous endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
        }
    }

    /// Attach credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password,
        });
        self
    }
}

/// Origin from which records are discovered and pulled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// A device's form storage directory.
    FilesystemDirectory {
        /// Directory containing a `forms` subdirectory.
        path: PathBuf,
    },
    /// A generic remote form server.
    RemoteServer {
        /// Server location.
        endpoint: ServerEndpoint,
    },
    /// An aggregation server.
    AggregateServer {
        /// Server location.
        endpoint: ServerEndpoint,
    },
    /// A central server project.
    CentralServer {
        /// Server location.
        endpoint: ServerEndpoint,
        /// Project forms are pulled from.
        project_id: u64,
    },
}

impl SourceKind {
    /// Machine-friendly label used in preference keys.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::FilesystemDirectory { .. } => "filesystem_directory",
            Self::RemoteServer { .. } => "remote_server",
            Self::AggregateServer { .. } => "aggregate_server",
            Self::CentralServer { .. } => "central_server",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::FilesystemDirectory { .. } => "Collect directory",
            Self::RemoteServer { .. } => "Remote server",
            Self::AggregateServer { .. } => "Aggregate server",
            Self::CentralServer { .. } => "Central server",
        }
    }

    /// Server endpoint for remote kinds.
    #[must_use]
    pub const fn endpoint(&self) -> Option<&ServerEndpoint> {
        match self {
            Self::FilesystemDirectory { .. } => None,
            Self::RemoteServer { endpoint }
            | Self::AggregateServer { endpoint }
            | Self::CentralServer { endpoint, .. } => Some(endpoint),
        }
    }

    /// Directory for filesystem kinds.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::FilesystemDirectory { path } => Some(path),
            _ => None,
        }
    }

    /// Write this source under `prefix`, replacing whatever was stored there.
    /// The password is written only when `store_passwords` is granted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn store_in(
        &self,
        store: &dyn PreferenceStore,
        prefix: &str,
        store_passwords: bool,
    ) -> PreferenceResult<()> {
        Self::clear_stored(store, prefix)?;
        let key = |name: &str| format!("{prefix}{name}");
        store.put(&key(KEY_TYPE), self.tag())?;
        match self {
            Self::FilesystemDirectory { path } => {
                store.put(&key(KEY_PATH), &path.to_string_lossy())?;
            }
            Self::CentralServer { project_id, .. } => {
                store.put(&key(KEY_PROJECT_ID), &project_id.to_string())?;
            }
            Self::RemoteServer { .. } | Self::AggregateServer { .. } => {}
        }
        if let Some(endpoint) = self.endpoint() {
            store.put(&key(KEY_URL), &endpoint.url)?;
            if let Some(credentials) = &endpoint.credentials {
                store.put(&key(KEY_USERNAME), &credentials.username)?;
                if let Some(password) = credentials.password.as_deref().filter(|_| store_passwords) {
                    store.put(&key(KEY_PASSWORD), password)?;
                }
            }
        }
        Ok(())
    }

    /// Read a source previously written with [`Self::store_in`].
    #[must_use]
    pub fn read_from(store: &dyn PreferenceStore, prefix: &str) -> Option<Self> {
        let get = |name: &str| store.get(&format!("{prefix}{name}"));
        let endpoint = || {
            get(KEY_URL).map(|url| {
                let endpoint = ServerEndpoint::new(url);
                match get(KEY_USERNAME) {
                    Some(username) => endpoint.with_credentials(username, get(KEY_PASSWORD)),
                    None => endpoint,
                }
            })
        };
        match get(KEY_TYPE)?.as_str() {
            "filesystem_directory" => Some(Self::FilesystemDirectory {
                path: PathBuf::from(get(KEY_PATH)?),
            }),
            "remote_server" => Some(Self::RemoteServer {
                endpoint: endpoint()?,
            }),
            "aggregate_server" => Some(Self::AggregateServer {
                endpoint: endpoint()?,
            }),
            "central_server" => Some(Self::CentralServer {
                endpoint: endpoint()?,
                project_id: get(KEY_PROJECT_ID)?.parse().ok()?,
            }),
            _ => None,
        }
    }

    /// Remove every key [`Self::store_in`] may write under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn clear_stored(store: &dyn PreferenceStore, prefix: &str) -> PreferenceResult<()> {
        let keys = ALL_KEYS
            .iter()
            .map(|name| format!("{prefix}{name}"))
            .collect::<Vec<_>>();
        store.remove_all(&keys)
    }
}

/// Capability set of a source of forms. The engine depends only on this
/// contract; new source kinds implement it without touching the core.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Kind and payload this adapter was built for.
    fn kind(&self) -> &SourceKind;

    /// Whether the candidate location is usable.
    async fn validate(&self) -> bool;

    /// Forms currently available at the source, in display order.
    async fn enumerate(&self) -> anyhow::Result<Vec<FormDescriptor>>;

    /// Unit-of-work pulling `record` with its effective `configuration`.
    fn build_pull_operation(
        &self,
        record: &TransferRecord,
        configuration: &TransferConfiguration,
    ) -> Arc<dyn PullOperation>;

    /// Human-readable description of the location.
    fn describe(&self) -> String;

    /// Whether enumeration may be repeated against the same location.
    fn can_be_reloaded(&self) -> bool;

    /// Persist this source as the selected one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn persist(&self, store: &dyn PreferenceStore, store_passwords: bool) -> PreferenceResult<()> {
        self.kind()
            .store_in(store, SELECTED_SOURCE_PREFIX, store_passwords)
    }

    /// Remember this source as the origin of `record_id` after a successful
    /// pull. Sources that cannot be pulled from again remember nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn remember_for_record(
        &self,
        store: &dyn PreferenceStore,
        store_passwords: bool,
        record_id: &RecordId,
    ) -> PreferenceResult<()> {
        let _ = (store, store_passwords, record_id);
        Ok(())
    }
}

/// Protocol client of a remote form server. Wire details live in
/// implementations; the remote source adapter only sequences these calls.
#[async_trait]
pub trait FormServerClient: Send + Sync {
    /// Whether the server answers with the configured credentials.
    async fn is_reachable(&self) -> bool;

    /// Forms published by the server.
    async fn list_forms(&self) -> anyhow::Result<Vec<FormDescriptor>>;

    /// Download the form definition (and media when `include_media`) into
    /// `target_dir`.
    async fn download_form(
        &self,
        form: &FormDescriptor,
        target_dir: &Path,
        include_media: bool,
    ) -> anyhow::Result<()>;

    /// Submission instance ids for `form_id`, oldest first, strictly after
    /// `after` when provided.
    async fn list_submissions(
        &self,
        form_id: &RecordId,
        after: Option<&str>,
    ) -> anyhow::Result<Vec<String>>;

    /// Download one submission into `target_dir/<instance_id>/`.
    ///
    /// Callers only pass instance ids that are a single path component.
    async fn download_submission(
        &self,
        form_id: &RecordId,
        instance_id: &str,
        target_dir: &Path,
    ) -> anyhow::Result<()>;
}
