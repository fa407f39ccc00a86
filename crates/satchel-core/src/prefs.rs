//! Key/value preference stores.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{PreferenceError, PreferenceResult};

/// String key/value persistence used for per-record configuration, transfer
/// timestamps, and remembered sources.
pub trait PreferenceStore: Send + Sync {
    /// Value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn put(&self, key: &str, value: &str) -> PreferenceResult<()>;

    /// Store every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn put_all(&self, entries: &BTreeMap<String, String>) -> PreferenceResult<()> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Remove `key` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn remove(&self, key: &str) -> PreferenceResult<()>;

    /// Remove every listed key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn remove_all(&self, keys: &[String]) -> PreferenceResult<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }

    /// Every stored key.
    fn keys(&self) -> Vec<String>;
}

/// Volatile store backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryPreferences {
    /// Empty store.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) -> PreferenceResult<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PreferenceResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

/// Store persisted as a flat JSON object; every mutation rewrites the file.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FilePreferences {
    /// Open the store at `path`; a missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> PreferenceResult<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| PreferenceError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(PreferenceError::Io {
                    operation: "preferences.read",
                    path,
                    source,
                });
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "preferences loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Backing file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> PreferenceResult<()> {
        let io_err = |operation: &'static str| {
            let path = self.path.clone();
            move |source| PreferenceError::Io {
                operation,
                path,
                source,
            }
        };
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err("preferences.create_dir"))?;
        }
        let rendered = serde_json::to_string_pretty(entries).map_err(|source| {
            PreferenceError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, rendered).map_err(io_err("preferences.write"))?;
        fs::rename(&staging, &self.path).map_err(io_err("preferences.rename"))
    }

    fn mutate<F>(&self, change: F) -> PreferenceResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut entries = self.lock();
        let mut staged = entries.clone();
        change(&mut staged);
        self.flush(&staged)?;
        *entries = staged;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) -> PreferenceResult<()> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn put_all(&self, batch: &BTreeMap<String, String>) -> PreferenceResult<()> {
        self.mutate(|entries| {
            entries.extend(batch.iter().map(|(k, v)| (k.clone(), v.clone())));
        })
    }

    fn remove(&self, key: &str) -> PreferenceResult<()> {
        self.mutate(|entries| {
            entries.remove(key);
        })
    }

    fn remove_all(&self, keys: &[String]) -> PreferenceResult<()> {
        self.mutate(|entries| {
            for key in keys {
                entries.remove(key);
            }
        })
    }

    fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_supports_bulk_operations() -> PreferenceResult<()> {
        let store = InMemoryPreferences::empty();
        let mut batch = BTreeMap::new();
        batch.insert("a".to_string(), "1".to_string());
        batch.insert("b".to_string(), "2".to_string());
        store.put_all(&batch)?;
        assert_eq!(store.get("a").as_deref(), Some("1"));

        store.remove_all(&["a".to_string()])?;
        assert_eq!(store.keys(), vec!["b".to_string()]);
        Ok(())
    }

    #[test]
    fn file_store_persists_across_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("prefs.json");

        let store = FilePreferences::open(&path)?;
        store.put("exportDateTime.f", "2024-03-01T10:00:00Z")?;
        store.put("pull.source.type", "filesystem_directory")?;
        store.remove("pull.source.type")?;
        drop(store);

        let reopened = FilePreferences::open(&path)?;
        assert_eq!(
            reopened.get("exportDateTime.f").as_deref(),
            Some("2024-03-01T10:00:00Z")
        );
        assert_eq!(reopened.keys().len(), 1);
        Ok(())
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("prefs.json");
        let store = FilePreferences::open(&path)?;
        store.put("kept", "1")?;

        fs::create_dir(path.with_extension("json.tmp"))?;
        let err = store.put("lost", "2").expect_err("staging path is a directory");
        assert!(matches!(
            err,
            PreferenceError::Io {
                operation: "preferences.write",
                ..
            }
        ));
        assert!(store.get("lost").is_none());
        assert_eq!(store.get("kept").as_deref(), Some("1"));
        assert!(store.remove("kept").is_err());
        assert_eq!(store.get("kept").as_deref(), Some("1"));

        let reopened = FilePreferences::open(&path)?;
        assert_eq!(reopened.keys(), store.keys());
        Ok(())
    }

    #[test]
    fn file_store_rejects_malformed_content() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("prefs.json");
        fs::write(&path, "[1, 2, 3]")?;

        let err = FilePreferences::open(&path).expect_err("array is not a preference map");
        assert!(matches!(err, PreferenceError::Parse { .. }));
        Ok(())
    }
}
