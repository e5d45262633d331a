//! Default headers sent with every request.
//!
//! The dispatcher keeps an in-memory copy of the defaults and persists it
//! through a [`HeaderStore`] whenever it changes, so rotated credentials
//! survive restarts. Each call snapshots the copy when it starts.

use crate::error::HeaderStoreError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

/// Header name to value.
pub type HeaderMapping = BTreeMap<String, String>;

/// Persistent storage for header mappings.
pub trait HeaderStore: Send + Sync {
    /// Load the mapping stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be read or decoded.
    fn get(&self, key: &str) -> Result<Option<HeaderMapping>, HeaderStoreError>;

    /// Replace the mapping stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be written.
    fn set(&self, key: &str, headers: &HeaderMapping) -> Result<(), HeaderStoreError>;

    /// Delete the mapping stored under `key`. Missing keys are not an error.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be written.
    fn remove(&self, key: &str) -> Result<(), HeaderStoreError>;
}

/// Non-persistent store, used when no store is configured.
#[derive(Debug, Default)]
pub struct MemoryHeaderStore {
    entries: RwLock<HashMap<String, HeaderMapping>>,
}

impl MemoryHeaderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HeaderStore for MemoryHeaderStore {
    fn get(&self, key: &str) -> Result<Option<HeaderMapping>, HeaderStoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, headers: &HeaderMapping) -> Result<(), HeaderStoreError> {
        self.entries.write().insert(key.to_owned(), headers.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), HeaderStoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Store that keeps one JSON file per key in a directory.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// crash mid-write never leaves a truncated file behind.
#[derive(Debug, Clone)]
pub struct FileHeaderStore {
    dir: PathBuf,
}

impl FileHeaderStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl HeaderStore for FileHeaderStore {
    fn get(&self, key: &str) -> Result<Option<HeaderMapping>, HeaderStoreError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, headers: &HeaderMapping) -> Result<(), HeaderStoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(headers)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), HeaderStoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Dispatcher-owned view of the default headers.
///
/// The write lock is held while the store is written, so concurrent updates
/// reach the store in the same order they were applied in memory.
pub struct DefaultHeaders {
    key: String,
    store: Arc<dyn HeaderStore>,
    current: RwLock<HeaderMapping>,
}

impl DefaultHeaders {
    pub(crate) fn load(store: Arc<dyn HeaderStore>, key: String) -> Self {
        let current = match store.get(&key) {
            Ok(headers) => headers.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "failed to load default headers; starting empty");
                HeaderMapping::new()
            }
        };
        Self {
            key,
            store,
            current: RwLock::new(current),
        }
    }

    pub(crate) fn snapshot(&self) -> HeaderMapping {
        self.current.read().clone()
    }

    /// Re-read the persisted headers, picking up changes made elsewhere.
    ///
    /// A missing entry means the session ended elsewhere and clears the
    /// defaults. A failed read keeps them as they are.
    pub(crate) fn refresh(&self) {
        let mut current = self.current.write();
        match self.store.get(&self.key) {
            Ok(Some(headers)) => *current = headers,
            Ok(None) => current.clear(),
            Err(e) => {
                tracing::warn!(error = %e, key = %self.key, "failed to reload default headers; keeping current");
            }
        }
    }

    /// Merge `update` into the defaults (existing names are overwritten,
    /// others are kept) and persist the result.
    pub(crate) fn merge(&self, update: HeaderMapping) -> HeaderMapping {
        let mut current = self.current.write();
        current.extend(update);
        if let Err(e) = self.store.set(&self.key, &current) {
            tracing::warn!(error = %e, key = %self.key, "failed to persist default headers");
        }
        current.clone()
    }

    /// Forget all defaults, in memory and in the store.
    pub(crate) fn clear(&self) -> Result<(), HeaderStoreError> {
        let mut current = self.current.write();
        current.clear();
        self.store.remove(&self.key)
    }
}

/// Per-call headers layered over the defaults. Names are compared
/// case-insensitively; the per-call value wins.
pub fn merge_headers(defaults: &HeaderMapping, per_call: &HeaderMapping) -> HeaderMapping {
    let mut merged: HeaderMapping = defaults
        .iter()
        .filter(|(name, _)| {
            !per_call
                .keys()
                .any(|override_name| override_name.eq_ignore_ascii_case(name))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merged.extend(per_call.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
