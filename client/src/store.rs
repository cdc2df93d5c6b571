//! Local store collaborator.
//!
//! The sync layer sees local storage as an opaque key → JSON-string map. All
//! record data for one logical collection lives under a single key as a
//! serialized [`VersionedRecordSet`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use ferry_engine::{MigrationEngine, VersionedRecordSet};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;

/// Storage-level failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(String),

    #[error("corrupt value under '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// The kind of storage backing a [`LocalStore`].
///
/// Only `Local` and `Session` storage natively emit storage-mutation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    /// Persistent, shared between contexts of the same origin
    #[default]
    Local,
    /// Scoped to one browsing session
    Session,
    /// Origin-isolated, larger-capacity database
    Indexed,
}

impl StorageKind {
    pub fn emits_storage_events(&self) -> bool {
        matches!(self, StorageKind::Local | StorageKind::Session)
    }
}

/// Key/value storage used by the sync and migration layers.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn save(&self, key: &str, value: &str) -> std::result::Result<(), StoreError>;
    async fn retrieve(&self, key: &str) -> std::result::Result<Option<String>, StoreError>;
    async fn remove(&self, key: &str) -> std::result::Result<(), StoreError>;
    async fn clear(&self) -> std::result::Result<(), StoreError>;

    /// Whether the store stamps change timestamps on records.
    /// Sync cannot be enabled without it.
    fn tracks_timestamps(&self) -> bool {
        true
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }
}

/// In-memory store, mainly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
    kind: StorageKind,
    untracked: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a different storage kind.
    pub fn with_kind(mut self, kind: StorageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Simulate a store that does not track change timestamps.
    pub fn without_timestamps(mut self) -> Self {
        self.untracked = true;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn save(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn remove(&self, key: &str) -> std::result::Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> std::result::Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }

    fn tracks_timestamps(&self) -> bool {
        !self.untracked
    }

    fn kind(&self) -> StorageKind {
        self.kind
    }
}

/// A store persisted as one JSON object in a file.
///
/// Every write rewrites the whole file; fine for the agent's small data sets.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> std::result::Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| StoreError::Corrupt {
                key: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "Opened file store");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn flush(&self, entries: &BTreeMap<String, String>) -> std::result::Result<(), StoreError> {
        let text = serde_json::to_string_pretty(entries).map_err(|e| StoreError::Io(e.to_string()))?;
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl LocalStore for FileStore {
    async fn save(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries).await
    }

    async fn retrieve(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> std::result::Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> std::result::Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        self.flush(&entries).await
    }
}

/// Read the record set stored under `key`. A missing key is an empty set.
pub async fn read_set(store: &dyn LocalStore, key: &str) -> Result<VersionedRecordSet> {
    match store.retrieve(key).await? {
        Some(json) => Ok(VersionedRecordSet::from_json(&json)?),
        None => Ok(VersionedRecordSet::new(Vec::new(), 1)),
    }
}

/// Persist `set` under `key`.
pub async fn write_set(store: &dyn LocalStore, key: &str, set: &VersionedRecordSet) -> Result<()> {
    store.save(key, &set.to_json()?).await?;
    Ok(())
}

/// Load the record set under `key`, upgrading it to the engine's target version.
///
/// The upgraded set is written back only when a migration actually ran. If any
/// step fails, the error is returned and the stored data is left untouched.
pub async fn load_record_set(
    store: &dyn LocalStore,
    key: &str,
    engine: &MigrationEngine,
) -> Result<VersionedRecordSet> {
    let raw = match store.retrieve(key).await? {
        Some(json) => serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?,
        None => Value::Null,
    };

    let from = MigrationEngine::get_data_version(&raw);
    let migrate = engine.needs_migration(&raw);
    let set = engine.migrate(raw).await.map_err(|e| {
        tracing::error!(key, from, to = engine.target_version(), error = %e, "Migration failed");
        e
    })?;

    if migrate {
        write_set(store, key, &set).await?;
        tracing::info!(
            key,
            from,
            to = set.version,
            items = set.len(),
            "Migrated record set"
        );
    }

    Ok(set)
}
