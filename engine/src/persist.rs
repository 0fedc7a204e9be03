//! Persistence of the offline store.
//!
//! The store serializes to a single versioned JSON document written after
//! every state transition. On startup the document is loaded and the store
//! rebuilt, so a crash or restart never drops a queued mutation or an open
//! conflict.

use crate::{Conflict, ConflictId, EntitySnapshot, Error, MutationId, QueuedMutation, Result};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Current on-disk format version. Bump on incompatible schema changes.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Full durable image of an [`crate::OfflineStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub format_version: u32,
    /// Cached entity snapshots, sorted by key for a stable serialization
    pub snapshots: Vec<EntitySnapshot>,
    /// The mutation queue in drain order
    pub queue: Vec<QueuedMutation>,
    /// Conflict registry, resolved entries included for audit
    pub conflicts: Vec<Conflict>,
    pub next_mutation_id: MutationId,
    pub next_conflict_id: ConflictId,
}

impl StoreSnapshot {
    /// Serialize to the persisted JSON form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Parse a persisted document, rejecting images written by a newer
    /// format than this build understands.
    pub fn from_json(data: &str) -> Result<Self> {
        let snapshot: StoreSnapshot =
            serde_json::from_str(data).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        if snapshot.format_version > STORE_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported format version {}",
                snapshot.format_version
            )));
        }
        Ok(snapshot)
    }
}

/// Durable storage medium for the serialized store.
///
/// Backends are intentionally dumb: load bytes, save bytes. A failing backend
/// surfaces [`Error::StorageUnavailable`] and the engine degrades to
/// memory-only operation.
pub trait StorageBackend: Send + Sync {
    /// Load the persisted document. `Ok(None)` means nothing persisted yet.
    fn load(&self) -> Result<Option<String>>;

    /// Persist the document, replacing any previous one.
    fn save(&self, data: &str) -> Result<()>;
}

/// File-backed storage. Writes go through a sibling temp file plus rename so
/// a crash mid-write leaves the previous image intact.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Persist to the given file path. Parent directories are created on
    /// first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_err(&self, err: io::Error) -> Error {
        Error::StorageUnavailable(format!("{}: {err}", self.path.display()))
    }
}

impl StorageBackend for FileBackend {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.storage_err(err)),
        }
    }

    fn save(&self, data: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.storage_err(e))?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data).map_err(|e| self.storage_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.storage_err(e))
    }
}

/// In-memory storage for tests and memory-only deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<Mutex<Option<String>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self) -> Result<Option<String>> {
        Ok(self
            .data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save(&self, data: &str) -> Result<()> {
        *self
            .data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(data.to_string());
        Ok(())
    }
}
