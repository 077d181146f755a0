//! Durable snapshot of every collection, read once at start and rewritten after mutations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{CollectionName, Item};

/// Storage namespace embedded in every snapshot document.
pub const SNAPSHOT_NAMESPACE: &str = "medcontent.collections.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub namespace: String,
    pub saved_at: i64,
    pub collections: BTreeMap<CollectionName, Vec<Item>>,
}

/// Backend for the client's single serialized snapshot.
pub trait SnapshotPersistence: Send + Sync + 'static {
    fn load(&self) -> Result<Option<Snapshot>>;
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// JSON file backend. Writes go to a sibling temp file and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotPersistence for FileSnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        if snapshot.namespace != SNAPSHOT_NAMESPACE {
            tracing::warn!(
                "Ignoring snapshot at {} with foreign namespace '{}'",
                self.path.display(),
                snapshot.namespace
            );
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let temp_path = self.temp_path();
        std::fs::write(&temp_path, serde_json::to_vec(snapshot)?)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

/// In-memory backend, primarily for tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    inner: Arc<Mutex<MemorySnapshotState>>,
}

#[derive(Debug, Default)]
struct MemorySnapshotState {
    snapshot: Option<Snapshot>,
    saves: usize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::default();
        store.inner.lock().snapshot = Some(snapshot);
        store
    }

    pub fn saved(&self) -> Option<Snapshot> {
        self.inner.lock().snapshot.clone()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.inner.lock().saves
    }
}

impl SnapshotPersistence for MemorySnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.inner.lock().snapshot.clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut state = self.inner.lock();
        state.snapshot = Some(snapshot.clone());
        state.saves += 1;
        Ok(())
    }
}
