//! Local collection store.
//!
//! An in-memory map of collections that callers read and write synchronously.
//! Every mutation schedules a debounced rewrite of the full snapshot on a
//! background task; write failures are logged and never reach the caller.

mod snapshot;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;

pub use snapshot::{
    FileSnapshotStore, MemorySnapshotStore, Snapshot, SnapshotPersistence, SNAPSHOT_NAMESPACE,
};

use crate::error::{Error, Result};
use crate::models::{CollectionName, Item, ItemId};
use crate::util::unix_millis_now;

type CollectionMap = BTreeMap<CollectionName, IndexMap<ItemId, Item>>;

/// A single change to one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Put(Item),
    Remove(ItemId),
}

/// Cloneable handle to a client's collections.
#[derive(Clone)]
pub struct CollectionStore {
    collections: Arc<RwLock<CollectionMap>>,
    writer: Option<SnapshotWriter>,
}

#[derive(Clone)]
struct SnapshotWriter {
    persistence: Arc<dyn SnapshotPersistence>,
    schedule: mpsc::UnboundedSender<()>,
}

impl CollectionStore {
    /// Store without durable persistence.
    pub fn in_memory() -> Self {
        Self {
            collections: Arc::new(RwLock::new(CollectionMap::new())),
            writer: None,
        }
    }

    /// Store without durable persistence, seeded with built-in defaults.
    pub fn with_defaults(defaults: impl IntoIterator<Item = (CollectionName, Vec<Item>)>) -> Self {
        let store = Self::in_memory();
        for (collection, items) in defaults {
            store.load_collection(collection, items);
        }
        store
    }

    /// Open a persisted store.
    ///
    /// Collections found in the saved snapshot replace the matching defaults.
    /// An unreadable snapshot is logged and treated as absent. Must be called
    /// from within a Tokio runtime: the debounced writer runs as a task.
    pub fn open<P: SnapshotPersistence>(
        persistence: P,
        defaults: impl IntoIterator<Item = (CollectionName, Vec<Item>)>,
        debounce: Duration,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::Config("collection store persistence requires a Tokio runtime".to_string())
        })?;

        let mut store = Self::with_defaults(defaults);
        match persistence.load() {
            Ok(Some(snapshot)) => {
                tracing::debug!(
                    "Loaded snapshot saved at {} with {} collections",
                    snapshot.saved_at,
                    snapshot.collections.len()
                );
                for (collection, items) in snapshot.collections {
                    store.load_collection(collection, items);
                }
            }
            Ok(None) => tracing::debug!("No local snapshot found; starting from defaults"),
            Err(error) => tracing::warn!("Ignoring unreadable local snapshot: {}", error),
        }

        let persistence: Arc<dyn SnapshotPersistence> = Arc::new(persistence);
        let (schedule, requests) = mpsc::unbounded_channel();
        runtime.spawn(run_snapshot_writer(
            store.collections.clone(),
            persistence.clone(),
            debounce,
            requests,
        ));
        store.writer = Some(SnapshotWriter {
            persistence,
            schedule,
        });
        Ok(store)
    }

    /// Items of a collection in insertion order; empty when the collection is unknown.
    pub fn get(&self, collection: &str) -> Vec<Item> {
        self.collections
            .read()
            .get(collection)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_item(&self, collection: &str, id: &ItemId) -> Option<Item> {
        self.collections
            .read()
            .get(collection)
            .and_then(|items| items.get(id).cloned())
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, IndexMap::len)
    }

    pub fn collection_names(&self) -> Vec<CollectionName> {
        self.collections.read().keys().cloned().collect()
    }

    /// Apply one change and schedule persistence. Returns the replaced item, if any.
    pub fn apply(&self, collection: &CollectionName, op: StoreOp) -> Option<Item> {
        let previous = {
            let mut collections = self.collections.write();
            match op {
                StoreOp::Put(item) => collections
                    .entry(collection.clone())
                    .or_default()
                    .insert(item.id.clone(), item),
                StoreOp::Remove(id) => collections
                    .get_mut(collection)
                    .and_then(|items| items.shift_remove(&id)),
            }
        };
        self.schedule_persist();
        previous
    }

    /// Replace a collection wholesale and schedule persistence.
    pub fn replace_collection(&self, collection: &CollectionName, items: Vec<Item>) {
        self.load_collection(collection.clone(), items);
        self.schedule_persist();
    }

    pub fn snapshot(&self) -> Snapshot {
        capture_snapshot(&self.collections.read())
    }

    /// Write the snapshot now, bypassing the debounce.
    pub fn flush(&self) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.persistence.save(&self.snapshot()),
            None => Ok(()),
        }
    }

    fn load_collection(&self, collection: CollectionName, items: Vec<Item>) {
        let items = items
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect::<IndexMap<_, _>>();
        self.collections.write().insert(collection, items);
    }

    fn schedule_persist(&self) {
        if let Some(writer) = &self.writer {
            // The writer only stops once every handle is gone.
            let _ = writer.schedule.send(());
        }
    }
}

impl Default for CollectionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn capture_snapshot(collections: &CollectionMap) -> Snapshot {
    Snapshot {
        namespace: SNAPSHOT_NAMESPACE.to_string(),
        saved_at: unix_millis_now(),
        collections: collections
            .iter()
            .map(|(name, items)| (name.clone(), items.values().cloned().collect()))
            .collect(),
    }
}

async fn run_snapshot_writer(
    collections: Arc<RwLock<CollectionMap>>,
    persistence: Arc<dyn SnapshotPersistence>,
    debounce: Duration,
    mut requests: mpsc::UnboundedReceiver<()>,
) {
    while requests.recv().await.is_some() {
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        while requests.try_recv().is_ok() {}

        let snapshot = capture_snapshot(&collections.read());
        let backend = Arc::clone(&persistence);
        match tokio::task::spawn_blocking(move || backend.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!("Failed to persist local snapshot: {}", error),
            Err(error) => tracing::warn!("Snapshot write task failed: {}", error),
        }
    }
    tracing::debug!("Snapshot writer stopped");
}
