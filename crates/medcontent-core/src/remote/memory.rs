//! In-memory content service, used as the reference server's backing table and in tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::models::{CollectionName, Item, ItemId};
use crate::remote::{ContentService, RemoteCollections};
use crate::util::unix_millis_now;

#[derive(Clone, Default)]
pub struct MemoryContentService {
    collections: Arc<RwLock<BTreeMap<CollectionName, IndexMap<ItemId, Item>>>>,
    unavailable: Arc<AtomicBool>,
    latency: Arc<Mutex<Duration>>,
    calls: Arc<AtomicUsize>,
}

impl MemoryContentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored collections with the given contents.
    pub fn seed(&self, collections: RemoteCollections) {
        let mut stored = self.collections.write();
        for (collection, items) in collections {
            let items = items
                .into_iter()
                .map(|item| (item.id.clone(), item))
                .collect();
            stored.insert(collection, items);
        }
    }

    /// Make every subsequent call fail as if the service were unreachable.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every subsequent call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of calls received, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn items(&self, collection: &str) -> Vec<Item> {
        self.collections
            .read()
            .get(collection)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn item(&self, collection: &str, id: &ItemId) -> Option<Item> {
        self.collections
            .read()
            .get(collection)
            .and_then(|items| items.get(id).cloned())
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Api("content service unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentService for MemoryContentService {
    async fn fetch_all(&self) -> Result<RemoteCollections> {
        self.enter().await?;
        Ok(self
            .collections
            .read()
            .iter()
            .map(|(name, items)| (name.clone(), items.values().cloned().collect()))
            .collect())
    }

    async fn create(&self, collection: &CollectionName, item: &Item) -> Result<Item> {
        self.enter().await?;
        if item.id.is_empty() {
            return Err(Error::InvalidInput("item id must not be empty".to_string()));
        }
        // Creates are upserts so a retried create after a lost response is harmless.
        self.collections
            .write()
            .entry(collection.clone())
            .or_default()
            .insert(item.id.clone(), item.clone());
        Ok(item.clone())
    }

    async fn update(&self, collection: &CollectionName, item: &Item) -> Result<Item> {
        self.enter().await?;
        let mut collections = self.collections.write();
        let stored = collections
            .get_mut(collection)
            .and_then(|items| items.get_mut(&item.id))
            .ok_or_else(|| Error::NotFound(format!("{collection}/{}", item.id)))?;
        *stored = item.clone();
        Ok(item.clone())
    }

    async fn delete(&self, collection: &CollectionName, id: &ItemId) -> Result<()> {
        self.enter().await?;
        if let Some(items) = self.collections.write().get_mut(collection) {
            items.shift_remove(id);
        }
        Ok(())
    }

    async fn increment_counter(
        &self,
        collection: &CollectionName,
        id: &ItemId,
        field: &str,
    ) -> Result<Item> {
        self.enter().await?;
        let mut collections = self.collections.write();
        let stored = collections
            .get_mut(collection)
            .and_then(|items| items.get_mut(id))
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
        stored.increment_counter(field)?;
        stored.updated_at = unix_millis_now().max(stored.updated_at.saturating_add(1));
        Ok(stored.clone())
    }
}
