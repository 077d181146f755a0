//! Reconciler: applies remote change envelopes and hydration payloads to the local store.
//!
//! Add/update are last-write-wins on `updatedAt` (ties apply, so re-delivery is
//! harmless). Deletes that carry the deleter's stamp lose to a newer local
//! edit. Deleted ids are remembered in a bounded, memory-only tombstone ledger
//! so a stale update cannot bring an item back; the store itself keeps no
//! tombstones.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::models::{
    ChangeAction, CollectionName, DeletePayload, Envelope, FullPayload, Item, ItemId,
};
use crate::remote::RemoteCollections;
use crate::store::{CollectionStore, StoreOp};
use crate::util::unix_millis_now;

const MAX_TOMBSTONES: usize = 1_000;
const MAX_CONFLICTS: usize = 100;

/// Why an incoming change lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// A newer local version won.
    Lww,
    /// The item was deleted at or after the incoming stamp.
    Tombstone,
}

impl ConflictStrategy {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Lww => "lww",
            Self::Tombstone => "tombstone",
        }
    }
}

/// Record of an incoming change discarded by the merge rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub collection: CollectionName,
    pub item_id: ItemId,
    /// Stamp of the local version (or deletion) that won.
    pub local_updated_at: i64,
    /// Stamp of the incoming change that was rejected.
    pub incoming_updated_at: i64,
    /// Unix ms
    pub resolved_at: i64,
    pub strategy: ConflictStrategy,
}

/// What applying one envelope did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Inserted(ItemId),
    Updated(ItemId),
    Removed { id: ItemId, existed: bool },
    Replaced { count: usize },
    Discarded(SyncConflict),
    Ignored(String),
}

/// Per-collection result of applying a hydration payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HydrationReport {
    pub replaced: Vec<(CollectionName, usize)>,
    /// Collections the service returned empty; local contents were kept.
    pub kept: Vec<CollectionName>,
}

type TombstoneKey = (CollectionName, ItemId);

#[derive(Default)]
struct Ledger {
    tombstones: HashMap<TombstoneKey, i64>,
    tombstone_order: VecDeque<TombstoneKey>,
    conflicts: VecDeque<SyncConflict>,
}

impl Ledger {
    fn tombstone(&self, collection: &CollectionName, id: &ItemId) -> Option<i64> {
        self.tombstones
            .get(&(collection.clone(), id.clone()))
            .copied()
    }

    fn bury(&mut self, collection: &CollectionName, id: &ItemId, stamp: i64) {
        let key = (collection.clone(), id.clone());
        match self.tombstones.get_mut(&key) {
            Some(existing) => *existing = (*existing).max(stamp),
            None => {
                self.tombstones.insert(key.clone(), stamp);
                self.tombstone_order.push_back(key);
                while self.tombstone_order.len() > MAX_TOMBSTONES {
                    if let Some(oldest) = self.tombstone_order.pop_front() {
                        self.tombstones.remove(&oldest);
                    }
                }
            }
        }
    }

    fn exhume(&mut self, collection: &CollectionName, id: &ItemId) {
        let key = (collection.clone(), id.clone());
        if self.tombstones.remove(&key).is_some() {
            self.tombstone_order.retain(|entry| entry != &key);
        }
    }

    fn forget_collection(&mut self, collection: &CollectionName) {
        self.tombstones.retain(|(name, _), _| name != collection);
        self.tombstone_order.retain(|(name, _)| name != collection);
    }

    fn record(&mut self, conflict: SyncConflict) {
        self.conflicts.push_back(conflict);
        while self.conflicts.len() > MAX_CONFLICTS {
            self.conflicts.pop_front();
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: CollectionStore,
    ledger: Arc<Mutex<Ledger>>,
}

impl Reconciler {
    pub fn new(store: CollectionStore) -> Self {
        Self {
            store,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    pub const fn store(&self) -> &CollectionStore {
        &self.store
    }

    /// Parse and apply a raw JSON envelope. Unparseable input is ignored.
    pub fn apply_json(&self, raw: &str) -> ReconcileOutcome {
        match Envelope::from_json(raw) {
            Ok(envelope) => self.apply(&envelope),
            Err(error) => ReconcileOutcome::Ignored(format!("malformed envelope: {error}")),
        }
    }

    pub fn apply(&self, envelope: &Envelope) -> ReconcileOutcome {
        let Ok(collection) = CollectionName::parse(&envelope.content_type) else {
            return ReconcileOutcome::Ignored(format!(
                "invalid content type '{}'",
                envelope.content_type
            ));
        };

        let outcome = match envelope.action {
            ChangeAction::Add | ChangeAction::Update => {
                match serde_json::from_value::<Item>(envelope.data.clone()) {
                    Ok(item) if !item.id.is_empty() => self.apply_put(&collection, item),
                    Ok(_) => ReconcileOutcome::Ignored("item without id".to_string()),
                    Err(error) => ReconcileOutcome::Ignored(format!("malformed item: {error}")),
                }
            }
            ChangeAction::Delete => {
                match serde_json::from_value::<DeletePayload>(envelope.data.clone()) {
                    Ok(payload) if !payload.id.is_empty() => {
                        self.apply_delete(&collection, &payload, envelope.timestamp)
                    }
                    Ok(_) => ReconcileOutcome::Ignored("delete without id".to_string()),
                    Err(error) => {
                        ReconcileOutcome::Ignored(format!("malformed delete payload: {error}"))
                    }
                }
            }
            ChangeAction::Full => {
                match serde_json::from_value::<FullPayload>(envelope.data.clone()) {
                    Ok(payload) => self.apply_full(&collection, payload.collection),
                    Err(error) => {
                        ReconcileOutcome::Ignored(format!("malformed collection payload: {error}"))
                    }
                }
            }
        };

        match &outcome {
            ReconcileOutcome::Discarded(conflict) => tracing::debug!(
                collection = %conflict.collection,
                item = %conflict.item_id,
                local = conflict.local_updated_at,
                incoming = conflict.incoming_updated_at,
                strategy = conflict.strategy.label(),
                "Discarded stale remote change"
            ),
            ReconcileOutcome::Ignored(reason) => {
                tracing::debug!("Ignored remote envelope: {}", reason);
            }
            _ => {}
        }
        outcome
    }

    /// Replace every collection the service returned non-empty; keep the rest.
    pub fn apply_hydration(&self, collections: RemoteCollections) -> HydrationReport {
        let mut report = HydrationReport::default();
        let mut collections = collections.into_iter().collect::<Vec<_>>();
        collections.sort_by(|left, right| left.0.cmp(&right.0));

        for (collection, items) in collections {
            if items.is_empty() {
                report.kept.push(collection);
                continue;
            }
            let count = items.len();
            self.replace(&collection, items);
            report.replaced.push((collection, count));
        }
        report
    }

    /// Remember a delete made by this client so stale remote updates cannot revive it.
    pub fn record_local_delete(&self, collection: &CollectionName, id: &ItemId, stamp: i64) {
        self.ledger.lock().bury(collection, id, stamp);
    }

    /// Forget the tombstone of an id this client has just written again.
    pub fn record_local_put(&self, collection: &CollectionName, id: &ItemId) {
        self.ledger.lock().exhume(collection, id);
    }

    /// Most recent discarded changes, oldest first.
    pub fn conflicts(&self) -> Vec<SyncConflict> {
        self.ledger.lock().conflicts.iter().cloned().collect()
    }

    fn apply_put(&self, collection: &CollectionName, item: Item) -> ReconcileOutcome {
        let mut ledger = self.ledger.lock();

        if let Some(deleted_at) = ledger.tombstone(collection, &item.id) {
            if item.updated_at <= deleted_at {
                let conflict = conflict(
                    collection,
                    &item.id,
                    deleted_at,
                    item.updated_at,
                    ConflictStrategy::Tombstone,
                );
                ledger.record(conflict.clone());
                return ReconcileOutcome::Discarded(conflict);
            }
        }

        let id = item.id.clone();
        match self.store.get_item(collection.as_str(), &id) {
            Some(local) if item.updated_at < local.updated_at => {
                let conflict = conflict(
                    collection,
                    &id,
                    local.updated_at,
                    item.updated_at,
                    ConflictStrategy::Lww,
                );
                ledger.record(conflict.clone());
                ReconcileOutcome::Discarded(conflict)
            }
            Some(_) => {
                ledger.exhume(collection, &id);
                self.store.apply(collection, StoreOp::Put(item));
                ReconcileOutcome::Updated(id)
            }
            None => {
                ledger.exhume(collection, &id);
                self.store.apply(collection, StoreOp::Put(item));
                ReconcileOutcome::Inserted(id)
            }
        }
    }

    fn apply_delete(
        &self,
        collection: &CollectionName,
        payload: &DeletePayload,
        envelope_timestamp: i64,
    ) -> ReconcileOutcome {
        let mut ledger = self.ledger.lock();
        let local = self.store.get_item(collection.as_str(), &payload.id);

        if let (Some(local), Some(deleted_at)) = (&local, payload.updated_at) {
            if local.updated_at > deleted_at {
                let conflict = conflict(
                    collection,
                    &payload.id,
                    local.updated_at,
                    deleted_at,
                    ConflictStrategy::Lww,
                );
                ledger.record(conflict.clone());
                return ReconcileOutcome::Discarded(conflict);
            }
        }

        ledger.bury(
            collection,
            &payload.id,
            payload.updated_at.unwrap_or(envelope_timestamp),
        );
        let existed = local.is_some()
            && self
                .store
                .apply(collection, StoreOp::Remove(payload.id.clone()))
                .is_some();
        ReconcileOutcome::Removed {
            id: payload.id.clone(),
            existed,
        }
    }

    fn apply_full(&self, collection: &CollectionName, items: Vec<Item>) -> ReconcileOutcome {
        if items.is_empty() {
            return ReconcileOutcome::Ignored(format!(
                "empty collection payload for {collection}; keeping local contents"
            ));
        }
        let count = items.len();
        self.replace(collection, items);
        ReconcileOutcome::Replaced { count }
    }

    fn replace(&self, collection: &CollectionName, items: Vec<Item>) {
        let mut ledger = self.ledger.lock();
        ledger.forget_collection(collection);
        self.store.replace_collection(collection, items);
    }
}

fn conflict(
    collection: &CollectionName,
    id: &ItemId,
    local_updated_at: i64,
    incoming_updated_at: i64,
    strategy: ConflictStrategy,
) -> SyncConflict {
    SyncConflict {
        collection: collection.clone(),
        item_id: id.clone(),
        local_updated_at,
        incoming_updated_at,
        resolved_at: unix_millis_now(),
        strategy,
    }
}
