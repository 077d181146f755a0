//! Sync client: hydration, optimistic mutation, persistence and change publishing.
//!
//! Mutations hit the local store synchronously. Persisting them to the
//! content service happens on a background worker, one job at a time in
//! submission order, and a successful persist is followed by a publish on
//! the broadcast channel. Failed persists are never rolled back; they land
//! in the pending ledger until `retry_pending` gets them through. Items with
//! a queued, running or failed persist keep their local state across
//! hydrations.

mod mutation;
mod pending;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub use mutation::Mutation;
pub use pending::{PendingSync, RetryReport};

use crate::broadcast::{BroadcastChannel, ChannelEvent, Subscription};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{CollectionName, Envelope, Item, ItemId};
use crate::reconcile::Reconciler;
use crate::remote::ContentService;
use crate::state::SyncStatus;
use crate::store::{CollectionStore, StoreOp};
use crate::util::{compact_text, unix_millis_now};
use mutation::StampClock;
use pending::{InFlight, PendingKey, PendingLedger};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Upper bound on every content service call.
    pub request_timeout: Duration,
    /// Period of the safety hydration run by the listener; `None` disables it.
    pub resync_interval: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            resync_interval: Some(DEFAULT_RESYNC_INTERVAL),
        }
    }
}

impl From<&ClientConfig> for SyncOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            resync_interval: config.resync_interval,
        }
    }
}

/// How a mutation's persistence ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Accepted by the content service; `published` tells whether the
    /// broadcast channel took the envelope.
    Persisted { envelope: Envelope, published: bool },
    /// Rejected or unreachable. The local change stays and is pending.
    Failed { error: String },
}

impl MutationOutcome {
    pub const fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }
}

/// Handle on a mutation whose persistence runs in the background.
#[derive(Debug)]
pub struct PendingMutation {
    item_id: ItemId,
    outcome: oneshot::Receiver<MutationOutcome>,
}

impl PendingMutation {
    pub const fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    /// Wait for the persist step. Dropping the handle instead does not cancel it.
    pub async fn wait(self) -> MutationOutcome {
        self.outcome.await.unwrap_or_else(|_| MutationOutcome::Failed {
            error: "sync worker stopped".to_string(),
        })
    }
}

struct PersistJob {
    collection: CollectionName,
    mutation: Mutation,
    reply: oneshot::Sender<MutationOutcome>,
}

struct SyncInner {
    store: CollectionStore,
    reconciler: Reconciler,
    remote: Arc<dyn ContentService>,
    channel: Arc<dyn BroadcastChannel>,
    status: RwLock<SyncStatus>,
    pending: Mutex<PendingLedger>,
    in_flight: Mutex<InFlight>,
    clock: StampClock,
    options: SyncOptions,
}

/// Client-side sync context. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<SyncInner>,
    jobs: mpsc::UnboundedSender<PersistJob>,
}

impl SyncClient {
    /// Must be called from within a tokio runtime; the persist worker is spawned here.
    pub fn new(
        store: CollectionStore,
        remote: Arc<dyn ContentService>,
        channel: Arc<dyn BroadcastChannel>,
        options: SyncOptions,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::Config("sync client requires a tokio runtime".to_string()))?;

        let inner = Arc::new(SyncInner {
            reconciler: Reconciler::new(store.clone()),
            store,
            remote,
            channel,
            status: RwLock::new(SyncStatus::default()),
            pending: Mutex::new(PendingLedger::default()),
            in_flight: Mutex::new(InFlight::default()),
            clock: StampClock::default(),
            options,
        });

        let (jobs, receiver) = mpsc::unbounded_channel();
        runtime.spawn(run_persist_worker(Arc::clone(&inner), receiver));

        Ok(Self { inner, jobs })
    }

    pub fn store(&self) -> &CollectionStore {
        &self.inner.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.read().clone()
    }

    /// Changes not yet accepted by the content service.
    pub fn pending(&self) -> Vec<PendingSync> {
        self.inner.pending.lock().entries()
    }

    /// Load pending changes saved by an earlier session, e.g. from `pending()` output.
    pub fn restore_pending(&self, entries: Vec<PendingSync>) {
        self.inner.pending.lock().restore(entries);
    }

    /// Empty item with a fresh id for `collection`.
    pub fn new_item(&self, collection: &CollectionName) -> Item {
        Item::new(ItemId::generate(collection.id_prefix()))
    }

    /// Replace local collections with whatever the content service returns non-empty.
    ///
    /// Failure leaves the store untouched and is recorded in the status.
    pub async fn hydrate(&self) -> bool {
        self.inner.status.write().begin();
        // A persist finishing during the fetch may predate the fetched data.
        let mut touched = self.inner.unsettled_keys();

        let collections = match self.inner.call(self.inner.remote.fetch_all()).await {
            Ok(collections) => collections,
            Err(error) => {
                let message = compact_text(&error.to_string());
                tracing::warn!("Hydration failed: {}", message);
                self.inner.status.write().fail(message);
                return false;
            }
        };

        touched.extend(self.inner.unsettled_keys());
        let overlay = self.local_overlay(touched);
        let report = self.inner.reconciler.apply_hydration(collections);
        for (collection, op) in overlay {
            self.inner.store.apply(&collection, op);
        }

        tracing::info!(
            replaced = report.replaced.len(),
            kept = report.kept.len(),
            "Hydrated collections"
        );

        let pending = self.inner.pending.lock().len();
        let mut status = self.inner.status.write();
        status.succeed(unix_millis_now());
        if pending > 0 {
            status.note_error(format!("{pending} change(s) awaiting sync"));
        }
        true
    }

    /// Apply a change locally right away and persist it in the background.
    ///
    /// The returned handle resolves once the content service has answered.
    /// Errors here are local validation failures only.
    pub fn mutate(
        &self,
        collection: &CollectionName,
        mutation: Mutation,
    ) -> Result<PendingMutation> {
        let mutation = self.apply_locally(collection, mutation)?;
        Ok(self.enqueue(collection.clone(), mutation))
    }

    /// Replay every pending change against the content service.
    pub async fn retry_pending(&self) -> RetryReport {
        let mut report = RetryReport::default();

        for entry in self.pending() {
            let is_create = matches!(entry.mutation, Mutation::Create(_));
            let mutation = match entry.mutation {
                Mutation::Create(_) | Mutation::Update(_) => {
                    let Some(item) = self
                        .inner
                        .store
                        .get_item(entry.collection.as_str(), &entry.item_id)
                    else {
                        self.inner
                            .pending
                            .lock()
                            .clear(&entry.collection, &entry.item_id);
                        report.dropped += 1;
                        continue;
                    };
                    if is_create {
                        Mutation::Create(item)
                    } else {
                        Mutation::Update(item)
                    }
                }
                other => other,
            };

            let outcome = self.enqueue(entry.collection.clone(), mutation).wait().await;
            if outcome.is_persisted() {
                report.succeeded += 1;
            } else if self
                .inner
                .pending
                .lock()
                .contains(&entry.collection, &entry.item_id)
            {
                report.failed += 1;
            } else {
                report.dropped += 1;
            }
        }

        if report != RetryReport::default() {
            tracing::info!(
                succeeded = report.succeeded,
                failed = report.failed,
                dropped = report.dropped,
                "Retried pending changes"
            );
        }
        report
    }

    /// Hand an envelope to the broadcast channel. Failures are logged and dropped.
    pub async fn publish(&self, envelope: &Envelope) -> bool {
        self.inner.publish(envelope).await
    }

    /// Subscribe now and process channel events on a background task.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let subscription = self.inner.channel.subscribe();
        let client = self.clone();
        tokio::spawn(async move { client.run_listener(subscription).await })
    }

    /// Feed channel events into the reconciler until the channel shuts down.
    ///
    /// A reconnect or lag means envelopes were lost, so pending changes are
    /// retried and a full hydration follows. The optional resync timer
    /// hydrates on its own schedule.
    pub async fn run_listener(&self, mut subscription: Subscription) {
        let period = self
            .inner
            .options
            .resync_interval
            .filter(|period| !period.is_zero());
        let tick = period.unwrap_or(DEFAULT_RESYNC_INTERVAL);
        let mut resync = interval_at(Instant::now() + tick, tick);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = subscription.next() => match event {
                    Some(ChannelEvent::Envelope(envelope)) => {
                        self.inner.reconciler.apply(&envelope);
                    }
                    Some(ChannelEvent::Reconnected) => {
                        tracing::info!("Broadcast channel reconnected; resyncing");
                        self.recover().await;
                    }
                    Some(ChannelEvent::Lagged(missed)) => {
                        tracing::warn!(missed, "Broadcast channel dropped messages; resyncing");
                        self.recover().await;
                    }
                    None => {
                        tracing::debug!("Broadcast subscription closed");
                        break;
                    }
                },
                _ = resync.tick(), if period.is_some() => {
                    self.hydrate().await;
                }
            }
        }
    }

    async fn recover(&self) {
        if !self.pending().is_empty() {
            self.retry_pending().await;
        }
        self.hydrate().await;
    }

    fn apply_locally(&self, collection: &CollectionName, mutation: Mutation) -> Result<Mutation> {
        let inner = &self.inner;
        match mutation {
            Mutation::Create(mut item) => {
                if item.id.is_empty() {
                    item.id = ItemId::generate(collection.id_prefix());
                }
                let existing = inner.store.get_item(collection.as_str(), &item.id);
                item.updated_at = inner.clock.next_after(existing.map(|local| local.updated_at));
                inner.reconciler.record_local_put(collection, &item.id);
                inner.store.apply(collection, StoreOp::Put(item.clone()));
                Ok(Mutation::Create(item))
            }
            Mutation::Update(mut item) => {
                if item.id.is_empty() {
                    return Err(Error::InvalidInput("update requires an item id".to_string()));
                }
                let existing = inner.store.get_item(collection.as_str(), &item.id);
                item.updated_at = inner.clock.next_after(existing.map(|local| local.updated_at));
                inner.reconciler.record_local_put(collection, &item.id);
                inner.store.apply(collection, StoreOp::Put(item.clone()));
                Ok(Mutation::Update(item))
            }
            Mutation::Delete { id, .. } => {
                if id.is_empty() {
                    return Err(Error::InvalidInput("delete requires an item id".to_string()));
                }
                let existing = inner.store.get_item(collection.as_str(), &id);
                let updated_at = inner.clock.next_after(existing.map(|local| local.updated_at));
                inner.reconciler.record_local_delete(collection, &id, updated_at);
                inner.store.apply(collection, StoreOp::Remove(id.clone()));
                Ok(Mutation::Delete { id, updated_at })
            }
            Mutation::IncrementCounter { id, field } => {
                let mut item = inner
                    .store
                    .get_item(collection.as_str(), &id)
                    .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
                item.increment_counter(&field)?;
                item.updated_at = inner.clock.next_after(Some(item.updated_at));
                inner.store.apply(collection, StoreOp::Put(item));
                Ok(Mutation::IncrementCounter { id, field })
            }
        }
    }

    fn enqueue(&self, collection: CollectionName, mutation: Mutation) -> PendingMutation {
        let (reply, outcome) = oneshot::channel();
        let item_id = mutation.item_id().clone();
        self.inner.in_flight.lock().begin(&collection, &item_id);
        let job = PersistJob {
            collection,
            mutation,
            reply,
        };
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            tracing::warn!("Sync worker is gone; change {} stays local", item_id);
            self.inner.in_flight.lock().finish(&job.collection, &item_id);
        }
        PendingMutation { item_id, outcome }
    }

    /// Current local state of the given items, re-applied on top of a hydration.
    fn local_overlay(&self, keys: BTreeSet<PendingKey>) -> Vec<(CollectionName, StoreOp)> {
        keys.into_iter()
            .map(|(collection, id)| {
                let op = match self.inner.store.get_item(collection.as_str(), &id) {
                    Some(item) => StoreOp::Put(item),
                    None => StoreOp::Remove(id),
                };
                (collection, op)
            })
            .collect()
    }
}

impl SyncInner {
    async fn call<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.options.request_timeout;
        tokio::time::timeout(limit, request)
            .await
            .map_err(|_| Error::Timeout(limit))?
    }

    async fn publish(&self, envelope: &Envelope) -> bool {
        match self.channel.publish(envelope).await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!("Dropped {} envelope: {}", envelope.content_type, error);
                false
            }
        }
    }

    /// Items whose local state the content service may not reflect yet.
    fn unsettled_keys(&self) -> BTreeSet<PendingKey> {
        let mut keys: BTreeSet<PendingKey> = self.pending.lock().keys().cloned().collect();
        keys.extend(self.in_flight.lock().keys().cloned());
        keys
    }

    async fn persist(&self, collection: &CollectionName, mutation: Mutation) -> MutationOutcome {
        let mutation = self.promote_unaccepted(collection, mutation);
        match self.push(collection, &mutation).await {
            Ok(envelope) => {
                self.pending.lock().clear(collection, mutation.item_id());
                let published = self.publish(&envelope).await;
                MutationOutcome::Persisted {
                    envelope,
                    published,
                }
            }
            Err(Error::NotFound(reason)) if mutation.needs_remote_item() => {
                self.concede_remote_delete(collection, mutation.item_id());
                MutationOutcome::Failed {
                    error: compact_text(&Error::NotFound(reason).to_string()),
                }
            }
            Err(error) => {
                let message = compact_text(&error.to_string());
                tracing::warn!(
                    collection = %collection,
                    item = %mutation.item_id(),
                    kind = mutation.kind(),
                    "Persisting change failed: {}",
                    message
                );
                let retry_as = self.pending_form(collection, mutation);
                self.pending
                    .lock()
                    .record(collection, retry_as, message.clone(), unix_millis_now());
                self.status.write().note_error(message.clone());
                MutationOutcome::Failed { error: message }
            }
        }
    }

    async fn push(&self, collection: &CollectionName, mutation: &Mutation) -> Result<Envelope> {
        match mutation {
            Mutation::Create(item) => {
                self.call(self.remote.create(collection, item)).await?;
                Envelope::add(collection, item)
            }
            Mutation::Update(item) => {
                self.call(self.remote.update(collection, item)).await?;
                Envelope::update(collection, item)
            }
            Mutation::Delete { id, updated_at } => {
                self.call(self.remote.delete(collection, id)).await?;
                Envelope::delete(collection, id, Some(*updated_at))
            }
            Mutation::IncrementCounter { id, field } => {
                let stored = self
                    .call(self.remote.increment_counter(collection, id, field))
                    .await?;
                let envelope = Envelope::update(collection, &stored)?;
                self.reconciler.apply(&envelope);
                Ok(envelope)
            }
        }
    }

    /// An item whose create never reached the service is pushed as a create.
    fn promote_unaccepted(&self, collection: &CollectionName, mutation: Mutation) -> Mutation {
        if !self
            .pending
            .lock()
            .awaiting_create(collection, mutation.item_id())
        {
            return mutation;
        }
        let local = self.store.get_item(collection.as_str(), mutation.item_id());
        match (mutation, local) {
            (Mutation::Update(item), _) | (Mutation::IncrementCounter { .. }, Some(item)) => {
                Mutation::Create(item)
            }
            (mutation, _) => mutation,
        }
    }

    /// The service deleted the item this change edits. Its delete stands:
    /// the local copy and any pending change for it are dropped.
    fn concede_remote_delete(&self, collection: &CollectionName, id: &ItemId) {
        tracing::warn!(
            collection = %collection,
            item = %id,
            "Item was deleted remotely; dropping local change"
        );
        self.pending.lock().clear(collection, id);
        if let Some(local) = self.store.get_item(collection.as_str(), id) {
            self.reconciler
                .record_local_delete(collection, id, local.updated_at);
        }
        self.store.apply(collection, StoreOp::Remove(id.clone()));
    }

    /// A failed increment is retried by pushing the locally bumped item.
    fn pending_form(&self, collection: &CollectionName, mutation: Mutation) -> Mutation {
        if let Mutation::IncrementCounter { id, .. } = &mutation {
            if let Some(item) = self.store.get_item(collection.as_str(), id) {
                return Mutation::Update(item);
            }
        }
        mutation
    }
}

async fn run_persist_worker(inner: Arc<SyncInner>, mut jobs: mpsc::UnboundedReceiver<PersistJob>) {
    while let Some(job) = jobs.recv().await {
        let item_id = job.mutation.item_id().clone();
        let outcome = inner.persist(&job.collection, job.mutation).await;
        inner.in_flight.lock().finish(&job.collection, &item_id);
        // The caller may have dropped its handle.
        let _ = job.reply.send(outcome);
    }
    tracing::debug!("Sync worker stopped");
}
