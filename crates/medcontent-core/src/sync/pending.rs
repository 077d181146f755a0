//! Ledger of local changes the content service has not accepted yet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{CollectionName, ItemId};
use crate::sync::Mutation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSync {
    pub collection: CollectionName,
    pub item_id: ItemId,
    pub mutation: Mutation,
    pub attempts: u32,
    pub last_error: String,
    /// Unix ms
    pub last_attempt_at: i64,
}

/// Result of replaying the pending ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Entries whose item no longer exists locally.
    pub dropped: usize,
}

pub(crate) type PendingKey = (CollectionName, ItemId);

#[derive(Debug, Default)]
pub(crate) struct PendingLedger {
    entries: BTreeMap<PendingKey, PendingSync>,
}

impl PendingLedger {
    pub(crate) fn entries(&self) -> Vec<PendingSync> {
        self.entries.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &PendingKey> {
        self.entries.keys()
    }

    pub(crate) fn contains(&self, collection: &CollectionName, id: &ItemId) -> bool {
        self.entries.contains_key(&(collection.clone(), id.clone()))
    }

    /// True while the service has never accepted the item's create.
    pub(crate) fn awaiting_create(&self, collection: &CollectionName, id: &ItemId) -> bool {
        self.entries
            .get(&(collection.clone(), id.clone()))
            .is_some_and(|entry| matches!(entry.mutation, Mutation::Create(_)))
    }

    pub(crate) fn clear(&mut self, collection: &CollectionName, id: &ItemId) {
        self.entries.remove(&(collection.clone(), id.clone()));
    }

    /// Re-insert entries saved by an earlier session. Entries already known win.
    pub(crate) fn restore(&mut self, entries: impl IntoIterator<Item = PendingSync>) {
        for entry in entries {
            let key = (entry.collection.clone(), entry.item_id.clone());
            self.entries.entry(key).or_insert(entry);
        }
    }

    /// Record a failed persist. The newest mutation replaces an older entry,
    /// except that a create stays a create so the service learns of the item.
    pub(crate) fn record(
        &mut self,
        collection: &CollectionName,
        mutation: Mutation,
        error: String,
        at: i64,
    ) {
        let key = (collection.clone(), mutation.item_id().clone());
        let (mutation, attempts) = match self.entries.remove(&key) {
            Some(previous) => {
                let mutation = match (previous.mutation, mutation) {
                    (Mutation::Create(_), Mutation::Update(item)) => Mutation::Create(item),
                    (_, mutation) => mutation,
                };
                (mutation, previous.attempts.saturating_add(1))
            }
            None => (mutation, 1),
        };

        self.entries.insert(
            key.clone(),
            PendingSync {
                collection: key.0,
                item_id: key.1,
                mutation,
                attempts,
                last_error: error,
                last_attempt_at: at,
            },
        );
    }
}

/// Items with a persist job queued or running.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    jobs: BTreeMap<PendingKey, usize>,
}

impl InFlight {
    pub(crate) fn begin(&mut self, collection: &CollectionName, id: &ItemId) {
        *self
            .jobs
            .entry((collection.clone(), id.clone()))
            .or_default() += 1;
    }

    pub(crate) fn finish(&mut self, collection: &CollectionName, id: &ItemId) {
        let key = (collection.clone(), id.clone());
        if let Some(count) = self.jobs.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.jobs.remove(&key);
            }
        }
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &PendingKey> {
        self.jobs.keys()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::Item;

    #[test]
    fn newer_failure_supersedes_entry() {
        let offices = CollectionName::from("offices");
        let mut ledger = PendingLedger::default();
        ledger.record(&offices, Mutation::Update(Item::new("a")), "down".to_string(), 1);
        ledger.record(&offices, Mutation::delete("a"), "still down".to_string(), 2);

        let entries = ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mutation.kind(), "delete");
        assert_eq!(entries[0].attempts, 2);
        assert_eq!(entries[0].last_error, "still down");
        assert_eq!(entries[0].last_attempt_at, 2);
    }

    #[test]
    fn update_after_failed_create_stays_create() {
        let offices = CollectionName::from("offices");
        let mut ledger = PendingLedger::default();
        ledger.record(&offices, Mutation::Create(Item::new("a")), "down".to_string(), 1);
        let edited = Item::new("a").with_field("name", "Kano");
        ledger.record(&offices, Mutation::Update(edited.clone()), "down".to_string(), 2);

        assert_eq!(ledger.entries()[0].mutation, Mutation::Create(edited));
    }

    #[test]
    fn restore_keeps_newer_entries() {
        let offices = CollectionName::from("offices");
        let mut ledger = PendingLedger::default();
        ledger.record(&offices, Mutation::delete("a"), "current".to_string(), 5);

        let saved = PendingSync {
            collection: offices.clone(),
            item_id: ItemId::from("a"),
            mutation: Mutation::Update(Item::new("a")),
            attempts: 3,
            last_error: "old".to_string(),
            last_attempt_at: 1,
        };
        let other = PendingSync {
            item_id: ItemId::from("b"),
            mutation: Mutation::delete("b"),
            ..saved.clone()
        };
        ledger.restore(vec![saved, other]);

        let entries = ledger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].last_error, "current");
        assert_eq!(entries[1].item_id, ItemId::from("b"));
    }

    #[test]
    fn clear_removes_only_matching_entry() {
        let offices = CollectionName::from("offices");
        let training = CollectionName::from("training");
        let mut ledger = PendingLedger::default();
        ledger.record(&offices, Mutation::delete("a"), "down".to_string(), 1);
        ledger.record(&training, Mutation::delete("a"), "down".to_string(), 1);

        ledger.clear(&offices, &ItemId::from("a"));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entries()[0].collection, training);
    }

    #[test]
    fn awaiting_create_tracks_unaccepted_creates() {
        let offices = CollectionName::from("offices");
        let mut ledger = PendingLedger::default();
        ledger.record(&offices, Mutation::Create(Item::new("a")), "down".to_string(), 1);
        ledger.record(&offices, Mutation::Update(Item::new("b")), "down".to_string(), 1);

        assert!(ledger.awaiting_create(&offices, &ItemId::from("a")));
        assert!(!ledger.awaiting_create(&offices, &ItemId::from("b")));
        assert!(!ledger.awaiting_create(&offices, &ItemId::from("c")));
    }

    #[test]
    fn in_flight_counts_overlapping_jobs() {
        let offices = CollectionName::from("offices");
        let id = ItemId::from("a");
        let mut in_flight = InFlight::default();
        in_flight.begin(&offices, &id);
        in_flight.begin(&offices, &id);

        in_flight.finish(&offices, &id);
        assert_eq!(in_flight.keys().count(), 1);
        in_flight.finish(&offices, &id);
        assert_eq!(in_flight.keys().count(), 0);
        in_flight.finish(&offices, &id);
        assert_eq!(in_flight.keys().count(), 0);
    }
}
