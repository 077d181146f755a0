use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::models::{Item, ItemId, DEFAULT_COUNTER_FIELD};
use crate::util::unix_millis_now;

/// A local change to one item of one collection.
///
/// Stamps (`updatedAt`) are assigned by `SyncClient::mutate`; any value set
/// by the caller is overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mutation {
    Create(Item),
    Update(Item),
    Delete {
        id: ItemId,
        #[serde(rename = "updatedAt")]
        updated_at: i64,
    },
    IncrementCounter { id: ItemId, field: String },
}

impl Mutation {
    pub fn delete(id: impl Into<ItemId>) -> Self {
        Self::Delete {
            id: id.into(),
            updated_at: 0,
        }
    }

    /// Bump `field`, or `downloadCount` when `None`.
    pub fn increment(id: impl Into<ItemId>, field: Option<&str>) -> Self {
        Self::IncrementCounter {
            id: id.into(),
            field: field.unwrap_or(DEFAULT_COUNTER_FIELD).to_string(),
        }
    }

    pub const fn item_id(&self) -> &ItemId {
        match self {
            Self::Create(item) | Self::Update(item) => &item.id,
            Self::Delete { id, .. } | Self::IncrementCounter { id, .. } => id,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::Delete { .. } => "delete",
            Self::IncrementCounter { .. } => "increment",
        }
    }

    /// Whether the service must already hold the item for this to succeed.
    pub(crate) const fn needs_remote_item(&self) -> bool {
        matches!(self, Self::Update(_) | Self::IncrementCounter { .. })
    }
}

/// Per-client monotone source of `updatedAt` stamps (unix ms).
#[derive(Debug, Default)]
pub(crate) struct StampClock {
    last: AtomicI64,
}

impl StampClock {
    /// Next stamp: wall-clock time, but strictly above every stamp handed out
    /// before and above `floor`.
    pub(crate) fn next_after(&self, floor: Option<i64>) -> i64 {
        let floor = floor.unwrap_or(i64::MIN);
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let next = unix_millis_now()
                .max(last.saturating_add(1))
                .max(floor.saturating_add(1));
            match self
                .last
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}
