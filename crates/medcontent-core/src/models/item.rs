//! Item model

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::util::unix_millis_now;

/// Counter bumped by the content service's increment endpoint when no field is named.
pub const DEFAULT_COUNTER_FIELD: &str = "downloadCount";

const RESERVED_FIELDS: [&str; 2] = ["id", "updatedAt"];

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Identifier of an item, unique within its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Generate a fresh id of the form `{prefix}-{unix_ms}-{seq}`.
    ///
    /// `seq` comes from a process-wide counter, so ids generated within the
    /// same millisecond never collide.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{prefix}-{}-{seq}", unix_millis_now()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A content record: free-form fields plus the id and the LWW ordering stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Unix ms set by the mutator on every create/update.
    #[serde(rename = "updatedAt", default)]
    pub updated_at: i64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Item {
    #[must_use]
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            updated_at: 0,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter. Reserved keys (`id`, `updatedAt`) are ignored.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if let Err(error) = self.set_field(key, value) {
            tracing::debug!("Ignoring field on item {}: {}", self.id, error);
        }
        self
    }

    #[must_use]
    pub fn with_updated_at(mut self, updated_at: i64) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        if RESERVED_FIELDS.contains(&key.as_str()) {
            return Err(Error::InvalidInput(format!("field '{key}' is reserved")));
        }
        self.fields.insert(key, value.into());
        Ok(())
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Display name, when the item carries one.
    pub fn name(&self) -> Option<&str> {
        self.field("name").and_then(Value::as_str)
    }

    /// Current integer value of a counter field; a missing field counts as zero.
    pub fn counter(&self, field: &str) -> Result<i64> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(0),
            Some(value) => value.as_i64().ok_or_else(|| {
                Error::InvalidInput(format!("field '{field}' on {} is not an integer", self.id))
            }),
        }
    }

    /// Add one to a counter field and return the new value.
    pub fn increment_counter(&mut self, field: &str) -> Result<i64> {
        if RESERVED_FIELDS.contains(&field) {
            return Err(Error::InvalidInput(format!("field '{field}' is reserved")));
        }
        let next = self.counter(field)?.saturating_add(1);
        self.fields.insert(field.to_string(), Value::from(next));
        Ok(next)
    }
}
