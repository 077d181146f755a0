//! Remote content service: the authoritative per-collection store.

mod http;
mod memory;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

pub use http::HttpContentService;
pub use memory::MemoryContentService;

use crate::error::Result;
use crate::models::{CollectionName, Item, ItemId};

/// Every collection the service knows about, as returned by `GET /content/all`.
pub type RemoteCollections = HashMap<CollectionName, Vec<Item>>;

/// Read a `{collection: Item[]}` document, the shape `GET /content/all` returns.
pub fn read_collections_file(path: &Path) -> Result<RemoteCollections> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Header carrying the shared admin secret on mutating calls.
pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

/// Operations the sync client needs from the content service.
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Fetch every collection in one logical call.
    async fn fetch_all(&self) -> Result<RemoteCollections>;

    async fn create(&self, collection: &CollectionName, item: &Item) -> Result<Item>;

    async fn update(&self, collection: &CollectionName, item: &Item) -> Result<Item>;

    /// Deleting an id the service does not hold succeeds.
    async fn delete(&self, collection: &CollectionName, id: &ItemId) -> Result<()>;

    /// Bump an integer counter field on the stored item and return the result.
    async fn increment_counter(
        &self,
        collection: &CollectionName,
        id: &ItemId,
        field: &str,
    ) -> Result<Item>;
}
