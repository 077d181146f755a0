//! Data models for medcontent

mod collection;
mod envelope;
mod item;

pub use collection::{CollectionName, CLINICAL_APPS, DOWNLOADS, OFFICES, TRAINING};
pub use envelope::{ChangeAction, DeletePayload, Envelope, FullPayload};
pub use item::{Item, ItemId, DEFAULT_COUNTER_FIELD};
