//! medcontent-core - Core library for medcontent
//!
//! This crate keeps editable content collections (downloads, training courses,
//! offices, clinical apps) consistent between a locally persisted replica, the
//! authoritative content service, and sibling clients editing concurrently.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{ChangeAction, CollectionName, Envelope, Item, ItemId};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use store::{CollectionStore, StoreOp};
pub use sync::{Mutation, MutationOutcome, SyncClient, SyncOptions};
