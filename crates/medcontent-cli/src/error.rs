use std::io;

use medcontent_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] medcontent_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid field assignment '{0}': expected KEY=VALUE")]
    InvalidAssignment(String),
    #[error("Collection name cannot be empty")]
    EmptyCollection,
    #[error("Item {0} is not in the local replica; run `medcontent hydrate` first")]
    UnknownItem(String),
    #[error(
        "Could not resolve a data directory; pass --snapshot-path or set MEDCONTENT_SNAPSHOT_PATH"
    )]
    NoDataDir,
    #[error("Sync failed: {0}")]
    Sync(String),
    #[error("Saved locally but not synced: {0}. Run `medcontent retry` later.")]
    NotPersisted(String),
}
