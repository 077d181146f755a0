//! Startup seed for the in-memory collections.

use std::path::Path;

use medcontent_core::remote::{read_collections_file, RemoteCollections};

use crate::error::AppError;

pub fn load_seed(path: &Path) -> Result<RemoteCollections, AppError> {
    read_collections_file(path)
        .map_err(|error| AppError::Config(format!("seed file {}: {error}", path.display())))
}
