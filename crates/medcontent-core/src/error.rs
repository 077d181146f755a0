//! Error types for medcontent-core

use std::time::Duration;

use thiserror::Error;

/// Result type alias using medcontent-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in medcontent-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Content service answered with a failure status
    #[error("Content service error: {0}")]
    Api(String),

    /// Item not found
    #[error("Item not found: {0}")]
    NotFound(String),

    /// Remote call exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Broadcast transport error
    #[error("Broadcast error: {0}")]
    Broadcast(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
