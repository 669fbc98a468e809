//! Error types for amd-core

use thiserror::Error;

/// Result type alias using amd-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in amd-core operations
///
/// None of these reach the visitor: the public page-level operations degrade to
/// their "no data" path and only log.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input (missing lead fields, failed eligibility checks)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage tier unavailable or rejected the operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network/transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered, but not with something usable
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(crate::util::compact_text(&error.to_string()))
    }
}
