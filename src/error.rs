//! Error types for the chroma labeling system
//!
//! This module provides structured error handling using thiserror for
//! error definitions and anyhow for propagation at integration edges.

use thiserror::Error;

/// Main error type for chroma operations
#[derive(Error, Debug)]
pub enum ChromaError {
    /// Remote classifier rejected or failed the request
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Text surface operation failed
    #[error("Surface error: {0}")]
    Surface(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for chroma operations
pub type Result<T> = std::result::Result<T, ChromaError>;

/// Convert anyhow::Error to ChromaError
impl From<anyhow::Error> for ChromaError {
    fn from(err: anyhow::Error) -> Self {
        ChromaError::Other(err.to_string())
    }
}
