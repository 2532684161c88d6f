//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("invalid chunk size: {size} (must be between 1 and {max})")]
    InvalidChunkSize { size: u64, max: u64 },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metadata key {0:?} is reserved")]
    ReservedMetadataKey(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
