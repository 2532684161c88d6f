//! Job store error types.

use hauler_storage::StorageError;
use thiserror::Error;

/// Job store operation errors.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("corrupt job record {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("invalid record: {0}")]
    Invalid(String),
}

impl From<StorageError> for JobError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => JobError::NotFound(key),
            other => JobError::Storage(other),
        }
    }
}

impl From<hauler_core::Error> for JobError {
    fn from(err: hauler_core::Error) -> Self {
        match err {
            hauler_core::Error::InvalidTransition { from, to } => {
                JobError::InvalidTransition { from, to }
            }
            other => JobError::Invalid(other.to_string()),
        }
    }
}

/// Result type for job store operations.
pub type JobResult<T> = std::result::Result<T, JobError>;
