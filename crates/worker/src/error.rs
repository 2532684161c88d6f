//! Worker error types.

use hauler_jobs::JobError;
use thiserror::Error;

/// Errors that end a worker run early.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("import command is empty")]
    EmptyCommand,

    #[error("failed to start import command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("job record was finalized by another writer")]
    Superseded,

    #[error("job store error: {0}")]
    Jobs(JobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<JobError> for WorkerError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::InvalidTransition { .. } => WorkerError::Superseded,
            other => WorkerError::Jobs(other),
        }
    }
}

/// Result type for worker operations.
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;
