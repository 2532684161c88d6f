//! Key-value storage abstraction and backends for hauler.
//!
//! This crate provides:
//! - The [`KeyValueStore`] trait used by the job status store
//! - Backends: local filesystem and in-memory
//! - Atomic file helpers shared with the chunk receiver

pub mod backends;
pub mod error;
pub mod fsutil;
pub mod traits;

pub use backends::{filesystem::FilesystemStore, memory::MemoryStore};
pub use error::{StorageError, StorageResult};
pub use traits::KeyValueStore;

use hauler_core::config::StorageConfig;
use std::sync::Arc;

/// Create the job status store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn KeyValueStore>> {
    let backend = FilesystemStore::new(config.jobs_root()).await?;
    Ok(Arc::new(backend))
}
