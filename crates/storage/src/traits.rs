//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Key-value store holding small whole-value records.
///
/// Keys are `/`-separated relative paths. Writes replace the full value and
/// must be atomic: readers observe either the old or the new value.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Read a value. Missing keys return `StorageError::NotFound`.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Write a value, replacing any previous one.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Write a value only if the key is absent.
    ///
    /// Returns `false` when the key already existed; the stored value is
    /// left untouched.
    async fn put_if_absent(&self, key: &str, data: Bytes) -> StorageResult<bool>;

    /// Replace a value only if it still equals `expected`.
    ///
    /// Returns `false`, leaving the key untouched, when another writer got
    /// there first. Swaps on one key are serialized, also across processes
    /// sharing a backend. Missing keys return `StorageError::NotFound`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &Bytes,
        data: Bytes,
    ) -> StorageResult<bool>;

    /// Delete a value. Missing keys return `StorageError::NotFound`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List all keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Get the backend name for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is usable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
