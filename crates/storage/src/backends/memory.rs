//! In-memory storage backend for tests and ephemeral deployments.

use crate::error::{StorageError, StorageResult};
use crate::traits::KeyValueStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Key-value store backed by a sorted in-process map.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        validate_key(key)?;
        self.entries.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, data: Bytes) -> StorageResult<bool> {
        validate_key(key)?;
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), data);
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &Bytes,
        data: Bytes,
    ) -> StorageResult<bool> {
        validate_key(key)?;
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(current) if *current == *expected => {
                *current = data;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.entries
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let dir_prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(&dir_prefix))
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_matches_directory_prefix_only() {
        let store = MemoryStore::new();
        store.put("jobs/a.json", Bytes::from("a")).await.unwrap();
        store.put("jobsx/b.json", Bytes::from("b")).await.unwrap();
        assert_eq!(store.list("jobs").await.unwrap(), vec!["jobs/a.json"]);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn put_if_absent_and_delete() {
        let store = MemoryStore::new();
        assert!(store.put_if_absent("k", Bytes::from("1")).await.unwrap());
        assert!(!store.put_if_absent("k", Bytes::from("2")).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Bytes::from("1"));
        store.delete("k").await.unwrap();
        assert!(store.is_empty().await);
        assert!(matches!(store.get("k").await, Err(StorageError::NotFound(_))));
    }
}
