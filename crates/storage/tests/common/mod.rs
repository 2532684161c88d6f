//! Shared helpers for storage integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use hauler_storage::{FilesystemStore, KeyValueStore, MemoryStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Generate deterministic test data using a seeded pseudo-random generator.
/// Same seed produces same output.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// One instance of every backend. The temp dir must outlive the stores.
pub async fn stores() -> (TempDir, Vec<Arc<dyn KeyValueStore>>) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let fs = FilesystemStore::new(dir.path().join("kv"))
        .await
        .expect("Failed to create filesystem store");
    let stores: Vec<Arc<dyn KeyValueStore>> = vec![Arc::new(fs), Arc::new(MemoryStore::new())];
    (dir, stores)
}
