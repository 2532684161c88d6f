//! Periodic removal of abandoned chunk sessions.

use crate::chunks::ChunkReceiver;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Spawn the upload session sweeper.
///
/// Every `interval`, sessions that received no chunk within `ttl` are
/// deleted together with their chunks.
pub fn spawn_upload_sweeper(
    receiver: Arc<ChunkReceiver>,
    ttl: time::Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            ttl_secs = ttl.whole_seconds(),
            "Upload session sweeper enabled"
        );
        loop {
            tokio::time::sleep(interval).await;
            run_sweep(&receiver, ttl).await;
        }
    })
}

/// Run one sweep pass, logging rather than propagating failures.
pub async fn run_sweep(receiver: &ChunkReceiver, ttl: time::Duration) -> usize {
    match receiver.sweep(ttl, OffsetDateTime::now_utc()).await {
        Ok(swept) => {
            for upload_id in &swept {
                tracing::info!(upload_id = %upload_id, "Swept idle upload session");
            }
            swept.len()
        }
        Err(e) => {
            tracing::error!(error = %e, "Upload session sweep failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hauler_core::{ChunkDescriptor, UploadId};

    #[tokio::test]
    async fn zero_ttl_sweeps_everything_idle() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = ChunkReceiver::new(
            dir.path().join("chunks"),
            dir.path().join("uploads"),
            64,
            1024,
        );
        let desc = ChunkDescriptor {
            upload_id: UploadId::parse("abandoned").unwrap(),
            chunk_index: 1,
            chunk_size: 4,
            total_size: 8,
            filename: "a.zip".to_string(),
            total_chunks: None,
        };
        receiver
            .receive(&desc, Bytes::from_static(b"abcd"))
            .await
            .unwrap();

        assert_eq!(run_sweep(&receiver, time::Duration::hours(1)).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(run_sweep(&receiver, time::Duration::ZERO).await, 1);
        assert!(!dir.path().join("chunks/abandoned").exists());
    }
}
