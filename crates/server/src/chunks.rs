//! Chunk receiver: persists upload chunks and assembles finished uploads.
//!
//! Each upload id owns a session directory under `chunks/`:
//!
//! ```text
//! chunks/<upload_id>/session.json
//! chunks/<upload_id>/chunk-000001
//! chunks/<upload_id>/chunk-000002
//! ```
//!
//! The set of received chunks is whatever chunk files exist, so a session
//! survives a restart. Chunks of one upload id are handled one at a time; the
//! assembled file is renamed into `uploads/` under a random stored name.

use crate::error::ApiError;
use crate::metrics::{
    BYTES_RECEIVED, CHUNKS_RECEIVED, UPLOAD_SESSIONS_SWEPT, UPLOADS_ASSEMBLED, record_chunk_error,
};
use bytes::Bytes;
use dashmap::DashMap;
use hauler_core::{ChunkDescriptor, StoredName, UploadId, UploadSession};
use hauler_storage::fsutil;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const SESSION_FILE: &str = "session.json";
const CHUNK_PREFIX: &str = "chunk-";

/// Errors from the chunk receiver.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error(transparent)]
    Invalid(#[from] hauler_core::Error),

    #[error("upload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("chunk {index} must be {expected} bytes, got {actual}")]
    LengthMismatch {
        index: u32,
        expected: u64,
        actual: u64,
    },

    #[error("upload session not found: {0}")]
    NotFound(String),

    #[error("upload session {upload_id} is unreadable: {source}")]
    Corrupt {
        upload_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChunkError {
    fn reason(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "invalid",
            Self::TooLarge { .. } => "too_large",
            Self::LengthMismatch { .. } => "length_mismatch",
            Self::NotFound(_) => "not_found",
            Self::Corrupt { .. } => "corrupt",
            Self::Io(_) => "io",
        }
    }
}

impl From<ChunkError> for ApiError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Invalid(_) | ChunkError::LengthMismatch { .. } => {
                ApiError::field("file", err.to_string())
            }
            ChunkError::TooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            ChunkError::NotFound(_) => ApiError::not_found(),
            ChunkError::Corrupt { .. } => ApiError::Internal(err.to_string()),
            ChunkError::Io(e) => ApiError::Io(e),
        }
    }
}

pub type ChunkResult<T> = std::result::Result<T, ChunkError>;

/// A completed upload, renamed into the upload directory.
#[derive(Clone, Debug, Serialize)]
pub struct AssembledUpload {
    /// Original client file name.
    pub filename: String,
    /// Absolute path of the assembled file.
    pub path: PathBuf,
    pub size: u64,
    /// Randomized name the file is stored under.
    pub stored_as: String,
    /// Hex SHA-256 of the assembled bytes.
    pub sha256: String,
}

/// Result of storing one chunk.
#[derive(Clone, Debug)]
pub enum ChunkOutcome {
    Pending { percentage: u8 },
    Complete(AssembledUpload),
}

/// Receives chunks and assembles them into complete files.
pub struct ChunkReceiver {
    chunks_dir: PathBuf,
    uploads_dir: PathBuf,
    max_chunk_size: u64,
    max_total_size: u64,
    locks: DashMap<UploadId, Arc<Mutex<()>>>,
}

impl ChunkReceiver {
    pub fn new(
        chunks_dir: impl Into<PathBuf>,
        uploads_dir: impl Into<PathBuf>,
        max_chunk_size: u64,
        max_total_size: u64,
    ) -> Self {
        Self {
            chunks_dir: chunks_dir.into(),
            uploads_dir: uploads_dir.into(),
            max_chunk_size,
            max_total_size,
            locks: DashMap::new(),
        }
    }

    fn session_dir(&self, upload_id: &UploadId) -> PathBuf {
        self.chunks_dir.join(upload_id.as_str())
    }

    fn chunk_path(dir: &Path, index: u32) -> PathBuf {
        dir.join(format!("{CHUNK_PREFIX}{index:06}"))
    }

    fn lock_for(&self, upload_id: &UploadId) -> Arc<Mutex<()>> {
        self.locks
            .entry(upload_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry unless another request is queued on it.
    fn release_lock(&self, upload_id: &UploadId) {
        // One reference in the map, one held by the caller.
        self.locks
            .remove_if(upload_id, |_, lock| Arc::strong_count(lock) <= 2);
    }

    /// Store one chunk, assembling the upload when it was the last one missing.
    #[instrument(skip(self, desc, payload), fields(upload_id = %desc.upload_id, chunk = desc.chunk_index))]
    pub async fn receive(&self, desc: &ChunkDescriptor, payload: Bytes) -> ChunkResult<ChunkOutcome> {
        let result = self.receive_inner(desc, payload).await;
        if let Err(e) = &result {
            record_chunk_error(e.reason());
        }
        result
    }

    async fn receive_inner(
        &self,
        desc: &ChunkDescriptor,
        payload: Bytes,
    ) -> ChunkResult<ChunkOutcome> {
        desc.validate(self.max_chunk_size)?;
        if desc.total_size > self.max_total_size {
            return Err(ChunkError::TooLarge {
                size: desc.total_size,
                max: self.max_total_size,
            });
        }
        let expected = desc.expected_len(desc.chunk_index).unwrap_or(desc.chunk_size);
        let actual = payload.len() as u64;
        if actual != expected {
            return Err(ChunkError::LengthMismatch {
                index: desc.chunk_index,
                expected,
                actual,
            });
        }

        let lock = self.lock_for(&desc.upload_id);
        let _guard = lock.lock().await;

        let dir = self.session_dir(&desc.upload_id);
        fsutil::create_dir_if_absent(&self.chunks_dir).await?;
        fsutil::create_dir_if_absent(&dir).await?;

        let mut session = match self.load_session(&desc.upload_id).await {
            Ok(session) => {
                session.check_compatible(desc)?;
                session
            }
            Err(ChunkError::NotFound(_)) => {
                debug!("Starting upload session");
                UploadSession::from_descriptor(desc)
            }
            Err(e) => return Err(e),
        };

        fsutil::write_file_atomic(&Self::chunk_path(&dir, desc.chunk_index), &payload).await?;
        CHUNKS_RECEIVED.inc();
        BYTES_RECEIVED.inc_by(actual);

        session.received = scan_received(&dir, session.total_chunks).await?;
        session.record_chunk(desc.chunk_index);
        self.save_session(&dir, &session).await?;

        if !session.is_complete() {
            return Ok(ChunkOutcome::Pending {
                percentage: session.percentage(),
            });
        }

        let assembled = self.assemble(&dir, &session).await?;
        if let Err(e) = fs::remove_dir_all(&dir).await {
            warn!(error = %e, "Failed to remove chunk directory after assembly");
        }
        self.release_lock(&desc.upload_id);
        UPLOADS_ASSEMBLED.inc();
        info!(
            stored_as = %assembled.stored_as,
            size = assembled.size,
            "Upload assembled"
        );
        Ok(ChunkOutcome::Complete(assembled))
    }

    /// Concatenate the chunks in index order into the upload directory.
    async fn assemble(&self, dir: &Path, session: &UploadSession) -> ChunkResult<AssembledUpload> {
        fsutil::create_dir_if_absent(&self.uploads_dir).await?;
        let stored = StoredName::generate(&session.filename);
        let target = self.uploads_dir.join(stored.as_str());
        let temp = fsutil::temp_sibling(&target);

        let result = async {
            let mut file = fs::File::create(&temp).await?;
            let mut hasher = Sha256::new();
            let mut size = 0u64;
            for index in 1..=session.total_chunks {
                let data = fs::read(Self::chunk_path(dir, index)).await?;
                hasher.update(&data);
                size += data.len() as u64;
                file.write_all(&data).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &target).await?;
            Ok::<_, std::io::Error>((size, hasher.finalize()))
        }
        .await;

        let (size, digest) = match result {
            Ok(v) => v,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(e.into());
            }
        };

        let path = fs::canonicalize(&target).await?;
        Ok(AssembledUpload {
            filename: session.filename.clone(),
            path,
            size,
            stored_as: stored.to_string(),
            sha256: hex_encode(&digest),
        })
    }

    async fn load_session(&self, upload_id: &UploadId) -> ChunkResult<UploadSession> {
        let dir = self.session_dir(upload_id);
        let data = match fs::read(dir.join(SESSION_FILE)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChunkError::NotFound(upload_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data).map_err(|source| ChunkError::Corrupt {
            upload_id: upload_id.to_string(),
            source,
        })
    }

    async fn save_session(&self, dir: &Path, session: &UploadSession) -> ChunkResult<()> {
        let data = serde_json::to_vec_pretty(session).map_err(|source| ChunkError::Corrupt {
            upload_id: session.upload_id.to_string(),
            source,
        })?;
        fsutil::write_file_atomic(&dir.join(SESSION_FILE), &data).await?;
        Ok(())
    }

    /// Current state of a partial upload.
    pub async fn status(&self, upload_id: &UploadId) -> ChunkResult<UploadSession> {
        let lock = self.lock_for(upload_id);
        let _guard = lock.lock().await;
        let result = async {
            let mut session = self.load_session(upload_id).await?;
            session.received =
                scan_received(&self.session_dir(upload_id), session.total_chunks).await?;
            Ok(session)
        }
        .await;
        self.release_lock(upload_id);
        result
    }

    /// Abort a partial upload and delete its chunks.
    ///
    /// Returns `false` when there was nothing to remove.
    #[instrument(skip(self), fields(upload_id = %upload_id))]
    pub async fn abort(&self, upload_id: &UploadId) -> ChunkResult<bool> {
        let lock = self.lock_for(upload_id);
        let _guard = lock.lock().await;
        let removed = match fs::remove_dir_all(self.session_dir(upload_id)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                self.release_lock(upload_id);
                return Err(e.into());
            }
        };
        self.release_lock(upload_id);
        if removed {
            info!("Upload session aborted");
        }
        Ok(removed)
    }

    /// Remove sessions that saw no chunk for longer than `ttl`.
    ///
    /// Sessions with a request in flight are skipped and picked up by a
    /// later sweep.
    pub async fn sweep(&self, ttl: time::Duration, now: OffsetDateTime) -> ChunkResult<Vec<UploadId>> {
        let mut entries = match fs::read_dir(&self.chunks_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut swept = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Ok(upload_id) = UploadId::parse(&name.to_string_lossy()) else {
                continue;
            };

            let lock = self.lock_for(&upload_id);
            let Ok(_guard) = lock.try_lock() else {
                continue;
            };

            let idle = match self.load_session(&upload_id).await {
                Ok(session) => session.is_idle(now, ttl),
                Err(_) => {
                    // No readable session file; fall back to the directory mtime.
                    let modified = entry.metadata().await?.modified()?;
                    now - OffsetDateTime::from(modified) > ttl
                }
            };

            if idle {
                match fs::remove_dir_all(entry.path()).await {
                    Ok(()) => {
                        UPLOAD_SESSIONS_SWEPT.inc();
                        swept.push(upload_id.clone());
                    }
                    Err(e) => warn!(upload_id = %upload_id, error = %e, "Failed to sweep upload session"),
                }
            }
            self.release_lock(&upload_id);
        }
        Ok(swept)
    }
}

/// Chunk indices present in a session directory.
async fn scan_received(dir: &Path, total_chunks: u32) -> std::io::Result<BTreeSet<u32>> {
    let mut received = BTreeSet::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(index) = name
            .to_str()
            .and_then(|n| n.strip_prefix(CHUNK_PREFIX))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if (1..=total_chunks).contains(&index) {
            received.insert(index);
        }
    }
    Ok(received)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver(root: &Path) -> ChunkReceiver {
        ChunkReceiver::new(root.join("chunks"), root.join("uploads"), 1024, 1 << 20)
    }

    fn desc(id: &str, index: u32, chunk_size: u64, total_size: u64) -> ChunkDescriptor {
        ChunkDescriptor {
            upload_id: UploadId::parse(id).unwrap(),
            chunk_index: index,
            chunk_size,
            total_size,
            filename: "site.zip".to_string(),
            total_chunks: None,
        }
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn assembles_out_of_order_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());
        let original = data(25);

        // 25 bytes at 10 per chunk: two chunks, the last one carries 15.
        let second = Bytes::copy_from_slice(&original[10..]);
        let first = Bytes::copy_from_slice(&original[..10]);

        match rx.receive(&desc("u1", 2, 10, 25), second).await.unwrap() {
            ChunkOutcome::Pending { percentage } => assert_eq!(percentage, 50),
            other => panic!("expected pending, got {other:?}"),
        }
        let ChunkOutcome::Complete(done) = rx.receive(&desc("u1", 1, 10, 25), first).await.unwrap()
        else {
            panic!("expected completion");
        };

        assert_eq!(done.filename, "site.zip");
        assert_eq!(done.size, 25);
        assert!(done.stored_as.ends_with(".zip"));
        assert!(done.path.is_absolute());
        assert_eq!(std::fs::read(&done.path).unwrap(), original);
        assert_eq!(done.sha256.len(), 64);
        assert!(!dir.path().join("chunks/u1").exists());
    }

    #[tokio::test]
    async fn rejects_wrong_chunk_length() {
        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());
        let err = rx
            .receive(&desc("u2", 1, 10, 25), Bytes::from(vec![0u8; 9]))
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkError::LengthMismatch { expected: 10, actual: 9, .. }));
    }

    #[tokio::test]
    async fn rejects_oversized_chunks_and_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());
        let err = rx
            .receive(&desc("u3", 1, 4096, 8192), Bytes::from(vec![0u8; 4096]))
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkError::Invalid(_)));

        let err = rx
            .receive(&desc("u3", 1, 1024, 4 << 20), Bytes::from(vec![0u8; 1024]))
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn resending_a_chunk_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());
        let chunk = Bytes::from(vec![7u8; 10]);
        for _ in 0..3 {
            rx.receive(&desc("u4", 1, 10, 30), chunk.clone()).await.unwrap();
        }
        let session = rx.status(&UploadId::parse("u4").unwrap()).await.unwrap();
        assert_eq!(session.received.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(session.percentage(), 33);
    }

    #[tokio::test]
    async fn abort_removes_session() {
        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());
        let id = UploadId::parse("u5").unwrap();
        rx.receive(&desc("u5", 1, 10, 30), Bytes::from(vec![1u8; 10]))
            .await
            .unwrap();
        assert!(rx.abort(&id).await.unwrap());
        assert!(!rx.abort(&id).await.unwrap());
        assert!(matches!(rx.status(&id).await, Err(ChunkError::NotFound(_))));
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());
        rx.receive(&desc("old", 1, 10, 30), Bytes::from(vec![1u8; 10]))
            .await
            .unwrap();
        rx.receive(&desc("fresh", 1, 10, 30), Bytes::from(vec![1u8; 10]))
            .await
            .unwrap();

        let ttl = time::Duration::hours(24);
        let swept = rx.sweep(ttl, OffsetDateTime::now_utc()).await.unwrap();
        assert!(swept.is_empty());

        let later = OffsetDateTime::now_utc() + time::Duration::hours(25);
        let mut swept = rx.sweep(ttl, later).await.unwrap();
        swept.sort();
        assert_eq!(swept.len(), 2);
        assert!(!dir.path().join("chunks/old").exists());
        assert!(!dir.path().join("chunks/fresh").exists());
    }

    #[tokio::test]
    async fn shuffled_arrival_reassembles_identically() {
        use rand::SeedableRng;
        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;

        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());
        let original = data(48 * 1000);
        let expected = hex_encode(&Sha256::digest(&original));

        for seed in [7u64, 42, 1337] {
            let id = format!("shuffled{seed}");
            let mut order: Vec<u32> = (1..=48).collect();
            order.shuffle(&mut StdRng::seed_from_u64(seed));

            let mut completed = None;
            for (n, index) in order.iter().enumerate() {
                let start = (*index as usize - 1) * 1000;
                let chunk = Bytes::copy_from_slice(&original[start..start + 1000]);
                match rx.receive(&desc(&id, *index, 1000, 48_000), chunk).await.unwrap() {
                    ChunkOutcome::Pending { .. } => assert!(n + 1 < order.len(), "seed {seed}"),
                    ChunkOutcome::Complete(done) => completed = Some(done),
                }
            }

            let done = completed.unwrap_or_else(|| panic!("seed {seed}: never completed"));
            assert_eq!(done.size, 48_000);
            assert_eq!(done.sha256, expected, "seed {seed}");
            assert_eq!(std::fs::read(&done.path).unwrap(), original, "seed {seed}");
        }
    }

    #[tokio::test]
    async fn sweep_falls_back_to_directory_age() {
        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());
        rx.receive(&desc("broken", 1, 10, 30), Bytes::from(vec![1u8; 10]))
            .await
            .unwrap();
        std::fs::write(dir.path().join("chunks/broken").join(SESSION_FILE), b"{not json").unwrap();

        let ttl = time::Duration::hours(24);
        assert!(rx.sweep(ttl, OffsetDateTime::now_utc()).await.unwrap().is_empty());
        let later = OffsetDateTime::now_utc() + time::Duration::hours(25);
        assert_eq!(rx.sweep(ttl, later).await.unwrap().len(), 1);
        assert!(!dir.path().join("chunks/broken").exists());
    }

    #[tokio::test]
    async fn concurrent_chunks_assemble_once() {
        let dir = tempfile::tempdir().unwrap();
        let rx = Arc::new(receiver(dir.path()));
        let original = data(80);

        let mut handles = Vec::new();
        for index in (1..=8u32).rev() {
            let rx = rx.clone();
            let start = (index as usize - 1) * 10;
            let chunk = Bytes::copy_from_slice(&original[start..start + 10]);
            handles.push(tokio::spawn(async move {
                rx.receive(&desc("par", index, 10, 80), chunk).await.unwrap()
            }));
        }

        let mut completed = Vec::new();
        for handle in handles {
            if let ChunkOutcome::Complete(done) = handle.await.unwrap() {
                completed.push(done);
            }
        }
        assert_eq!(completed.len(), 1);
        assert_eq!(std::fs::read(&completed[0].path).unwrap(), original);
    }
}
