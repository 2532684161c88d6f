//! Resumable chunked uploads.
//!
//! Chunks go out one at a time. Each chunk is retried on transport and
//! server errors, and chunks the server already holds (from an interrupted
//! earlier run) are skipped.

use crate::api_client::{ApiClient, AssembledUpload, ChunkResponse, ChunkUpload, ClientError};
use anyhow::{Context, Result};
use hauler_core::{ChunkDescriptor, DEFAULT_CHUNK_SIZE, UploadId};
use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub chunk_size: u64,
    /// Retries per chunk after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub retry_delay: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Upload id derived from size and name, stable across runs so an
/// interrupted upload resumes: `10485760-backupzip`.
pub fn upload_identifier(size: u64, filename: &str) -> String {
    let name: String = filename
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        .collect();
    format!("{size}-{name}")
}

pub struct ChunkedUploader<'a> {
    client: &'a ApiClient,
    options: UploadOptions,
}

impl<'a> ChunkedUploader<'a> {
    pub fn new(client: &'a ApiClient, options: UploadOptions) -> Self {
        Self { client, options }
    }

    /// Upload a file and return the server-side assembled archive.
    ///
    /// `on_progress` receives the percentage after each stored chunk.
    pub async fn upload_file(
        &self,
        path: &Path,
        mut on_progress: impl FnMut(u8),
    ) -> Result<AssembledUpload> {
        let total_size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?
            .len();
        if total_size == 0 {
            anyhow::bail!("{} is empty", path.display());
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("{} has no usable file name", path.display()))?
            .to_string();

        let upload_id = upload_identifier(total_size, &filename);
        let desc = ChunkDescriptor {
            upload_id: UploadId::parse(&upload_id)?,
            chunk_index: 1,
            chunk_size: self.options.chunk_size,
            total_size,
            filename: filename.clone(),
            total_chunks: None,
        };
        let total_chunks = desc.expected_chunks();

        let received: BTreeSet<u32> = match self.client.upload_state(&upload_id).await? {
            Some(state) if state.total_chunks == total_chunks => {
                debug!(upload_id, received = state.received.len(), "Resuming upload");
                state.received.into_iter().collect()
            }
            _ => BTreeSet::new(),
        };

        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;

        for index in 1..=total_chunks {
            if received.contains(&index) {
                continue;
            }
            let len = desc
                .expected_len(index)
                .ok_or_else(|| anyhow::anyhow!("chunk {index} does not fit the file size"))?;
            let offset = u64::from(index - 1) * self.options.chunk_size;
            let mut data = vec![0u8; usize::try_from(len)?];
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut data).await?;

            let chunk = ChunkUpload {
                upload_id: upload_id.clone(),
                chunk_index: index,
                chunk_size: self.options.chunk_size,
                total_size,
                filename: filename.clone(),
                data,
            };
            match self
                .send_with_retry(&chunk)
                .await
                .with_context(|| format!("chunk {index}/{total_chunks} failed"))?
            {
                ChunkResponse::Complete { upload, .. } => {
                    on_progress(100);
                    return Ok(upload);
                }
                ChunkResponse::Pending { percentage, .. } => {
                    on_progress(percentage.unwrap_or_default());
                }
            }
        }

        anyhow::bail!("server did not assemble upload {upload_id}")
    }

    async fn send_with_retry(&self, chunk: &ChunkUpload) -> Result<ChunkResponse, ClientError> {
        let mut attempt = 0;
        loop {
            match self.client.upload_chunk(chunk).await {
                Err(e) if e.is_retryable() && attempt < self.options.max_retries => {
                    attempt += 1;
                    let delay = self.options.retry_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        chunk = chunk.chunk_index,
                        attempt,
                        error = %e,
                        "Chunk upload failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}
