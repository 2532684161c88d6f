//! Chunked upload descriptors and session state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use time::OffsetDateTime;

/// Maximum accepted length of a client-supplied upload id.
const MAX_UPLOAD_ID_LEN: usize = 128;

/// Client-chosen identifier of an in-progress chunked upload.
///
/// Resumable uploaders derive it from size and file name (for example
/// `10485760-backupzip`), so it is validated rather than generated.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadId(String);

impl UploadId {
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || s.len() > MAX_UPLOAD_ID_LEN {
            return Err(crate::Error::InvalidUploadId(format!(
                "length must be between 1 and {MAX_UPLOAD_ID_LEN}"
            )));
        }
        if s.contains("..") || s.starts_with('.') {
            return Err(crate::Error::InvalidUploadId(format!(
                "{s:?} is not a plain name"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(crate::Error::InvalidUploadId(format!(
                "unexpected characters in {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UploadId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<UploadId> for String {
    fn from(value: UploadId) -> Self {
        value.0
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one chunk of a chunked upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub upload_id: UploadId,
    /// 1-based chunk index.
    pub chunk_index: u32,
    /// Nominal chunk size chosen by the client.
    pub chunk_size: u64,
    /// Size of the complete file.
    pub total_size: u64,
    /// Original client file name, used for the stored extension.
    pub filename: String,
    /// Explicit chunk count; derived from the sizes when absent.
    #[serde(default)]
    pub total_chunks: Option<u32>,
}

impl ChunkDescriptor {
    /// Number of chunks the upload consists of.
    ///
    /// Without an explicit count the final chunk absorbs the remainder, so
    /// the count is `max(1, total_size / chunk_size)`.
    pub fn expected_chunks(&self) -> u32 {
        if let Some(n) = self.total_chunks {
            return n.max(1);
        }
        if self.chunk_size == 0 {
            return 1;
        }
        let n = (self.total_size / self.chunk_size).max(1);
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    /// Exact payload length chunk `index` must have.
    ///
    /// Every chunk but the last is `chunk_size` bytes; the last one carries
    /// the rest. `None` when the sizes and chunk count are inconsistent.
    pub fn expected_len(&self, index: u32) -> Option<u64> {
        let n = self.expected_chunks();
        if index == 0 || index > n {
            return None;
        }
        let before_last = u64::from(n - 1).checked_mul(self.chunk_size)?;
        let last = self.total_size.checked_sub(before_last)?;
        if last == 0 {
            return None;
        }
        if index < n {
            Some(self.chunk_size)
        } else {
            Some(last)
        }
    }

    /// Validate sizes and index against the configured maximum chunk size.
    pub fn validate(&self, max_chunk_size: u64) -> crate::Result<()> {
        if self.chunk_size == 0 || self.chunk_size > max_chunk_size {
            return Err(crate::Error::InvalidChunkSize {
                size: self.chunk_size,
                max: max_chunk_size,
            });
        }
        if self.total_size == 0 {
            return Err(crate::Error::InvalidChunk(
                "total size must be greater than zero".to_string(),
            ));
        }
        if self.filename.trim().is_empty() {
            return Err(crate::Error::InvalidChunk("filename is required".to_string()));
        }
        let expected = self.expected_chunks();
        if self.chunk_index == 0 || self.chunk_index > expected {
            return Err(crate::Error::InvalidChunk(format!(
                "chunk index {} out of range 1..={expected}",
                self.chunk_index
            )));
        }
        if self.expected_len(self.chunk_index).is_none() {
            return Err(crate::Error::InvalidChunk(format!(
                "{expected} chunks of {} bytes do not fit a total of {} bytes",
                self.chunk_size, self.total_size
            )));
        }
        Ok(())
    }
}

/// An in-progress chunked upload.
///
/// The received set is rebuilt from the chunk files on disk, so only the
/// descriptive fields are persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: UploadId,
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    #[serde(skip)]
    pub received: BTreeSet<u32>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UploadSession {
    /// Start a session from its first chunk descriptor.
    pub fn from_descriptor(desc: &ChunkDescriptor) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            upload_id: desc.upload_id.clone(),
            filename: desc.filename.clone(),
            total_size: desc.total_size,
            chunk_size: desc.chunk_size,
            total_chunks: desc.expected_chunks(),
            received: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check that a later chunk belongs to this session.
    pub fn check_compatible(&self, desc: &ChunkDescriptor) -> crate::Result<()> {
        if desc.total_size != self.total_size
            || desc.chunk_size != self.chunk_size
            || desc.expected_chunks() != self.total_chunks
        {
            return Err(crate::Error::InvalidChunk(format!(
                "chunk {} does not match upload {} (total size {}, chunk size {})",
                desc.chunk_index, self.upload_id, self.total_size, self.chunk_size
            )));
        }
        Ok(())
    }

    pub fn record_chunk(&mut self, index: u32) {
        self.received.insert(index);
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn is_complete(&self) -> bool {
        (1..=self.total_chunks).all(|i| self.received.contains(&i))
    }

    /// Whole-number share of chunks received.
    pub fn percentage(&self) -> u8 {
        if self.total_chunks == 0 {
            return 0;
        }
        let done = self.received.len().min(self.total_chunks as usize) as u64;
        (done * 100 / u64::from(self.total_chunks)) as u8
    }

    /// Indices not yet received, ascending.
    pub fn missing(&self) -> Vec<u32> {
        (1..=self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    /// Whether the session has seen no chunk for longer than `ttl`.
    pub fn is_idle(&self, now: OffsetDateTime, ttl: time::Duration) -> bool {
        now - self.updated_at > ttl
    }
}
