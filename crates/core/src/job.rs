//! Import job identifiers, status enum and the persisted status record.

use crate::destination::DestinationId;
use crate::source::{ArchiveSource, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum accepted length of a job id.
const MAX_JOB_ID_LEN: usize = 64;

/// Record keys that worker metadata may not shadow.
pub const RESERVED_RECORD_KEYS: &[&str] = &[
    "job_id",
    "status",
    "progress",
    "message",
    "created_at",
    "updated_at",
    "heartbeat_at",
    "destination",
    "user_id",
    "archive_path",
    "source",
];

/// Opaque unique identifier for an import job.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse a job id received from a client.
    ///
    /// Accepts 1-64 characters of `[A-Za-z0-9-]`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || s.len() > MAX_JOB_ID_LEN {
            return Err(crate::Error::InvalidJobId(format!(
                "length must be between 1 and {MAX_JOB_ID_LEN}"
            )));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(crate::Error::InvalidJobId(format!(
                "unexpected characters in {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of an import job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Record written, worker not yet reporting.
    Queued,
    /// Worker has started the import.
    Running,
    /// Import finished successfully.
    Succeeded,
    /// Import failed or the worker vanished.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Check if the status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether a record in this state may be replaced by one in `next`.
    ///
    /// Terminal states only accept rewrites with the same status, and a
    /// running job never goes back to queued.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            Self::Queued => true,
            Self::Running => next != Self::Queued,
            Self::Succeeded | Self::Failed => next == *self,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable status record of one import job.
///
/// This is the only channel between the detached worker and polling clients.
/// Writes replace the whole record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub status: JobStatus,
    /// Percentage complete (0-100), absent when the worker cannot estimate.
    pub progress: Option<u8>,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Last liveness signal from the worker.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub heartbeat_at: Option<OffsetDateTime>,
    pub destination: DestinationId,
    pub user_id: String,
    pub archive_path: PathBuf,
    pub source: SourceKind,
    /// Worker-supplied metadata (e.g. `site_id`, `redirect`).
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl JobStatusRecord {
    /// Initial record written by the enqueuer before the worker spawns.
    pub fn queued(destination: DestinationId, user_id: &str, archive: &ArchiveSource) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            status: JobStatus::Queued,
            progress: Some(0),
            message: "Queued".to_string(),
            created_at: now,
            updated_at: now,
            heartbeat_at: None,
            destination,
            user_id: user_id.to_string(),
            archive_path: archive.path.clone(),
            source: archive.kind,
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Validate that `next` may replace this record.
    pub fn check_replacement(&self, next: &JobStatusRecord) -> crate::Result<()> {
        if self.status.can_transition_to(next.status) {
            Ok(())
        } else {
            Err(crate::Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.status.to_string(),
            })
        }
    }

    /// Time of the most recent sign of life for this job.
    pub fn last_seen(&self) -> OffsetDateTime {
        self.heartbeat_at.unwrap_or(self.created_at)
    }

    pub fn mark_running(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Running;
        self.message = message.into();
        self.touch();
    }

    /// Record progress; values above 100 are clamped.
    pub fn set_progress(&mut self, progress: u8, message: Option<String>) {
        self.progress = Some(progress.min(100));
        if let Some(message) = message {
            self.message = message;
        }
        self.touch();
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.touch();
    }

    pub fn succeed(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Succeeded;
        self.progress = Some(100);
        self.message = message.into();
        self.touch();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.message = message.into();
        self.touch();
    }

    /// Refresh the heartbeat without changing anything else.
    pub fn heartbeat(&mut self) {
        self.touch();
    }

    /// Worker metadata is flattened into the record, so its keys may not
    /// collide with record fields.
    pub fn check_metadata_key(key: &str) -> crate::Result<()> {
        if RESERVED_RECORD_KEYS.contains(&key) {
            return Err(crate::Error::ReservedMetadataKey(key.to_string()));
        }
        Ok(())
    }

    fn touch(&mut self) {
        let now = OffsetDateTime::now_utc();
        self.updated_at = now;
        self.heartbeat_at = Some(now);
    }
}

/// A status record as returned to clients: the record merged with its id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    #[serde(flatten)]
    pub record: JobStatusRecord,
}

impl JobStatusView {
    pub fn new(job_id: JobId, record: JobStatusRecord) -> Self {
        Self { job_id, record }
    }

    pub fn is_terminal(&self) -> bool {
        self.record.is_terminal()
    }
}
