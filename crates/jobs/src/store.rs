//! Durable job id -> status record mapping.

use crate::error::{JobError, JobResult};
use bytes::Bytes;
use hauler_core::{DestinationId, JobId, JobStatus, JobStatusRecord};
use hauler_storage::{KeyValueStore, StorageError};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Key prefix of job records in the key-value store.
const JOBS_PREFIX: &str = "jobs";

/// Typed access to job status records.
///
/// Every write replaces the whole record. Replacements are validated against
/// the stored record and land through a compare-and-swap, so a terminal job
/// can never go back to queued/running, whichever process writes.
#[derive(Clone)]
pub struct JobStore {
    kv: Arc<dyn KeyValueStore>,
}

impl JobStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn key(job_id: &JobId) -> String {
        format!("{JOBS_PREFIX}/{job_id}.json")
    }

    fn encode(record: &JobStatusRecord) -> JobResult<Bytes> {
        let mut json = serde_json::to_vec_pretty(record)?;
        json.push(b'\n');
        Ok(Bytes::from(json))
    }

    fn decode(key: &str, data: &[u8]) -> JobResult<JobStatusRecord> {
        serde_json::from_slice(data).map_err(|source| JobError::Corrupt {
            key: key.to_string(),
            source,
        })
    }

    /// Write the initial record of a new job.
    ///
    /// Fails with `AlreadyExists` rather than overwrite an existing job.
    #[instrument(skip(self, record), fields(job_id = %job_id, status = %record.status))]
    pub async fn create(&self, job_id: &JobId, record: &JobStatusRecord) -> JobResult<()> {
        let data = Self::encode(record)?;
        if self.kv.put_if_absent(&Self::key(job_id), data).await? {
            Ok(())
        } else {
            Err(JobError::AlreadyExists(job_id.to_string()))
        }
    }

    /// Read the current record of a job.
    pub async fn get(&self, job_id: &JobId) -> JobResult<JobStatusRecord> {
        let key = Self::key(job_id);
        match self.kv.get(&key).await {
            Ok(data) => Self::decode(&key, &data),
            Err(StorageError::NotFound(_)) => Err(JobError::NotFound(job_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a job's record.
    ///
    /// The stored record must exist and must allow the status transition.
    #[instrument(skip(self, record), fields(job_id = %job_id, status = %record.status))]
    pub async fn put(&self, job_id: &JobId, record: &JobStatusRecord) -> JobResult<()> {
        self.swap(job_id, |_| Ok(Some(record.clone()))).await?;
        Ok(())
    }

    /// Apply `mutate` to the current record and store the result.
    pub async fn update<F>(&self, job_id: &JobId, mut mutate: F) -> JobResult<JobStatusRecord>
    where
        F: FnMut(&mut JobStatusRecord),
    {
        let next = self
            .swap(job_id, |current| {
                let mut next = current.clone();
                mutate(&mut next);
                Ok(Some(next))
            })
            .await?;
        next.ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Like [`update`](Self::update), but a terminal record is never touched.
    ///
    /// Lets a worker notice that its job was finalized by someone else.
    pub async fn update_active<F>(&self, job_id: &JobId, mut mutate: F) -> JobResult<JobStatusRecord>
    where
        F: FnMut(&mut JobStatusRecord),
    {
        let next = self
            .swap(job_id, |current| {
                if current.is_terminal() {
                    return Err(JobError::InvalidTransition {
                        from: current.status.to_string(),
                        to: "update".to_string(),
                    });
                }
                let mut next = current.clone();
                mutate(&mut next);
                Ok(Some(next))
            })
            .await?;
        next.ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Fail a job unless it already reached a terminal state.
    ///
    /// Returns `true` when the record was changed.
    pub async fn fail_if_active(&self, job_id: &JobId, message: &str) -> JobResult<bool> {
        let next = self
            .swap(job_id, |current| {
                if current.is_terminal() {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.fail(message);
                Ok(Some(next))
            })
            .await?;
        Ok(next.is_some())
    }

    /// Read-check-write cycle on one record.
    ///
    /// `decide` sees the stored record and returns its replacement, or `None`
    /// to leave it alone. The write only lands if the record is unchanged
    /// since it was read; otherwise `decide` runs again on the newer record.
    /// Every replacement is checked against the record it replaces, so
    /// concurrent writers in other processes cannot revive a terminal job.
    async fn swap<F>(&self, job_id: &JobId, mut decide: F) -> JobResult<Option<JobStatusRecord>>
    where
        F: FnMut(&JobStatusRecord) -> JobResult<Option<JobStatusRecord>>,
    {
        let key = Self::key(job_id);
        loop {
            let data = self.get_raw(job_id).await?;
            let current = Self::decode(&key, &data)?;
            let Some(next) = decide(&current)? else {
                return Ok(None);
            };
            current.check_replacement(&next)?;
            match self.kv.compare_and_swap(&key, &data, Self::encode(&next)?).await {
                Ok(true) => return Ok(Some(next)),
                Ok(false) => debug!(job_id = %job_id, "Job record changed underneath, retrying"),
                Err(StorageError::NotFound(_)) => return Err(JobError::NotFound(job_id.to_string())),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// List all job records, oldest first.
    ///
    /// Unreadable records are skipped with a warning.
    pub async fn list(&self) -> JobResult<Vec<(JobId, JobStatusRecord)>> {
        let keys = self.kv.list(JOBS_PREFIX).await?;
        let mut jobs = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(id) = key
                .strip_prefix(JOBS_PREFIX)
                .and_then(|k| k.strip_prefix('/'))
                .and_then(|k| k.strip_suffix(".json"))
            else {
                continue;
            };
            let Ok(job_id) = JobId::parse(id) else {
                warn!(key = %key, "Skipping job record with invalid id");
                continue;
            };
            let data = match self.kv.get(&key).await {
                Ok(data) => data,
                // Deleted between list and get
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            match Self::decode(&key, &data) {
                Ok(record) => jobs.push((job_id, record)),
                Err(e) => warn!(error = %e, "Skipping unreadable job record"),
            }
        }
        jobs.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then_with(|| a.0.cmp(&b.0)));
        Ok(jobs)
    }

    /// Find a job that holds a destination: queued, running or succeeded.
    pub async fn find_holder(&self, destination: &DestinationId) -> JobResult<Option<JobId>> {
        let jobs = self.list().await?;
        Ok(jobs
            .into_iter()
            .find(|(_, r)| &r.destination == destination && r.status != JobStatus::Failed)
            .map(|(id, _)| id))
    }

    /// Raw stored bytes of a record, for diagnostics and tests.
    pub async fn get_raw(&self, job_id: &JobId) -> JobResult<Bytes> {
        match self.kv.get(&Self::key(job_id)).await {
            Ok(data) => Ok(data),
            Err(StorageError::NotFound(_)) => Err(JobError::NotFound(job_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.kv.backend_name()
    }

    /// Check that the backing store is reachable.
    pub async fn health_check(&self) -> JobResult<()> {
        Ok(self.kv.health_check().await?)
    }
}
