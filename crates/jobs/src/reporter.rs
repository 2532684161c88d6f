//! Status updates written by the detached worker.

use crate::error::JobResult;
use crate::store::JobStore;
use hauler_core::{JobId, JobStatusRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Writes a single job's status on behalf of its worker.
///
/// Updates go through [`JobStore::update_active`], so a record that is
/// already terminal is never written again, even when the reaper finalized
/// it from another process. Clones share a lock so the heartbeat task and
/// progress updates do not keep retrying against each other.
#[derive(Clone)]
pub struct StatusReporter {
    store: JobStore,
    job_id: JobId,
    write_lock: Arc<Mutex<()>>,
}

impl StatusReporter {
    pub fn new(store: JobStore, job_id: JobId) -> Self {
        Self {
            store,
            job_id,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn update<F>(&self, mutate: F) -> JobResult<JobStatusRecord>
    where
        F: FnMut(&mut JobStatusRecord),
    {
        let _guard = self.write_lock.lock().await;
        self.store.update_active(&self.job_id, mutate).await
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub async fn current(&self) -> JobResult<JobStatusRecord> {
        self.store.get(&self.job_id).await
    }

    pub async fn running(&self, message: &str) -> JobResult<JobStatusRecord> {
        self.update(|r| r.mark_running(message)).await
    }

    pub async fn progress(&self, progress: u8, message: Option<String>) -> JobResult<JobStatusRecord> {
        self.update(|r| r.set_progress(progress, message.clone())).await
    }

    pub async fn message(&self, message: &str) -> JobResult<JobStatusRecord> {
        self.update(|r| r.set_message(message)).await
    }

    /// Attach worker metadata such as the created site id.
    pub async fn metadata(&self, key: &str, value: serde_json::Value) -> JobResult<JobStatusRecord> {
        JobStatusRecord::check_metadata_key(key)?;
        self.update(|r| {
            r.metadata.insert(key.to_string(), value.clone());
            r.heartbeat();
        })
        .await
    }

    pub async fn heartbeat(&self) -> JobResult<JobStatusRecord> {
        self.update(|r| r.heartbeat()).await
    }

    pub async fn succeed(&self, message: &str) -> JobResult<JobStatusRecord> {
        self.update(|r| r.succeed(message)).await
    }

    pub async fn fail(&self, message: &str) -> JobResult<JobStatusRecord> {
        self.update(|r| r.fail(message)).await
    }

    /// Refresh the heartbeat every `interval` until the job is terminal or
    /// the returned handle is aborted.
    pub fn spawn_heartbeat(&self, interval: Duration) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match reporter.current().await {
                    Ok(record) if record.is_terminal() => {
                        debug!(job_id = %reporter.job_id, "Job terminal, heartbeat stopping");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(job_id = %reporter.job_id, error = %e, "Heartbeat read failed");
                        continue;
                    }
                }
                if let Err(e) = reporter.heartbeat().await {
                    warn!(job_id = %reporter.job_id, error = %e, "Heartbeat write failed");
                }
            }
        })
    }
}
