//! Supervision of detached import workers.
//!
//! Workers run in their own process group so they outlive request handling
//! and server restarts. The supervisor keeps each child's handle and a
//! watchdog periodically fails jobs whose worker is gone:
//!
//! - the child exited but the record is still queued or running
//! - the record's heartbeat is older than `stale_after`, which also covers
//!   workers orphaned by a previous server process

use crate::metrics::{WORKERS_ACTIVE, record_reaped};
use hauler_core::config::{StorageConfig, WorkerConfig};
use hauler_core::{JobId, JobStatusRecord};
use hauler_jobs::{JobStore, WORKER_VANISHED, reap_stale_jobs};
use hauler_storage::fsutil;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Spawns import workers and fails the jobs of workers that vanished.
pub struct WorkerSupervisor {
    /// Map of job_id -> worker process
    children: Mutex<HashMap<JobId, Child>>,
    store: JobStore,
    program: PathBuf,
    import_command: Vec<String>,
    data_dir: PathBuf,
    logs_dir: PathBuf,
    heartbeat_interval: Duration,
    stale_after: Duration,
    watchdog_interval: Duration,
}

impl WorkerSupervisor {
    pub fn new(store: JobStore, worker: &WorkerConfig, storage: &StorageConfig) -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            store,
            program: worker.program.clone(),
            import_command: worker.import_command.clone(),
            data_dir: storage.data_dir.clone(),
            logs_dir: storage.logs_dir(),
            heartbeat_interval: worker.heartbeat_interval(),
            stale_after: worker.stale_after(),
            watchdog_interval: worker.watchdog_interval(),
        }
    }

    /// Launch the worker for a freshly created job.
    ///
    /// The worker's stdout and stderr go to `logs/<job_id>.log`. Returns the
    /// worker's process id.
    pub async fn spawn(&self, job_id: &JobId, record: &JobStatusRecord) -> std::io::Result<u32> {
        fsutil::create_dir_if_absent(&self.logs_dir).await?;
        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.logs_dir.join(format!("{job_id}.log")))
            .await?
            .into_std()
            .await;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("--job-id")
            .arg(job_id.as_str())
            .arg("--destination")
            .arg(record.destination.as_str())
            .arg("--user-id")
            .arg(&record.user_id)
            .arg("--archive")
            .arg(&record.archive_path)
            .arg("--data-dir")
            .arg(&self.data_dir)
            .arg("--heartbeat-secs")
            .arg(self.heartbeat_interval.as_secs().max(1).to_string())
            .arg("--")
            .args(&self.import_command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        let pid = child.id().unwrap_or_default();

        let mut children = self.children.lock().await;
        children.insert(job_id.clone(), child);
        WORKERS_ACTIVE.set(children.len() as i64);
        tracing::info!(job_id = %job_id, pid, "Import worker spawned");
        Ok(pid)
    }

    /// Number of workers currently tracked.
    pub async fn active(&self) -> usize {
        self.children.lock().await.len()
    }

    /// Spawn the watchdog loop.
    /// Returns the watchdog's JoinHandle (caller should keep it to prevent early termination).
    pub fn spawn_watchdog(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.watchdog_interval).await;
                self.check_workers().await;
            }
        })
    }

    /// One watchdog pass. Returns the number of jobs marked failed.
    pub async fn check_workers(&self) -> usize {
        let mut exited = Vec::new();

        // Collect exited children (hold the mutex only briefly)
        {
            let mut children = self.children.lock().await;
            let mut finished = Vec::new();
            for (job_id, child) in children.iter_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => finished.push((job_id.clone(), Some(status))),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to poll import worker");
                        finished.push((job_id.clone(), None));
                    }
                }
            }
            for (job_id, status) in finished {
                children.remove(&job_id);
                exited.push((job_id, status));
            }
            WORKERS_ACTIVE.set(children.len() as i64);
        }

        let mut reaped = 0;
        for (job_id, status) in exited {
            let message = vanished_message(status);
            match self.store.fail_if_active(&job_id, &message).await {
                Ok(true) => {
                    tracing::error!(
                        job_id = %job_id,
                        status = ?status,
                        "Import worker exited without finishing the job"
                    );
                    reaped += 1;
                }
                Ok(false) => {
                    tracing::debug!(job_id = %job_id, status = ?status, "Import worker finished");
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to fail vanished job");
                }
            }
        }
        if reaped > 0 {
            record_reaped("exited", reaped);
        }

        match reap_stale_jobs(&self.store, self.stale_after, OffsetDateTime::now_utc()).await {
            Ok(stale) => {
                if !stale.is_empty() {
                    record_reaped("stale", stale.len());
                }
                reaped + stale.len()
            }
            Err(e) => {
                tracing::error!(error = %e, "Stale job sweep failed");
                reaped
            }
        }
    }
}

fn vanished_message(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => format!("{WORKER_VANISHED} ({status})"),
        None => WORKER_VANISHED.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hauler_core::config::AppConfig;
    use hauler_core::{ArchiveSource, DestinationId, JobStatus, SourceKind};
    use hauler_storage::MemoryStore;

    fn setup(program: &str, root: &std::path::Path) -> (JobStore, WorkerSupervisor) {
        let mut config = AppConfig::for_testing(root);
        config.worker.program = PathBuf::from(program);
        let store = JobStore::new(Arc::new(MemoryStore::new()));
        let supervisor = WorkerSupervisor::new(store.clone(), &config.worker, &config.storage);
        (store, supervisor)
    }

    fn queued() -> JobStatusRecord {
        let source = ArchiveSource::new("/srv/site.zip", SourceKind::Path);
        JobStatusRecord::queued(DestinationId::parse("blog").unwrap(), "7", &source)
    }

    async fn wait_for_exit(supervisor: &WorkerSupervisor) -> usize {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let reaped = supervisor.check_workers().await;
            if supervisor.active().await == 0 {
                return reaped;
            }
            assert!(tokio::time::Instant::now() < deadline, "worker did not exit");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn exited_worker_fails_unfinished_job() {
        let dir = tempfile::tempdir().unwrap();
        let (store, supervisor) = setup("false", dir.path());
        let id = JobId::new();
        let record = queued();
        store.create(&id, &record).await.unwrap();

        supervisor.spawn(&id, &record).await.unwrap();
        assert_eq!(wait_for_exit(&supervisor).await, 1);

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.message.starts_with(WORKER_VANISHED), "{}", record.message);
        assert!(record.message.contains("exit status"), "{}", record.message);
        assert!(dir.path().join(format!("logs/{id}.log")).is_file());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn finished_job_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (store, supervisor) = setup("true", dir.path());
        let id = JobId::new();
        let record = queued();
        store.create(&id, &record).await.unwrap();
        store
            .update(&id, |r| r.succeed("Import completed."))
            .await
            .unwrap();

        supervisor.spawn(&id, &record).await.unwrap();
        assert_eq!(wait_for_exit(&supervisor).await, 0);
        assert_eq!(store.get(&id).await.unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, supervisor) = setup("/nonexistent/hauler-worker", dir.path());
        let err = supervisor.spawn(&JobId::new(), &queued()).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        assert_eq!(supervisor.active().await, 0);
    }
}
