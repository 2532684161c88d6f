//! Job enqueuer: writes the initial status record and launches the worker.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{JOBS_ENQUEUED, WORKER_SPAWN_FAILURES};
use crate::supervisor::WorkerSupervisor;
use hauler_core::config::AppConfig;
use hauler_core::{ArchiveSource, DestinationId, JobId, JobStatusRecord};
use hauler_jobs::JobStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

pub const DESTINATION_TAKEN: &str = "The destination has already been taken.";
pub const SPAWN_FAILED: &str = "Import worker could not be started.";

/// An accepted import job.
#[derive(Clone, Debug, Serialize)]
pub struct EnqueuedJob {
    pub job_id: JobId,
    pub status_url: String,
}

#[derive(Clone)]
pub struct JobEnqueuer {
    config: Arc<AppConfig>,
    store: JobStore,
    supervisor: Arc<WorkerSupervisor>,
}

impl JobEnqueuer {
    pub fn new(config: Arc<AppConfig>, store: JobStore, supervisor: Arc<WorkerSupervisor>) -> Self {
        Self {
            config,
            store,
            supervisor,
        }
    }

    /// Record a queued job and start its worker without waiting for it.
    ///
    /// Nothing is spawned unless the record was written. If the worker
    /// cannot be started the record is failed before the error is returned.
    #[instrument(skip_all, fields(destination = %destination, user_id = user_id))]
    pub async fn enqueue(
        &self,
        destination: DestinationId,
        source: &ArchiveSource,
        user_id: &str,
    ) -> ApiResult<EnqueuedJob> {
        if let Some(holder) = self.store.find_holder(&destination).await? {
            tracing::debug!(holder = %holder, "Destination already claimed");
            return Err(ApiError::field("destination", DESTINATION_TAKEN));
        }

        let job_id = JobId::new();
        let record = JobStatusRecord::queued(destination, user_id, source);
        self.store.create(&job_id, &record).await?;

        if let Err(e) = self.supervisor.spawn(&job_id, &record).await {
            WORKER_SPAWN_FAILURES.inc();
            if let Err(store_err) = self.store.fail_if_active(&job_id, SPAWN_FAILED).await {
                tracing::error!(
                    job_id = %job_id,
                    error = %store_err,
                    "Failed to record worker spawn failure"
                );
            }
            return Err(ApiError::WorkerSpawn(e));
        }

        JOBS_ENQUEUED.inc();
        info!(job_id = %job_id, source = %source.kind, "Import job enqueued");
        Ok(EnqueuedJob {
            status_url: self.config.status_url(&job_id),
            job_id,
        })
    }
}
