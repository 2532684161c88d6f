//! Failing jobs whose worker stopped reporting.

use crate::error::JobResult;
use crate::store::JobStore;
use hauler_core::JobId;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Message written to jobs reaped for missing heartbeats.
pub const WORKER_VANISHED: &str = "failed: worker vanished";

/// Mark every non-terminal job silent for longer than `stale_after` as failed.
///
/// A job's last sign of life is its heartbeat, or its creation time if the
/// worker never reported. Returns the ids of the reaped jobs.
pub async fn reap_stale_jobs(
    store: &JobStore,
    stale_after: Duration,
    now: OffsetDateTime,
) -> JobResult<Vec<JobId>> {
    let stale_after = time::Duration::try_from(stale_after).unwrap_or(time::Duration::MAX);
    let mut reaped = Vec::new();

    for (job_id, record) in store.list().await? {
        if record.is_terminal() || now - record.last_seen() <= stale_after {
            continue;
        }
        match store.fail_if_active(&job_id, WORKER_VANISHED).await {
            Ok(true) => {
                warn!(
                    job_id = %job_id,
                    status = %record.status,
                    last_seen = %record.last_seen(),
                    "Reaped stale import job"
                );
                reaped.push(job_id);
            }
            Ok(false) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to reap stale job"),
        }
    }

    if !reaped.is_empty() {
        info!(count = reaped.len(), "Stale job sweep finished");
    }
    Ok(reaped)
}
