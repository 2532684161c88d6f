//! Job status store for hauler import jobs.
//!
//! Job records live in a [`hauler_storage::KeyValueStore`] as one
//! pretty-printed JSON document per job id. The enqueuer creates them, the
//! detached worker updates them through a [`StatusReporter`], and the
//! supervisor's [`reap_stale_jobs`] fails jobs whose worker went silent.

pub mod error;
pub mod reaper;
pub mod reporter;
pub mod store;

pub use error::{JobError, JobResult};
pub use reaper::{WORKER_VANISHED, reap_stale_jobs};
pub use reporter::StatusReporter;
pub use store::JobStore;
