//! Application state shared across handlers.

use crate::chunks::ChunkReceiver;
use crate::enqueue::JobEnqueuer;
use crate::source::ArchiveSourceResolver;
use crate::supervisor::WorkerSupervisor;
use hauler_core::config::AppConfig;
use hauler_jobs::JobStore;
use hauler_storage::KeyValueStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Job status records.
    pub jobs: JobStore,
    /// Chunked upload sessions.
    pub chunks: Arc<ChunkReceiver>,
    pub resolver: ArchiveSourceResolver,
    pub enqueuer: JobEnqueuer,
    /// Import worker processes.
    pub supervisor: Arc<WorkerSupervisor>,
}

impl AppState {
    /// Create a new application state over the given job record store.
    pub fn new(config: AppConfig, kv: Arc<dyn KeyValueStore>) -> Self {
        let config = Arc::new(config);
        let jobs = JobStore::new(kv);
        let supervisor = Arc::new(WorkerSupervisor::new(
            jobs.clone(),
            &config.worker,
            &config.storage,
        ));
        let chunks = Arc::new(ChunkReceiver::new(
            config.storage.chunks_dir(),
            config.storage.uploads_dir(),
            config.server.max_chunk_size,
            config.server.max_archive_size,
        ));
        let resolver = ArchiveSourceResolver::new(config.storage.imports_dir());
        let enqueuer = JobEnqueuer::new(config.clone(), jobs.clone(), supervisor.clone());

        Self {
            config,
            jobs,
            chunks,
            resolver,
            enqueuer,
            supervisor,
        }
    }
}
