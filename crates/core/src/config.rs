//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally visible base URL used to build absolute `status_url`s.
    /// When unset, status URLs are relative paths.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Maximum accepted chunk size in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Maximum request body for a direct (non-chunked) archive upload.
    #[serde(default = "default_max_archive_size")]
    pub max_archive_size: u64,
    /// Enable the /metrics endpoint for Prometheus scraping.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_max_archive_size() -> u64 {
    2 * 1024 * 1024 * 1024 // 2 GiB
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: None,
            max_chunk_size: default_max_chunk_size(),
            max_archive_size: default_max_archive_size(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// On-disk layout. Every directory is derived from `data_dir`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Partial chunk sessions, one directory per upload id.
    pub fn chunks_dir(&self) -> PathBuf {
        self.data_dir.join("chunks")
    }

    /// Assembled chunked uploads.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Archives persisted from direct submissions.
    pub fn imports_dir(&self) -> PathBuf {
        self.data_dir.join("imports")
    }

    /// Root of the job status key-value store.
    pub fn jobs_root(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Worker output logs, one file per job.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Detached worker configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker executable spawned per job.
    #[serde(default = "default_worker_program")]
    pub program: PathBuf,
    /// External import command run by the worker (program followed by args).
    #[serde(default)]
    pub import_command: Vec<String>,
    /// How often a running worker refreshes its heartbeat.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// A non-terminal job without a heartbeat for this long is reaped.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Interval of the supervisor watchdog loop.
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
}

fn default_worker_program() -> PathBuf {
    PathBuf::from("hauler-worker")
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_stale_after_secs() -> u64 {
    120
}

fn default_watchdog_interval_secs() -> u64 {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: default_worker_program(),
            import_command: Vec::new(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
}

/// Chunked upload session housekeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Sessions without a new chunk for this long are swept.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Interval between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl UploadConfig {
    pub fn session_ttl(&self) -> time::Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Complete service configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at `data_dir`.
    ///
    /// **For testing only.** The import command is `true`, and the intervals
    /// are short.
    pub fn for_testing(data_dir: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig {
                data_dir: data_dir.to_path_buf(),
            },
            worker: WorkerConfig {
                program: PathBuf::from("true"),
                import_command: vec!["true".to_string()],
                heartbeat_interval_secs: 1,
                stale_after_secs: 5,
                watchdog_interval_secs: 1,
            },
            uploads: UploadConfig::default(),
        }
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.max_chunk_size == 0 || self.server.max_chunk_size > crate::MAX_CHUNK_SIZE {
            return Err(crate::Error::Config(format!(
                "server.max_chunk_size must be between 1 and {}",
                crate::MAX_CHUNK_SIZE
            )));
        }
        if let Some(url) = &self.server.public_base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(crate::Error::Config(format!(
                "server.public_base_url must be an http(s) URL, got {url:?}"
            )));
        }
        if self.worker.import_command.is_empty() {
            return Err(crate::Error::Config(
                "worker.import_command must name the import program".to_string(),
            ));
        }
        if self.worker.heartbeat_interval_secs == 0 || self.worker.watchdog_interval_secs == 0 {
            return Err(crate::Error::Config(
                "worker heartbeat and watchdog intervals must be non-zero".to_string(),
            ));
        }
        if self.worker.stale_after_secs <= self.worker.heartbeat_interval_secs {
            return Err(crate::Error::Config(format!(
                "worker.stale_after_secs ({}) must exceed heartbeat_interval_secs ({})",
                self.worker.stale_after_secs, self.worker.heartbeat_interval_secs
            )));
        }
        if self.uploads.sweep_interval_secs == 0 {
            return Err(crate::Error::Config(
                "uploads.sweep_interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the externally visible status URL for a job.
    pub fn status_url(&self, job_id: &crate::JobId) -> String {
        let path = format!("/v1/imports/{job_id}");
        match &self.server.public_base_url {
            Some(base) => format!("{}{path}", base.trim_end_matches('/')),
            None => path,
        }
    }
}
