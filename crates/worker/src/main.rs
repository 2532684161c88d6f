//! hauler-worker binary.

use anyhow::{Context, Result};
use clap::Parser;
use hauler_core::JobId;
use hauler_core::config::StorageConfig;
use hauler_jobs::{JobStore, StatusReporter};
use hauler_worker::{ImportInvocation, ImportOutcome, ImportRunner, WorkerError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// hauler-worker - runs one import job and reports its status
#[derive(Parser, Debug)]
#[command(name = "hauler-worker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Job to run
    #[arg(long)]
    job_id: String,

    /// Normalized destination identifier
    #[arg(long)]
    destination: String,

    /// Submitting user
    #[arg(long)]
    user_id: String,

    /// Archive to import
    #[arg(long)]
    archive: PathBuf,

    /// Server data directory holding the job records
    #[arg(long, env = "HAULER_STORAGE__DATA_DIR")]
    data_dir: PathBuf,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = 15)]
    heartbeat_secs: u64,

    /// Import command and its arguments
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hauler_worker=info,hauler_jobs=info,import=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let job_id = JobId::parse(&args.job_id).context("invalid job id")?;
    let storage = StorageConfig {
        data_dir: args.data_dir,
    };
    let kv = hauler_storage::from_config(&storage)
        .await
        .context("failed to open job store")?;
    let reporter = StatusReporter::new(JobStore::new(kv), job_id.clone());

    // Fail fast on a job that does not exist.
    reporter
        .current()
        .await
        .with_context(|| format!("failed to load job {job_id}"))?;

    tracing::info!(
        job_id = %job_id,
        destination = %args.destination,
        archive = %args.archive.display(),
        "hauler-worker v{}",
        env!("CARGO_PKG_VERSION")
    );

    let runner = ImportRunner::new(reporter, Duration::from_secs(args.heartbeat_secs.max(1)));
    let invocation = ImportInvocation {
        destination: args.destination,
        user_id: args.user_id,
        archive: args.archive,
        command: args.command,
    };

    match runner.run(&invocation).await {
        Ok(ImportOutcome::Succeeded) => Ok(ExitCode::SUCCESS),
        Ok(ImportOutcome::Failed { message }) => {
            tracing::warn!(job_id = %job_id, reason = %message, "Import failed");
            Ok(ExitCode::FAILURE)
        }
        Err(WorkerError::Superseded) => {
            tracing::warn!(job_id = %job_id, "Job was finalized by the supervisor");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("import job {job_id} aborted"))),
    }
}
