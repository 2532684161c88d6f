//! Runs the import command and mirrors its output into the job record.

use crate::error::{WorkerError, WorkerResult};
use crate::protocol::{StatusLine, parse_line};
use hauler_jobs::{JobError, StatusReporter};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Message of a job whose import command exited successfully.
pub const IMPORT_COMPLETED: &str = "Import completed.";

/// Message written when the worker picks up a job.
pub const IMPORT_STARTED: &str = "Import started.";

/// Arguments of one import.
#[derive(Clone, Debug)]
pub struct ImportInvocation {
    pub destination: String,
    pub user_id: String,
    pub archive: PathBuf,
    /// Program and arguments of the import command.
    pub command: Vec<String>,
}

/// Final state written to the record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    Succeeded,
    Failed { message: String },
}

/// Drives one job from `running` to a terminal state.
pub struct ImportRunner {
    reporter: StatusReporter,
    heartbeat_interval: Duration,
}

impl ImportRunner {
    pub fn new(reporter: StatusReporter, heartbeat_interval: Duration) -> Self {
        Self {
            reporter,
            heartbeat_interval,
        }
    }

    /// Run the import command to completion.
    ///
    /// Returns [`WorkerError::Superseded`] when the record was finalized by
    /// someone else meanwhile (the supervisor's reaper); the import command
    /// is killed in that case.
    pub async fn run(&self, invocation: &ImportInvocation) -> WorkerResult<ImportOutcome> {
        let job_id = self.reporter.job_id().clone();
        let Some((program, args)) = invocation.command.split_first() else {
            self.reporter.fail("Import command is not configured.").await?;
            return Err(WorkerError::EmptyCommand);
        };

        self.reporter.running(IMPORT_STARTED).await?;
        info!(job_id = %job_id, program, "Starting import command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("HAULER_JOB_ID", job_id.as_str())
            .env("HAULER_DESTINATION", &invocation.destination)
            .env("HAULER_USER_ID", &invocation.user_id)
            .env("HAULER_ARCHIVE", &invocation.archive)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.reporter
                    .fail(&format!("Import command could not be started: {e}"))
                    .await?;
                return Err(WorkerError::Spawn(e));
            }
        };

        let heartbeat = self.reporter.spawn_heartbeat(self.heartbeat_interval);
        let result = self.supervise(&mut child).await;
        heartbeat.abort();

        let (status, last_stderr) = result?;
        let outcome = if status.success() {
            self.reporter.succeed(IMPORT_COMPLETED).await?;
            ImportOutcome::Succeeded
        } else {
            let message = last_stderr.unwrap_or_else(|| exit_message(status));
            self.reporter.fail(&message).await?;
            ImportOutcome::Failed { message }
        };
        info!(job_id = %job_id, ?outcome, "Import finished");
        Ok(outcome)
    }

    /// Follow the child's output until it exits.
    ///
    /// Returns its exit status and the last non-empty stderr line.
    async fn supervise(&self, child: &mut Child) -> WorkerResult<(ExitStatus, Option<String>)> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("import stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("import stderr not captured"))?;
        let stderr_task = spawn_stderr_reader(stderr);

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let Some(status) = parse_line(&line) else {
                debug!(line, "Ignoring import output");
                continue;
            };
            match self.apply(status).await {
                Ok(()) => {}
                Err(JobError::InvalidTransition { .. }) => {
                    warn!(
                        job_id = %self.reporter.job_id(),
                        "Job finalized elsewhere, stopping import"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill import command");
                    }
                    stderr_task.abort();
                    return Err(WorkerError::Superseded);
                }
                Err(e) => warn!(error = %e, "Failed to record import status"),
            }
        }

        let status = child.wait().await?;
        let last_stderr = stderr_task.await.unwrap_or_default();
        Ok((status, last_stderr))
    }

    async fn apply(&self, status: StatusLine) -> Result<(), JobError> {
        match status {
            StatusLine::Progress { percent, message } => {
                self.reporter.progress(percent, message).await?;
            }
            StatusLine::Message(message) => {
                self.reporter.message(&message).await?;
            }
            StatusLine::Meta { key, value } => match self.reporter.metadata(&key, value).await {
                Err(JobError::Invalid(reason)) => warn!(key, reason, "Ignoring metadata"),
                other => {
                    other?;
                }
            },
        }
        Ok(())
    }
}

/// Log stderr lines and keep the last non-empty one.
fn spawn_stderr_reader<R>(stderr: R) -> JoinHandle<Option<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut last = None;
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            info!(target: "import", "{trimmed}");
            last = Some(trimmed.to_string());
        }
        last
    })
}

fn exit_message(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("Import failed (exit status {code})"),
        None => "Import failed (terminated by signal)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hauler_core::{ArchiveSource, DestinationId, JobId, JobStatus, JobStatusRecord, SourceKind};
    use hauler_jobs::JobStore;
    use hauler_storage::MemoryStore;
    use std::sync::Arc;

    async fn setup() -> (JobStore, JobId, ImportRunner) {
        let store = JobStore::new(Arc::new(MemoryStore::new()));
        let job_id = JobId::new();
        let source = ArchiveSource::new("/srv/site.zip", SourceKind::Path);
        store
            .create(
                &job_id,
                &JobStatusRecord::queued(DestinationId::parse("blog").unwrap(), "42", &source),
            )
            .await
            .unwrap();
        let reporter = StatusReporter::new(store.clone(), job_id.clone());
        (store, job_id, ImportRunner::new(reporter, Duration::from_secs(60)))
    }

    fn sh(script: &str) -> ImportInvocation {
        ImportInvocation {
            destination: "blog".into(),
            user_id: "42".into(),
            archive: PathBuf::from("/srv/site.zip"),
            command: vec!["sh".into(), "-c".into(), script.into()],
        }
    }

    #[tokio::test]
    async fn success_records_progress_and_metadata() {
        let (store, job_id, runner) = setup().await;
        let outcome = runner
            .run(&sh(
                "echo 'progress 40 Extracting'; echo noise; echo \"meta site_id=12\"; \
                 echo \"meta destination=$HAULER_DESTINATION\"; exit 0",
            ))
            .await
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Succeeded);

        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.progress, Some(100));
        assert_eq!(record.message, IMPORT_COMPLETED);
        assert_eq!(record.metadata["site_id"], 12);
        assert_eq!(record.metadata["destination"], "blog");
    }

    #[tokio::test]
    async fn failure_uses_last_stderr_line() {
        let (store, job_id, runner) = setup().await;
        let outcome = runner
            .run(&sh("echo 'progress 10'; echo first >&2; echo 'Archive is corrupt' >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ImportOutcome::Failed {
                message: "Archive is corrupt".into()
            }
        );
        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.message, "Archive is corrupt");
    }

    #[tokio::test]
    async fn failure_without_stderr_reports_exit_status() {
        let (store, job_id, runner) = setup().await;
        runner.run(&sh("exit 4")).await.unwrap();
        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.message, "Import failed (exit status 4)");
    }

    #[tokio::test]
    async fn missing_program_fails_the_job() {
        let (store, job_id, runner) = setup().await;
        let invocation = ImportInvocation {
            command: vec!["/nonexistent/wp-import".into()],
            ..sh("")
        };
        let err = runner.run(&invocation).await.unwrap_err();
        assert!(matches!(err, WorkerError::Spawn(_)));
        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.message.starts_with("Import command could not be started"));
    }

    #[tokio::test]
    async fn reaped_job_is_not_started() {
        let (store, job_id, runner) = setup().await;
        store.fail_if_active(&job_id, "failed: worker vanished").await.unwrap();

        let marker = tempfile::tempdir().unwrap();
        let touched = marker.path().join("ran");
        let err = runner
            .run(&sh(&format!("touch {}", touched.display())))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Superseded));
        assert!(!touched.exists());
        assert_eq!(store.get(&job_id).await.unwrap().message, "failed: worker vanished");
    }

    #[tokio::test]
    async fn reaping_mid_run_kills_the_command() {
        let (store, job_id, runner) = setup().await;
        let reaper = {
            let store = store.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move {
                loop {
                    let record = store.get(&job_id).await.unwrap();
                    if record.progress == Some(5) {
                        store.fail_if_active(&job_id, "failed: worker vanished").await.unwrap();
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
        };

        let started = std::time::Instant::now();
        let err = runner
            .run(&sh("echo 'progress 5'; sleep 1; echo 'progress 50'; sleep 30"))
            .await
            .unwrap_err();
        reaper.await.unwrap();

        assert!(matches!(err, WorkerError::Superseded));
        assert!(started.elapsed() < Duration::from_secs(20));
        let record = store.get(&job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.progress, Some(5));
    }
}
