//! Polling an import job until it reaches a terminal state.
//!
//! Polling is read-only on the server, so it is safe to repeat for as long
//! as the caller wants. Transport failures never end a watch: they are
//! reported as events and polling continues with exponential backoff.

use crate::api_client::ApiClient;
use async_trait::async_trait;
use hauler_core::{JobStatus, JobStatusView};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Why a status fetch failed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server does not know the job.
    #[error("job not found")]
    NotFound,
    /// Network or server failure; the next poll may succeed.
    #[error("{0}")]
    Transport(String),
    /// The server refused the request for good, e.g. a missing user header.
    #[error("{0}")]
    Rejected(String),
}

/// Where job status comes from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, job_id: &str) -> Result<JobStatusView, FetchError>;
}

#[async_trait]
impl StatusSource for ApiClient {
    async fn fetch(&self, job_id: &str) -> Result<JobStatusView, FetchError> {
        self.job_status(job_id).await.map_err(|e| {
            if e.is_not_found() {
                FetchError::NotFound
            } else if e.is_retryable() {
                FetchError::Transport(e.to_string())
            } else {
                FetchError::Rejected(e.to_string())
            }
        })
    }
}

/// Caller-owned polling schedule.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay between successful polls.
    pub interval: Duration,
    /// Emit a heartbeat after this many consecutive polls without news.
    pub heartbeat_every: u32,
    /// Cap of the backoff applied after transport failures.
    pub max_backoff: Duration,
    /// A single status fetch that takes longer counts as a transport failure.
    pub request_timeout: Duration,
    /// Give up after this long.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(700),
            heartbeat_every: 5,
            max_backoff: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            timeout: None,
        }
    }
}

impl PollPolicy {
    fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(16));
        self.interval.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub terminal: bool,
    pub record: JobStatusView,
}

impl From<JobStatusView> for PollResult {
    fn from(record: JobStatusView) -> Self {
        Self {
            terminal: record.is_terminal(),
            record,
        }
    }
}

/// Something worth telling the user while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Progress { progress: Option<u8>, message: String },
    Message(String),
    /// Still polling; `polls` consecutive polls brought nothing new.
    Heartbeat { polls: u32 },
    TransportError { error: String, failures: u32 },
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("status request rejected: {0}")]
    Rejected(String),
    #[error("job {job_id} did not finish within {elapsed:?}")]
    TimedOut { job_id: String, elapsed: Duration },
}

/// Fetch the current status once.
pub async fn poll_once<S: StatusSource + ?Sized>(
    source: &S,
    job_id: &str,
) -> Result<PollResult, FetchError> {
    source.fetch(job_id).await.map(PollResult::from)
}

/// Poll until the job is terminal, feeding events to `sink`.
pub async fn watch<S, F>(
    source: &S,
    job_id: &str,
    policy: &PollPolicy,
    mut sink: F,
) -> Result<PollResult, PollError>
where
    S: StatusSource + ?Sized,
    F: FnMut(PollEvent),
{
    let started = Instant::now();
    let heartbeat_every = policy.heartbeat_every.max(1);
    let mut last: Option<(Option<u8>, String)> = None;
    let mut quiet = 0u32;
    let mut failures = 0u32;

    loop {
        let fetched = tokio::time::timeout(policy.request_timeout, poll_once(source, job_id))
            .await
            .unwrap_or_else(|_| {
                Err(FetchError::Transport(format!(
                    "status request timed out after {:?}",
                    policy.request_timeout
                )))
            });
        let delay = match fetched {
            Ok(result) => {
                failures = 0;
                let current = (result.record.record.progress, result.record.record.message.clone());
                let event = match &last {
                    Some((progress, _)) if *progress != current.0 => Some(PollEvent::Progress {
                        progress: current.0,
                        message: current.1.clone(),
                    }),
                    Some((_, message)) if *message != current.1 => {
                        Some(PollEvent::Message(current.1.clone()))
                    }
                    Some(_) => None,
                    None => Some(PollEvent::Progress {
                        progress: current.0,
                        message: current.1.clone(),
                    }),
                };
                last = Some(current);
                match event {
                    Some(event) => {
                        quiet = 0;
                        sink(event);
                    }
                    None => quiet += 1,
                }
                if result.terminal {
                    return Ok(result);
                }
                policy.interval
            }
            Err(FetchError::NotFound) => return Err(PollError::NotFound(job_id.to_string())),
            Err(FetchError::Rejected(error)) => return Err(PollError::Rejected(error)),
            Err(FetchError::Transport(error)) => {
                failures += 1;
                quiet += 1;
                sink(PollEvent::TransportError { error, failures });
                policy.backoff(failures)
            }
        };

        if quiet > 0 && quiet % heartbeat_every == 0 {
            sink(PollEvent::Heartbeat { polls: quiet });
        }

        if let Some(timeout) = policy.timeout
            && started.elapsed() + delay > timeout
        {
            return Err(PollError::TimedOut {
                job_id: job_id.to_string(),
                elapsed: started.elapsed(),
            });
        }
        tokio::time::sleep(delay).await;
    }
}

/// What to show once a job succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionView {
    /// Created site, by id.
    Site(i64),
    /// Where the destination can be opened.
    Redirect(String),
    Generic,
}

impl CompletionView {
    pub fn from_record(view: &JobStatusView) -> Self {
        let metadata = &view.record.metadata;
        if let Some(id) = metadata.get("site_id").and_then(|v| v.as_i64()) {
            return Self::Site(id);
        }
        if let Some(url) = metadata.get("redirect").and_then(|v| v.as_str())
            && !url.is_empty()
        {
            return Self::Redirect(url.to_string());
        }
        Self::Generic
    }
}

impl fmt::Display for CompletionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Site(id) => write!(f, "Import completed. Site id: {id}"),
            Self::Redirect(url) => write!(f, "Import completed. Open {url}"),
            Self::Generic => f.write_str("Import completed."),
        }
    }
}

/// One-line summary of a terminal record.
pub fn summarize(view: &JobStatusView) -> String {
    match view.record.status {
        JobStatus::Succeeded => CompletionView::from_record(view).to_string(),
        _ => format!("Import failed: {}", view.record.message),
    }
}
