//! Import job handlers.

use crate::error::{ApiError, ApiResult};
use crate::handlers::form::FormData;
use crate::request::SubmittingUser;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use hauler_core::{DestinationId, Error as CoreError, JobId, JobStatusView, SourceKind};
use hauler_jobs::JobError;
use serde::Serialize;

const DESTINATION: &[&str] = &["destination"];
const SERVER_PATH: &[&str] = &["server_path"];
const ARCHIVE: &[&str] = &["archive"];

/// Response to an accepted import.
#[derive(Debug, Serialize)]
pub struct SubmitImportResponse {
    pub error: bool,
    pub message: String,
    pub job_id: JobId,
    pub status_url: String,
}

fn parse_destination(raw: &str) -> ApiResult<DestinationId> {
    DestinationId::parse(raw).map_err(|e| match e {
        CoreError::InvalidDestination(message) => ApiError::field("destination", message),
        other => ApiError::field("destination", other.to_string()),
    })
}

/// POST /v1/imports
///
/// Accepts either an `archive` file part or a `server_path` field, never both.
/// Destination and source problems are reported together. Responds as soon
/// as the job record exists and the worker was launched.
pub async fn submit_import(
    State(state): State<AppState>,
    user: SubmittingUser,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitImportResponse>)> {
    let mut form =
        FormData::collect_spooled(multipart, ARCHIVE, state.resolver.imports_dir()).await?;
    let upload = form.take_spooled(ARCHIVE);
    let server_path = form.text(SERVER_PATH);

    let destination = match parse_destination(form.text(DESTINATION).unwrap_or_default()) {
        Ok(destination) => destination,
        Err(err) => {
            return Err(match state.resolver.check(upload, server_path).await {
                Ok(()) => err,
                Err(source_err) => err.and(source_err.into()),
            });
        }
    };
    let source = state.resolver.resolve(upload, server_path).await?;

    match state
        .enqueuer
        .enqueue(destination, &source, user.as_str())
        .await
    {
        Ok(job) => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitImportResponse {
                error: false,
                message: "Import queued.".to_string(),
                job_id: job.job_id,
                status_url: job.status_url,
            }),
        )),
        Err(e) => {
            // No job refers to a copy persisted for a rejected submission.
            if source.kind == SourceKind::Upload
                && matches!(e, ApiError::Validation { .. })
                && let Err(rm) = tokio::fs::remove_file(&source.path).await
            {
                tracing::warn!(
                    path = %source.path.display(),
                    error = %rm,
                    "Failed to remove rejected archive"
                );
            }
            Err(e)
        }
    }
}

/// GET /v1/imports
pub async fn list_imports(
    State(state): State<AppState>,
    _user: SubmittingUser,
) -> ApiResult<Json<Vec<JobStatusView>>> {
    let jobs = state.jobs.list().await?;
    Ok(Json(
        jobs.into_iter()
            .map(|(job_id, record)| JobStatusView::new(job_id, record))
            .collect(),
    ))
}

/// GET /v1/imports/{job_id}
///
/// Read-only: polling any number of times never changes the record.
pub async fn get_import(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let job_id = JobId::parse(&job_id).map_err(|_| ApiError::not_found())?;
    match state.jobs.get(&job_id).await {
        Ok(record) => Ok(Json(JobStatusView::new(job_id, record))),
        Err(JobError::NotFound(_)) => Err(ApiError::not_found()),
        Err(e) => Err(e.into()),
    }
}
