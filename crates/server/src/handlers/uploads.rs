//! Chunked upload handlers.
//!
//! Field names follow the Resumable.js protocol as well as hauler's own, so
//! browser uploaders can post chunks without a translation layer.

use crate::chunks::{AssembledUpload, ChunkOutcome};
use crate::error::{ApiError, ApiResult};
use crate::handlers::form::FormData;
use crate::request::SubmittingUser;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use hauler_core::{ChunkDescriptor, UploadId};
use serde::Serialize;
use std::path::PathBuf;

const UPLOAD_ID: &[&str] = &["upload_id", "resumableIdentifier"];
const CHUNK_INDEX: &[&str] = &["chunk_index", "resumableChunkNumber"];
const CHUNK_SIZE: &[&str] = &["chunk_size", "resumableChunkSize"];
const TOTAL_SIZE: &[&str] = &["total_size", "resumableTotalSize"];
const FILENAME: &[&str] = &["filename", "resumableFilename"];
const TOTAL_CHUNKS: &[&str] = &["total_chunks", "resumableTotalChunks"];
const FILE: &[&str] = &["file"];

/// Response to a stored chunk.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChunkResponse {
    Pending {
        done: bool,
        percentage: u8,
    },
    Complete {
        done: bool,
        filename: String,
        path: PathBuf,
        size: u64,
        stored_as: String,
        sha256: String,
    },
}

impl From<ChunkOutcome> for ChunkResponse {
    fn from(outcome: ChunkOutcome) -> Self {
        match outcome {
            ChunkOutcome::Pending { percentage } => Self::Pending {
                done: false,
                percentage,
            },
            ChunkOutcome::Complete(AssembledUpload {
                filename,
                path,
                size,
                stored_as,
                sha256,
            }) => Self::Complete {
                done: true,
                filename,
                path,
                size,
                stored_as,
                sha256,
            },
        }
    }
}

/// State of a partial upload, for resuming.
#[derive(Debug, Serialize)]
pub struct UploadStateResponse {
    pub upload_id: UploadId,
    pub filename: String,
    pub received: Vec<u32>,
    pub missing: Vec<u32>,
    pub total_chunks: u32,
    pub percentage: u8,
}

fn parse_upload_id(raw: &str) -> ApiResult<UploadId> {
    UploadId::parse(raw).map_err(|e| ApiError::field("upload_id", e.to_string()))
}

/// POST /v1/uploads/chunks
pub async fn upload_chunk(
    State(state): State<AppState>,
    _user: SubmittingUser,
    multipart: Multipart,
) -> ApiResult<Json<ChunkResponse>> {
    let mut form = FormData::collect(multipart, FILE).await?;

    let desc = ChunkDescriptor {
        upload_id: parse_upload_id(form.require(UPLOAD_ID)?)?,
        chunk_index: form.require_number(CHUNK_INDEX)?,
        chunk_size: form.require_number(CHUNK_SIZE)?,
        total_size: form.require_number(TOTAL_SIZE)?,
        filename: form.require(FILENAME)?.to_string(),
        total_chunks: form.number(TOTAL_CHUNKS)?,
    };
    let payload = form
        .take_file(FILE)
        .ok_or_else(|| ApiError::field("file", "The file field is required."))?;

    let outcome = state.chunks.receive(&desc, payload.data).await?;
    Ok(Json(outcome.into()))
}

/// GET /v1/uploads/{upload_id}
pub async fn get_upload(
    State(state): State<AppState>,
    _user: SubmittingUser,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadStateResponse>> {
    let upload_id = UploadId::parse(&upload_id).map_err(|_| ApiError::not_found())?;
    let session = state.chunks.status(&upload_id).await?;
    Ok(Json(UploadStateResponse {
        received: session.received.iter().copied().collect(),
        missing: session.missing(),
        percentage: session.percentage(),
        total_chunks: session.total_chunks,
        filename: session.filename,
        upload_id: session.upload_id,
    }))
}

/// DELETE /v1/uploads/{upload_id}
pub async fn abort_upload(
    State(state): State<AppState>,
    _user: SubmittingUser,
    Path(upload_id): Path<String>,
) -> ApiResult<StatusCode> {
    let upload_id = UploadId::parse(&upload_id).map_err(|_| ApiError::not_found())?;
    state.chunks.abort(&upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
