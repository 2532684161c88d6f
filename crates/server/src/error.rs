//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hauler_jobs::JobError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Field name -> messages, rendered inline by clients.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Always `true`; lets clients branch on one field.
    pub error: bool,
    /// Human-readable error message.
    pub message: String,
    /// Per-field messages for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation { message: String, errors: FieldErrors },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    /// Archive could not be persisted or read back.
    #[error("{message}")]
    Storage { field: String, message: String },

    /// The job record exists but its worker did not start.
    #[error("Import worker could not be started.")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("job store error: {0}")]
    Jobs(#[from] JobError),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Validation failure on a single field.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.clone()]);
        Self::Validation { message, errors }
    }

    /// Validation failure reported on several fields with one message.
    pub fn fields(fields: &[&str], message: impl Into<String>) -> Self {
        let message = message.into();
        let errors = fields
            .iter()
            .map(|f| (f.to_string(), vec![message.clone()]))
            .collect();
        Self::Validation { message, errors }
    }

    /// Report `other`'s field errors together with these.
    ///
    /// The first failure keeps its message. Anything that is not a
    /// validation failure takes precedence over one.
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (
                Self::Validation { message, mut errors },
                Self::Validation { errors: more, .. },
            ) => {
                for (field, messages) in more {
                    errors.entry(field).or_default().extend(messages);
                }
                Self::Validation { message, errors }
            }
            (Self::Validation { .. }, other) => other,
            (first, _) => first,
        }
    }

    /// The canonical 404 for unknown resources.
    pub fn not_found() -> Self {
        Self::NotFound("Not found".to_string())
    }

    /// Get the error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Storage { .. } => "storage_error",
            Self::WorkerSpawn(_) => "worker_spawn_failed",
            Self::Internal(_) => "internal_error",
            Self::Jobs(_) => "job_store_error",
            Self::Io(_) => "io_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::WorkerSpawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Jobs(e) => match e {
                JobError::NotFound(_) => StatusCode::NOT_FOUND,
                JobError::AlreadyExists(_) | JobError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show clients. Server-side failures are not detailed.
    fn public_message(&self) -> String {
        match self {
            Self::Jobs(JobError::NotFound(_)) => "Not found".to_string(),
            Self::Jobs(JobError::AlreadyExists(_)) => "Job already exists".to_string(),
            Self::Jobs(JobError::InvalidTransition { from, to }) => {
                format!("Invalid status transition: {from} -> {to}")
            }
            Self::Internal(_) | Self::Jobs(_) | Self::Io(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            match &self {
                Self::WorkerSpawn(source) => {
                    tracing::error!(code = self.code(), error = %source, "Request failed")
                }
                _ => tracing::error!(code = self.code(), error = %self, "Request failed"),
            }
        }
        let errors = match &self {
            Self::Validation { errors, .. } => Some(errors.clone()),
            Self::Storage { field, message } => {
                Some(FieldErrors::from([(field.clone(), vec![message.clone()])]))
            }
            _ => None,
        };
        let body = ErrorResponse {
            error: true,
            message: self.public_message(),
            errors,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
