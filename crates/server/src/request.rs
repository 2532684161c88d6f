//! Request context: trace ids, submitting user and latency metrics.

use crate::error::ApiError;
use crate::metrics::HTTP_REQUEST_DURATION;
use axum::extract::{FromRequestParts, MatchedPath, Request};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Maximum length of the submitting user id.
const MAX_USER_ID_LEN: usize = 128;

/// Header carrying the id of the authenticated user, set by the fronting proxy.
pub const USER_HEADER: &str = "x-hauler-user";

/// Header carrying a client-supplied trace id.
pub const TRACE_HEADER: &str = "x-trace-id";

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user an import is submitted on behalf of.
///
/// Authentication happens in front of haulerd; the proxy forwards the user id
/// in [`USER_HEADER`]. Handlers that take this extractor answer 401 when the
/// header is missing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittingUser(pub String);

impl SubmittingUser {
    fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty()
            || value.len() > MAX_USER_ID_LEN
            || !value.chars().all(|c| c.is_ascii_graphic())
        {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for SubmittingUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SubmittingUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
    }
}

fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Middleware that sets up the trace context and the submitting user.
pub async fn request_context_middleware(mut req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    if let Some(user) = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(SubmittingUser::from_header)
    {
        req.extensions_mut().insert(user);
    }

    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;
    HTTP_REQUEST_DURATION
        .with_label_values(&[route.as_str()])
        .observe(started.elapsed().as_secs_f64());

    response
}
