use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use hauler_core::JobStatusView;

/// Header carrying the submitting user, normally set by the auth proxy.
pub const USER_HEADER: &str = "x-hauler-user";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for a whole request, chunk uploads included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors returned by [`ApiClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error ({status}): {message}{}", format_field_errors(errors))]
    Api {
        status: StatusCode,
        message: String,
        errors: BTreeMap<String, Vec<String>>,
    },

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// Transport failures and server errors, which may go away on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => status.is_server_error(),
            Self::Decode(_) => false,
        }
    }
}

fn format_field_errors(errors: &BTreeMap<String, Vec<String>>) -> String {
    errors
        .iter()
        .flat_map(|(field, messages)| messages.iter().map(move |m| format!("\n  {field}: {m}")))
        .collect()
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
}

impl ApiClient {
    pub fn new(base_url: &str, user: &str) -> anyhow::Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            user: user.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> ClientResult<String> {
        let response = req.header(USER_HEADER, &self.user).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let (message, errors) = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(parsed) => (parsed.message, parsed.errors),
                Err(_) => (body, BTreeMap::new()),
            };
            return Err(ClientError::Api {
                status,
                message,
                errors,
            });
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> ClientResult<T> {
        let body = self.send(req).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn health(&self) -> ClientResult<HealthResponse> {
        self.send_json(self.http.get(self.url("/v1/health"))).await
    }

    /// Upload one chunk of a chunked upload.
    pub async fn upload_chunk(&self, chunk: &ChunkUpload) -> ClientResult<ChunkResponse> {
        let form = Form::new()
            .text("upload_id", chunk.upload_id.clone())
            .text("chunk_index", chunk.chunk_index.to_string())
            .text("chunk_size", chunk.chunk_size.to_string())
            .text("total_size", chunk.total_size.to_string())
            .text("filename", chunk.filename.clone())
            .part("file", Part::bytes(chunk.data.clone()).file_name("blob"));
        self.send_json(self.http.post(self.url("/v1/uploads/chunks")).multipart(form))
            .await
    }

    /// State of a partial upload, `None` when the server has no session for it.
    pub async fn upload_state(&self, upload_id: &str) -> ClientResult<Option<UploadStateResponse>> {
        let url = self.url(&format!("/v1/uploads/{upload_id}"));
        match self.send_json(self.http.get(url)).await {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn abort_upload(&self, upload_id: &str) -> ClientResult<()> {
        let url = self.url(&format!("/v1/uploads/{upload_id}"));
        self.send(self.http.delete(url)).await.map(|_| ())
    }

    pub async fn submit_import(
        &self,
        destination: &str,
        source: ImportSource,
    ) -> ClientResult<SubmitImportResponse> {
        let form = Form::new().text("destination", destination.to_string());
        let form = match source {
            ImportSource::ServerPath(path) => form.text("server_path", path),
            ImportSource::Archive { filename, data } => {
                form.part("archive", Part::bytes(data).file_name(filename))
            }
        };
        self.send_json(self.http.post(self.url("/v1/imports")).multipart(form))
            .await
    }

    pub async fn job_status(&self, job_id: &str) -> ClientResult<JobStatusView> {
        let url = self.url(&format!("/v1/imports/{job_id}"));
        self.send_json(self.http.get(url)).await
    }

    pub async fn list_imports(&self) -> ClientResult<Vec<JobStatusView>> {
        self.send_json(self.http.get(self.url("/v1/imports"))).await
    }
}

pub fn normalize_base_url(url: &str) -> anyhow::Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("server URL must start with http:// or https://");
    }
    reqwest::Url::parse(url).map_err(|e| anyhow::anyhow!("invalid server URL: {e}"))?;
    Ok(url.trim_end_matches('/').to_string())
}

// =============================================================================
// Request/response types (mirrored from server handlers)
// =============================================================================

/// Archive of an import submission.
#[derive(Debug)]
pub enum ImportSource {
    /// A file already on the server, e.g. an assembled chunked upload.
    ServerPath(String),
    /// Upload the archive with the submission.
    Archive { filename: String, data: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub upload_id: String,
    /// 1-based.
    pub chunk_index: u32,
    pub chunk_size: u64,
    pub total_size: u64,
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    errors: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AssembledUpload {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub stored_as: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChunkResponse {
    Complete {
        done: bool,
        #[serde(flatten)]
        upload: AssembledUpload,
    },
    Pending {
        done: bool,
        #[serde(default)]
        percentage: Option<u8>,
    },
}

#[derive(Debug, Deserialize)]
pub struct UploadStateResponse {
    pub upload_id: String,
    pub filename: String,
    pub received: Vec<u32>,
    pub missing: Vec<u32>,
    pub total_chunks: u32,
    pub percentage: u8,
}

#[derive(Debug, Deserialize)]
pub struct SubmitImportResponse {
    pub message: String,
    pub job_id: String,
    pub status_url: String,
}
