//! Server test utilities.

use super::fixtures::MultipartBody;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use hauler_core::config::AppConfig;
use hauler_server::{AppState, create_router};
use hauler_storage::{FilesystemStore, KeyValueStore};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// User id sent by [`TestServer`] requests unless a test opts out.
pub const TEST_USER: &str = "42";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    temp_dir: TempDir,
}

/// Status, raw body and parsed JSON body of a response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub bytes: Vec<u8>,
    pub json: Value,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with a temporary data directory.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        hauler_server::metrics::register_metrics();
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);

        let store: Arc<dyn KeyValueStore> = Arc::new(
            FilesystemStore::new(config.storage.jobs_root())
                .await
                .expect("Failed to create job store"),
        );
        let state = AppState::new(config, store);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            temp_dir,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Send a request, optionally as the test user.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        TestResponse {
            status,
            bytes,
            json,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-hauler-user", TEST_USER)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method("DELETE")
            .uri(uri)
            .header("x-hauler-user", TEST_USER)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// POST a multipart form, as `user` when given.
    pub async fn post_form(&self, uri: &str, form: MultipartBody, user: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", MultipartBody::content_type());
        if let Some(user) = user {
            builder = builder.header("x-hauler-user", user);
        }
        self.send(builder.body(Body::from(form.finish())).unwrap())
            .await
    }

    /// Upload one chunk as the test user.
    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        index: u32,
        chunk_size: usize,
        total_size: usize,
        filename: &str,
        data: &[u8],
    ) -> TestResponse {
        let form = MultipartBody::new()
            .text("upload_id", upload_id)
            .text("chunk_index", index.to_string())
            .text("chunk_size", chunk_size.to_string())
            .text("total_size", total_size.to_string())
            .text("filename", filename)
            .file("file", "blob", data);
        self.post_form("/v1/uploads/chunks", form, Some(TEST_USER))
            .await
    }
}
