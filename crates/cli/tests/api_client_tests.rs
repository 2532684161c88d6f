use hauler_cli::api_client::{ApiClient, ChunkResponse, ImportSource, USER_HEADER};
use hauler_cli::poller::{self, PollPolicy};
use hauler_cli::upload::{ChunkedUploader, UploadOptions};
use httpmock::Method::{DELETE, GET, POST};
use httpmock::MockServer;
use serde_json::json;
use std::net::TcpListener;
use std::time::Duration;

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn record(status: &str, progress: u8, message: &str) -> serde_json::Value {
    json!({
        "job_id": "4f6c0e3b9a2d4e8f8a1b2c3d4e5f6a7b",
        "status": status,
        "progress": progress,
        "message": message,
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:05Z",
        "destination": "blog",
        "user_id": "42",
        "archive_path": "/var/lib/hauler/imports/site.zip",
        "source": "upload",
        "site_id": 12
    })
}

#[tokio::test]
async fn submit_and_read_status() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let job_id = "4f6c0e3b9a2d4e8f8a1b2c3d4e5f6a7b";

    let submit = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/imports")
            .header(USER_HEADER, "42")
            .body_contains("name=\"destination\"")
            .body_contains("name=\"server_path\"")
            .body_contains("/srv/backups/site.zip");
        then.status(202).json_body(json!({
            "error": false,
            "message": "Import queued.",
            "job_id": job_id,
            "status_url": format!("/v1/imports/{job_id}")
        }));
    });
    let status = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/v1/imports/{job_id}"))
            .header(USER_HEADER, "42");
        then.status(200)
            .json_body(record("succeeded", 100, "Import completed."));
    });

    let client = ApiClient::new(&server.base_url(), "42").unwrap();
    let submitted = client
        .submit_import("blog", ImportSource::ServerPath("/srv/backups/site.zip".into()))
        .await
        .unwrap();
    assert_eq!(submitted.job_id, job_id);
    assert_eq!(submitted.message, "Import queued.");

    let view = client.job_status(job_id).await.unwrap();
    assert_eq!(view.job_id.as_str(), job_id);
    assert_eq!(view.record.destination.as_str(), "blog");
    assert_eq!(view.record.metadata["site_id"], 12);
    assert_eq!(poller::summarize(&view), "Import completed. Site id: 12");

    submit.assert();
    status.assert();
}

#[tokio::test]
async fn validation_errors_carry_field_messages() {
    if !can_bind_localhost() {
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/imports");
        then.status(422).json_body(json!({
            "error": true,
            "message": "Choose either the upload OR the server path — not both.",
            "errors": {
                "archive": ["Choose either the upload OR the server path — not both."],
                "server_path": ["Choose either the upload OR the server path — not both."]
            }
        }));
    });

    let client = ApiClient::new(&server.base_url(), "42").unwrap();
    let err = client
        .submit_import(
            "blog",
            ImportSource::Archive {
                filename: "site.zip".into(),
                data: b"PK".to_vec(),
            },
        )
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    let text = err.to_string();
    assert!(text.starts_with("API error (422 Unprocessable Entity)"), "{text}");
    assert!(text.contains("server_path: Choose either"), "{text}");
}

#[tokio::test]
async fn unknown_job_and_upload_are_not_found() {
    if !can_bind_localhost() {
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/imports/deadbeef");
        then.status(404)
            .json_body(json!({"error": true, "message": "Not found"}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/v1/uploads/5-sitezip");
        then.status(404)
            .json_body(json!({"error": true, "message": "Not found"}));
    });
    let abort = server.mock(|when, then| {
        when.method(DELETE).path("/v1/uploads/5-sitezip");
        then.status(204);
    });

    let client = ApiClient::new(&server.base_url(), "42").unwrap();
    let err = client.job_status("deadbeef").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(client.upload_state("5-sitezip").await.unwrap().is_none());
    client.abort_upload("5-sitezip").await.unwrap();
    abort.assert();

    let err = poller::watch(&client, "deadbeef", &PollPolicy::default(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, poller::PollError::NotFound(_)));
}

#[tokio::test]
async fn chunked_upload_sends_every_chunk_in_order() {
    if !can_bind_localhost() {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.zip");
    std::fs::write(&path, vec![7u8; 250]).unwrap();

    let server = MockServer::start();
    let state = server.mock(|when, then| {
        when.method(GET).path("/v1/uploads/250-sitezip");
        then.status(404)
            .json_body(json!({"error": true, "message": "Not found"}));
    });
    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/uploads/chunks")
            .header(USER_HEADER, "42")
            .body_contains("name=\"chunk_index\"\r\n\r\n1\r\n");
        then.status(200).json_body(json!({"done": false, "percentage": 50}));
    });
    let second = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/uploads/chunks")
            .body_contains("name=\"chunk_index\"\r\n\r\n2\r\n");
        then.status(200).json_body(json!({
            "done": true,
            "filename": "site.zip",
            "path": "/var/lib/hauler/uploads/abc.zip",
            "size": 250,
            "stored_as": "abc.zip",
            "sha256": "00"
        }));
    });

    let client = ApiClient::new(&server.base_url(), "42").unwrap();
    let options = UploadOptions {
        chunk_size: 100,
        ..UploadOptions::default()
    };
    let mut seen = Vec::new();
    let upload = ChunkedUploader::new(&client, options)
        .upload_file(&path, |p| seen.push(p))
        .await
        .unwrap();

    assert_eq!(upload.path.to_str(), Some("/var/lib/hauler/uploads/abc.zip"));
    assert_eq!(upload.size, 250);
    assert_eq!(seen, vec![50, 100]);
    state.assert();
    first.assert();
    second.assert();
}

#[tokio::test]
async fn chunked_upload_skips_chunks_the_server_has() {
    if !can_bind_localhost() {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.zip");
    std::fs::write(&path, vec![1u8; 300]).unwrap();

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/uploads/300-sitezip");
        then.status(200).json_body(json!({
            "upload_id": "300-sitezip",
            "filename": "site.zip",
            "received": [1, 2],
            "missing": [3],
            "total_chunks": 3,
            "percentage": 66
        }));
    });
    let resend = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/uploads/chunks")
            .body_contains("name=\"chunk_index\"\r\n\r\n1\r\n");
        then.status(200).json_body(json!({"done": false, "percentage": 33}));
    });
    let last = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/uploads/chunks")
            .body_contains("name=\"chunk_index\"\r\n\r\n3\r\n");
        then.status(200).json_body(json!({
            "done": true,
            "filename": "site.zip",
            "path": "/var/lib/hauler/uploads/def.zip",
            "size": 300,
            "stored_as": "def.zip"
        }));
    });

    let client = ApiClient::new(&server.base_url(), "42").unwrap();
    let options = UploadOptions {
        chunk_size: 100,
        ..UploadOptions::default()
    };
    let upload = ChunkedUploader::new(&client, options)
        .upload_file(&path, |_| {})
        .await
        .unwrap();

    assert_eq!(upload.stored_as, "def.zip");
    assert_eq!(upload.sha256, None);
    resend.assert_hits(0);
    last.assert();
}

#[tokio::test]
async fn chunk_upload_retries_server_errors() {
    if !can_bind_localhost() {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.zip");
    std::fs::write(&path, vec![1u8; 10]).unwrap();

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/uploads/10-sitezip");
        then.status(404)
            .json_body(json!({"error": true, "message": "Not found"}));
    });
    let failing = server.mock(|when, then| {
        when.method(POST).path("/v1/uploads/chunks");
        then.status(503).body("unavailable");
    });

    let client = ApiClient::new(&server.base_url(), "42").unwrap();
    let options = UploadOptions {
        chunk_size: 10,
        max_retries: 3,
        retry_delay: Duration::from_millis(1),
    };
    let err = ChunkedUploader::new(&client, options)
        .upload_file(&path, |_| {})
        .await
        .unwrap_err();

    assert!(err.to_string().contains("chunk 1/1 failed"), "{err:#}");
    failing.assert_hits(4);
}

#[test]
fn chunk_response_shapes() {
    let pending: ChunkResponse =
        serde_json::from_value(json!({"done": false, "percentage": 50})).unwrap();
    assert!(matches!(
        pending,
        ChunkResponse::Pending {
            done: false,
            percentage: Some(50)
        }
    ));

    let complete: ChunkResponse = serde_json::from_value(json!({
        "done": true,
        "filename": "site.zip",
        "path": "/srv/u/x.zip",
        "size": 3,
        "stored_as": "x.zip",
        "sha256": "ab"
    }))
    .unwrap();
    assert!(matches!(complete, ChunkResponse::Complete { done: true, .. }));
}

#[test]
fn base_url_must_be_http() {
    assert!(ApiClient::new("ftp://example.com", "42").is_err());
    let client = ApiClient::new("https://sites.example.com/", "42").unwrap();
    assert_eq!(client.base_url(), "https://sites.example.com");
}
