//! End-to-end tests of the haulerctl binary against a mocked server.

use assert_cmd::Command;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use predicates::prelude::*;
use serde_json::json;
use std::net::TcpListener;
use tempfile::TempDir;

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// haulerctl with an empty config location, so no local client config leaks in.
fn haulerctl(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("haulerctl").unwrap();
    cmd.env("HAULER_CLIENT_CONFIG", config_dir.path().join("client.toml"))
        .env_remove("HAULERCTL_SERVER")
        .env_remove("HAULERCTL_USER")
        .env_remove("HAULERCTL_CHUNK_SIZE");
    cmd
}

fn status_body(status: &str, message: &str) -> serde_json::Value {
    json!({
        "job_id": "abc123",
        "status": status,
        "progress": if status == "succeeded" { 100 } else { 40 },
        "message": message,
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:05Z",
        "destination": "blog",
        "user_id": "42",
        "archive_path": "/var/lib/hauler/imports/site.zip",
        "source": "path",
        "site_id": 12
    })
}

#[test]
fn import_requires_exactly_one_source() {
    let dir = TempDir::new().unwrap();

    haulerctl(&dir)
        .args(["--user", "42", "import", "--destination", "blog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));

    haulerctl(&dir)
        .args([
            "--user",
            "42",
            "import",
            "--destination",
            "blog",
            "--server-path",
            "/srv/site.zip",
            "--archive",
            "site.zip",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn commands_need_a_user() {
    let dir = TempDir::new().unwrap();

    haulerctl(&dir)
        .args(["--server", "http://127.0.0.1:1", "status", "abc123"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no user configured"));
}

#[test]
fn health_prints_server_version() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let dir = TempDir::new().unwrap();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/health");
        then.status(200)
            .json_body(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}));
    });

    haulerctl(&dir)
        .args(["--server", &server.base_url(), "health"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: ok"))
        .stdout(predicate::str::contains(format!(
            "Server version: {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn import_without_watch_prints_job_id() {
    if !can_bind_localhost() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let server = MockServer::start();
    let submit = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/imports")
            .header("x-hauler-user", "42")
            .body_contains("/srv/backups/site.zip");
        then.status(202).json_body(json!({
            "error": false,
            "message": "Import queued.",
            "job_id": "abc123",
            "status_url": "/v1/imports/abc123"
        }));
    });

    haulerctl(&dir)
        .args([
            "--server",
            &server.base_url(),
            "--user",
            "42",
            "import",
            "--destination",
            "blog",
            "--server-path",
            "/srv/backups/site.zip",
            "--no-watch",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Import queued. Job id: abc123"))
        .stdout(predicate::str::contains("Status: /v1/imports/abc123"));
    submit.assert();
}

#[test]
fn watch_exit_code_follows_job_outcome() {
    if !can_bind_localhost() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/imports/abc123");
        then.status(200)
            .json_body(status_body("succeeded", "Import completed."));
    });
    server.mock(|when, then| {
        when.method(GET).path("/v1/imports/def456");
        then.status(200)
            .json_body(status_body("failed", "Archive is corrupt"));
    });

    haulerctl(&dir)
        .args(["--server", &server.base_url(), "--user", "42"])
        .args(["status", "abc123", "--watch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Import completed. Site id: 12"));

    haulerctl(&dir)
        .args(["--server", &server.base_url(), "--user", "42"])
        .args(["status", "def456", "--watch"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Import failed: Archive is corrupt"));
}
