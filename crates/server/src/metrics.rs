//! Prometheus metrics for the hauler server.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Metrics carry no job ids, destinations or paths, but they do expose
//! aggregate usage; restrict the endpoint at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Chunked upload metrics
pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hauler_chunks_received_total",
        "Total number of upload chunks stored",
    )
    .expect("metric creation failed")
});

pub static BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hauler_chunk_bytes_received_total",
        "Total chunk payload bytes stored",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_ASSEMBLED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hauler_uploads_assembled_total",
        "Total number of chunked uploads assembled into a file",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_SWEPT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hauler_upload_sessions_swept_total",
        "Total number of idle upload sessions reclaimed",
    )
    .expect("metric creation failed")
});

pub static CHUNK_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("hauler_chunk_errors_total", "Rejected or failed chunk uploads"),
        &["reason"],
    )
    .expect("metric creation failed")
});

// Import job metrics
pub static JOBS_ENQUEUED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hauler_jobs_enqueued_total",
        "Total number of import jobs accepted",
    )
    .expect("metric creation failed")
});

pub static JOBS_REAPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hauler_jobs_reaped_total",
            "Import jobs marked failed by the watchdog",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static WORKER_SPAWN_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hauler_worker_spawn_failures_total",
        "Import workers that could not be started",
    )
    .expect("metric creation failed")
});

pub static WORKERS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "hauler_workers_active",
        "Import worker processes currently tracked by the supervisor",
    )
    .expect("metric creation failed")
});

// Request metrics
pub static HTTP_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "hauler_http_request_duration_seconds",
            "Duration of API requests in seconds",
        )
        .buckets(vec![
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ]),
        &["route"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once; tests build many routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CHUNKS_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_ASSEMBLED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_SWEPT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOBS_ENQUEUED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOBS_REAPED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(WORKER_SPAWN_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(WORKERS_ACTIVE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(HTTP_REQUEST_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// Count a rejected or failed chunk by reason.
pub fn record_chunk_error(reason: &str) {
    CHUNK_ERRORS.with_label_values(&[reason]).inc();
}

/// Count a job reaped by the watchdog.
pub fn record_reaped(reason: &str, count: usize) {
    JOBS_REAPED
        .with_label_values(&[reason])
        .inc_by(count as u64);
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
