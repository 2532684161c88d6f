//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::request::request_context_middleware;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Room for multipart framing and text fields around the file part.
const FORM_OVERHEAD: u64 = 64 * 1024;

fn body_limit(max_payload: u64) -> DefaultBodyLimit {
    let limit = max_payload.saturating_add(FORM_OVERHEAD);
    DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX))
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;

    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers/probes)
        .route("/v1/health", get(handlers::health_check))
        // Chunked uploads; the final chunk may carry up to twice the chunk size
        .route(
            "/v1/uploads/chunks",
            post(handlers::upload_chunk).layer(body_limit(server.max_chunk_size.saturating_mul(2))),
        )
        .route(
            "/v1/uploads/{upload_id}",
            get(handlers::get_upload).delete(handlers::abort_upload),
        )
        // Import jobs
        .route(
            "/v1/imports",
            post(handlers::submit_import)
                .layer(body_limit(server.max_archive_size))
                .get(handlers::list_imports),
        )
        .route("/v1/imports/{job_id}", get(handlers::get_import));

    let mut router = Router::new().merge(api_routes);

    // When enabled, restrict /metrics at the network level.
    if server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(middleware::from_fn(request_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
