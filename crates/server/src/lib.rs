//! HTTP API server for hauler.
//!
//! This crate provides the import control plane:
//! - Chunked archive uploads with resume and abort
//! - Archive source resolution (upload or server path)
//! - Import job submission and status polling
//! - Supervision of detached import workers
//! - Sweeping of abandoned upload sessions

pub mod chunks;
pub mod enqueue;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod request;
pub mod routes;
pub mod source;
pub mod state;
pub mod supervisor;
pub mod sweeper;

pub use error::ApiError;
pub use request::{SubmittingUser, TraceId};
pub use routes::create_router;
pub use state::AppState;
