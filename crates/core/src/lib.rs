//! Core domain types and shared logic for the hauler import service.
//!
//! This crate defines the data model used across all other crates:
//! - Import jobs and their status records
//! - Destination identifiers
//! - Chunked upload descriptors and sessions
//! - Resolved archive sources
//! - Randomized stored file names
//! - Service configuration

pub mod config;
pub mod destination;
pub mod error;
pub mod job;
pub mod naming;
pub mod source;
pub mod upload;

pub use destination::DestinationId;
pub use error::{Error, Result};
pub use job::{JobId, JobStatus, JobStatusRecord, JobStatusView};
pub use naming::StoredName;
pub use source::{ArchiveSource, SourceKind};
pub use upload::{ChunkDescriptor, UploadId, UploadSession};

/// Default chunk size used by clients: 8 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Maximum accepted chunk size: 32 MiB
pub const MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Length of the random token used for stored archive names.
pub const STORED_NAME_TOKEN_LEN: usize = 40;
