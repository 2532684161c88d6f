//! Client side of hauler.
//!
//! - [`api_client`]: typed access to the HTTP API
//! - [`upload`]: resumable chunked uploads
//! - [`poller`]: the status polling loop

pub mod api_client;
pub mod poller;
pub mod upload;

pub use api_client::{ApiClient, ClientError, ImportSource};
pub use poller::{PollEvent, PollPolicy, PollResult, StatusSource, watch};
pub use upload::{ChunkedUploader, UploadOptions};
