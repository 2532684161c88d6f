//! Detached import worker for hauler.
//!
//! The server launches one `hauler-worker` process per job. It marks the job
//! running, keeps its heartbeat fresh, runs the configured import command and
//! translates the command's stdout status lines (see [`protocol`]) into job
//! record updates. The exit status decides the terminal state.

pub mod error;
pub mod protocol;
pub mod runner;

pub use error::{WorkerError, WorkerResult};
pub use protocol::{StatusLine, parse_line};
pub use runner::{IMPORT_COMPLETED, ImportInvocation, ImportOutcome, ImportRunner};
