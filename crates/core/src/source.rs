//! Resolved archive sources.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where a resolved archive came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Uploaded with the submission and persisted by the server.
    Upload,
    /// Pre-existing file on the server.
    Path,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Path => f.write_str("path"),
        }
    }
}

/// Absolute path to a readable regular file plus its origin.
///
/// Ownership of the file passes to the job that is enqueued with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSource {
    pub path: PathBuf,
    pub kind: SourceKind,
}

impl ArchiveSource {
    pub fn new(path: impl Into<PathBuf>, kind: SourceKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}
