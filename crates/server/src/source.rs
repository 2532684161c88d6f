//! Archive source resolution: exactly one of an uploaded file or a server path.

use crate::error::ApiError;
use crate::handlers::form::SpooledFile;
use hauler_core::{ArchiveSource, SourceKind, StoredName};
use hauler_storage::fsutil;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const MISSING_SOURCE: &str = "Provide an archive upload or a server path.";
pub const AMBIGUOUS_SOURCE: &str = "Choose either the upload OR the server path — not both.";
pub const PATH_NOT_FOUND: &str = "The server path does not exist or is not a readable file.";
pub const ARCHIVE_NOT_STORED: &str = "The uploaded archive could not be stored.";

/// An archive file sent with the import request, already spooled to disk
/// next to its final location.
///
/// Dropping it without storing removes the spooled file.
pub type UploadedArchive = SpooledFile;

/// Browsers send an empty, nameless part when no file was picked.
fn is_blank(upload: &UploadedArchive) -> bool {
    upload.filename.trim().is_empty() && upload.size == 0
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("no archive source given")]
    Missing,

    #[error("both an upload and a server path were given")]
    Ambiguous,

    #[error("server path {0:?} is not a readable file")]
    PathNotFound(PathBuf),

    #[error("failed to store uploaded archive: {0}")]
    Storage(#[source] std::io::Error),
}

impl From<SourceError> for ApiError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Missing => ApiError::field("archive", MISSING_SOURCE),
            SourceError::Ambiguous => ApiError::fields(&["archive", "server_path"], AMBIGUOUS_SOURCE),
            SourceError::PathNotFound(_) => ApiError::field("server_path", PATH_NOT_FOUND),
            SourceError::Storage(e) => {
                warn!(error = %e, "Uploaded archive could not be stored");
                ApiError::Storage {
                    field: "archive".to_string(),
                    message: ARCHIVE_NOT_STORED.to_string(),
                }
            }
        }
    }
}

/// Resolves import sources to absolute, readable archive paths.
#[derive(Clone, Debug)]
pub struct ArchiveSourceResolver {
    imports_dir: PathBuf,
}

impl ArchiveSourceResolver {
    pub fn new(imports_dir: impl Into<PathBuf>) -> Self {
        Self {
            imports_dir: imports_dir.into(),
        }
    }

    pub fn imports_dir(&self) -> &Path {
        &self.imports_dir
    }

    /// Resolve the mutually exclusive pair of upload and server path.
    ///
    /// A blank server path and an empty file part both count as absent.
    pub async fn resolve(
        &self,
        upload: Option<UploadedArchive>,
        server_path: Option<&str>,
    ) -> Result<ArchiveSource, SourceError> {
        match select(upload, server_path)? {
            Selected::Upload(upload) => self.store_upload(upload).await,
            Selected::ServerPath(path) => resolve_server_path(path).await,
        }
    }

    /// Run the same checks as [`resolve`](Self::resolve) without storing the
    /// upload. A given upload is discarded.
    pub async fn check(
        &self,
        upload: Option<UploadedArchive>,
        server_path: Option<&str>,
    ) -> Result<(), SourceError> {
        match select(upload, server_path)? {
            Selected::Upload(_) => Ok(()),
            Selected::ServerPath(path) => resolve_server_path(path).await.map(|_| ()),
        }
    }

    async fn store_upload(&self, upload: UploadedArchive) -> Result<ArchiveSource, SourceError> {
        fsutil::create_dir_if_absent(&self.imports_dir)
            .await
            .map_err(SourceError::Storage)?;

        let stored = StoredName::generate(&upload.filename);
        let target = self.imports_dir.join(stored.as_str());
        // Spooled under the imports dir, so this is a same-filesystem rename
        upload
            .path
            .persist(&target)
            .map_err(|e| SourceError::Storage(e.error))?;

        let path = fs::canonicalize(&target)
            .await
            .map_err(SourceError::Storage)?;
        check_readable(&path).await.map_err(SourceError::Storage)?;

        debug!(stored_as = %stored, size = upload.size, "Stored uploaded archive");
        Ok(ArchiveSource::new(path, SourceKind::Upload))
    }
}

enum Selected<'a> {
    Upload(UploadedArchive),
    ServerPath(&'a str),
}

fn select(
    upload: Option<UploadedArchive>,
    server_path: Option<&str>,
) -> Result<Selected<'_>, SourceError> {
    let upload = upload.filter(|u| !is_blank(u));
    let server_path = server_path.map(str::trim).filter(|p| !p.is_empty());

    match (upload, server_path) {
        (None, None) => Err(SourceError::Missing),
        (Some(_), Some(_)) => Err(SourceError::Ambiguous),
        (Some(upload), None) => Ok(Selected::Upload(upload)),
        (None, Some(path)) => Ok(Selected::ServerPath(path)),
    }
}

/// Canonicalize a server path, falling back to the raw string, and require a
/// readable regular file.
async fn resolve_server_path(raw: &str) -> Result<ArchiveSource, SourceError> {
    let path = match fs::canonicalize(raw).await {
        Ok(path) => path,
        Err(e) => {
            debug!(path = raw, error = %e, "Canonicalization failed, using raw path");
            PathBuf::from(raw)
        }
    };

    let is_file = fs::metadata(&path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file || check_readable(&path).await.is_err() {
        return Err(SourceError::PathNotFound(path));
    }
    Ok(ArchiveSource::new(path, SourceKind::Path))
}

async fn check_readable(path: &Path) -> std::io::Result<()> {
    fs::File::open(path).await.map(|_| ())
}
