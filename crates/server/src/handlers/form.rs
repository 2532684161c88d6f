//! Multipart form collection.

use crate::error::{ApiError, ApiResult};
use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use bytes::Bytes;
use hauler_storage::fsutil;
use std::collections::HashMap;
use std::path::Path;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const FILE_NOT_STORED: &str = "The uploaded file could not be stored.";

/// A file part of a multipart form.
#[derive(Clone, Debug)]
pub struct FilePart {
    pub filename: String,
    pub data: Bytes,
}

/// A file part streamed to disk while the form was read.
///
/// The file is removed when this is dropped, unless it was persisted first.
#[derive(Debug)]
pub struct SpooledFile {
    pub filename: String,
    pub size: u64,
    pub path: TempPath,
}

/// Text fields and file parts of a multipart request, keyed by field name.
///
/// A repeated field keeps its last value.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, FilePart>,
    spooled: HashMap<String, SpooledFile>,
}

impl FormData {
    /// Read the whole form into memory.
    ///
    /// Parts named in `file_fields` are kept as files, even when the client
    /// sent no file name; everything else must be UTF-8 text.
    pub async fn collect(multipart: Multipart, file_fields: &[&str]) -> ApiResult<Self> {
        Self::read(multipart, file_fields, None).await
    }

    /// Like [`collect`](Self::collect), but file parts are streamed into
    /// temporary files under `spool_dir` as they arrive.
    pub async fn collect_spooled(
        multipart: Multipart,
        file_fields: &[&str],
        spool_dir: &Path,
    ) -> ApiResult<Self> {
        Self::read(multipart, file_fields, Some(spool_dir)).await
    }

    async fn read(
        mut multipart: Multipart,
        file_fields: &[&str],
        spool_dir: Option<&Path>,
    ) -> ApiResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if file_fields.contains(&name.as_str()) || field.file_name().is_some() {
                let filename = field.file_name().unwrap_or_default().to_string();
                match spool_dir {
                    Some(dir) => {
                        let (path, size) = spool(field, &name, dir).await?;
                        form.spooled.insert(name, SpooledFile { filename, size, path });
                    }
                    None => {
                        let data = field.bytes().await.map_err(multipart_error)?;
                        form.files.insert(name, FilePart { filename, data });
                    }
                }
            } else {
                let text = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    /// First present text field among `names`.
    pub fn text(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .find_map(|n| self.fields.get(*n))
            .map(String::as_str)
    }

    /// Required text field, as a 422 under `names[0]` when missing.
    pub fn require(&self, names: &[&str]) -> ApiResult<&str> {
        match self.text(names).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ApiError::field(
                names[0],
                format!("The {} field is required.", names[0].replace('_', " ")),
            )),
        }
    }

    /// Parse a numeric text field.
    pub fn number<T: std::str::FromStr>(&self, names: &[&str]) -> ApiResult<Option<T>> {
        let Some(raw) = self.text(names).map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        raw.parse().map(Some).map_err(|_| {
            ApiError::field(
                names[0],
                format!("The {} must be a number.", names[0].replace('_', " ")),
            )
        })
    }

    /// Required numeric text field.
    pub fn require_number<T: std::str::FromStr>(&self, names: &[&str]) -> ApiResult<T> {
        self.require(names)?;
        self.number(names)?.ok_or_else(|| {
            ApiError::field(
                names[0],
                format!("The {} field is required.", names[0].replace('_', " ")),
            )
        })
    }

    pub fn take_file(&mut self, names: &[&str]) -> Option<FilePart> {
        names.iter().find_map(|n| self.files.remove(*n))
    }

    pub fn take_spooled(&mut self, names: &[&str]) -> Option<SpooledFile> {
        names.iter().find_map(|n| self.spooled.remove(*n))
    }
}

/// Copy one part into a fresh temp file under `dir`, chunk by chunk.
async fn spool(mut field: Field<'_>, name: &str, dir: &Path) -> ApiResult<(TempPath, u64)> {
    let storage_error = |e: std::io::Error| {
        warn!(field = name, dir = %dir.display(), error = %e, "Failed to spool file part");
        ApiError::Storage {
            field: name.to_string(),
            message: FILE_NOT_STORED.to_string(),
        }
    };

    fsutil::create_dir_if_absent(dir).await.map_err(storage_error)?;
    let temp = tempfile::Builder::new()
        .prefix(".incoming-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(storage_error)?;
    let (file, path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        file.write_all(&chunk).await.map_err(storage_error)?;
        size += chunk.len() as u64;
    }
    file.sync_all().await.map_err(storage_error)?;

    debug!(field = name, size, path = %path.display(), "Spooled file part");
    Ok((path, size))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::Request;

    const BOUNDARY: &str = "hauler-form-boundary";

    async fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Multipart {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match filename {
                Some(f) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method("POST")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    #[tokio::test]
    async fn file_parts_are_streamed_to_the_spool_dir() {
        let dir = tempfile::tempdir().unwrap();
        let spool_dir = dir.path().join("imports");
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();

        let mut form = FormData::collect_spooled(
            multipart(&[
                ("destination", None, &b"blog"[..]),
                ("archive", Some("site.zip"), data.as_slice()),
            ])
            .await,
            &["archive"],
            &spool_dir,
        )
        .await
        .unwrap();

        assert_eq!(form.text(&["destination"]), Some("blog"));
        assert!(form.take_file(&["archive"]).is_none());
        let file = form.take_spooled(&["archive"]).unwrap();
        assert_eq!(file.filename, "site.zip");
        assert_eq!(file.size, data.len() as u64);
        assert_eq!(file.path.parent(), Some(spool_dir.as_path()));
        assert_eq!(std::fs::read(&file.path).unwrap(), data);

        let spooled_path = file.path.to_path_buf();
        drop(file);
        assert!(!spooled_path.exists());
    }

    #[tokio::test]
    async fn in_memory_collection_keeps_bytes() {
        let mut form = FormData::collect(
            multipart(&[("file", Some("blob"), &b"abc"[..]), ("chunk_index", None, &b"1"[..])]).await,
            &["file"],
        )
        .await
        .unwrap();
        assert_eq!(form.number::<u64>(&["chunk_index"]).unwrap(), Some(1));
        assert_eq!(form.take_file(&["file"]).unwrap().data, Bytes::from_static(b"abc"));
        assert!(form.take_spooled(&["file"]).is_none());
    }
}
