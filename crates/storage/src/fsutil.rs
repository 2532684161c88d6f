//! Filesystem helpers with atomic and idempotent semantics.

use nix::fcntl::{Flock, FlockArg};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Create a directory (and its parents) unless it already exists.
///
/// Concurrent callers racing on the same path all succeed: an
/// "already exists" result is success as long as the path is a directory.
pub async fn create_dir_if_absent(path: &Path) -> std::io::Result<()> {
    match fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if fs::metadata(path).await?.is_dir() {
                Ok(())
            } else {
                Err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("{} exists and is not a directory", path.display()),
                ))
            }
        }
        Err(e) => Err(e),
    }
}

/// Unique temporary sibling path for `path`.
///
/// The name starts with `.` so directory scans can skip in-flight files.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp.{}", Uuid::new_v4()))
}

/// Hidden lock file guarding read-modify-write cycles on `path`.
pub fn lock_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.lock"))
}

/// Exclusive `flock` on a lock file, released on drop.
///
/// The kernel drops the lock when the holding process dies, so a crashed
/// writer never leaves the file locked.
pub struct FileLock {
    _flock: Flock<std::fs::File>,
}

/// Take an exclusive lock on the lock sibling of `path`.
///
/// Waits for holders in this and every other process. The parent directory
/// must exist.
pub async fn lock_exclusive(path: &Path) -> std::io::Result<FileLock> {
    let lock_path = lock_sibling(path);
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        let flock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| std::io::Error::from(errno))?;
        Ok(FileLock { _flock: flock })
    })
    .await
    .map_err(|e| std::io::Error::other(format!("spawn_blocking failed: {e}")))?
}

/// Write `data` to `path` via temp file, fsync and rename.
pub async fn write_file_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_if_absent(parent).await?;
    }
    let temp_path = temp_sibling(path);
    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        // Data must be on disk before the rename publishes it
        file.sync_all().await?;
        fs::rename(&temp_path, path).await
    }
    .await;
    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}

/// Write `data` to `path` only if nothing exists there yet.
///
/// The temp file is hard-linked into place, which fails atomically when the
/// target exists. Returns `false` in that case.
pub async fn write_file_if_absent(path: &Path, data: &[u8]) -> std::io::Result<bool> {
    if let Some(parent) = path.parent() {
        create_dir_if_absent(parent).await?;
    }
    let temp_path = temp_sibling(path);
    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        match fs::hard_link(&temp_path, path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }
    .await;
    let _ = fs::remove_file(&temp_path).await;
    result
}
