//! Small durable-write helpers.

use std::path::Path;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};

/// Write a whole file and fsync it before returning.
pub async fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    file.write_all(data)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    file.sync_all().await.map_err(|e| StorageError::io(path, e))
}

/// Write to `<path>.tmp`, fsync, and rename into place.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    write_synced(&tmp, data).await?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::io(path, e))
}

/// Fsync a directory so a rename inside it is durable. Best effort on
/// platforms that cannot open directories; failures are logged.
pub async fn sync_dir(path: &Path) {
    match tokio::fs::File::open(path).await {
        Ok(dir) => {
            if let Err(e) = dir.sync_all().await {
                warn!(path = %path.display(), error = %e, "Failed to fsync directory");
            }
        }
        Err(e) => debug!(path = %path.display(), error = %e, "Cannot open directory to fsync"),
    }
}

/// Subdirectories of `path`; a missing directory yields none.
pub async fn list_dirs(path: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(path, e))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
