//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use core_async::fs;
use core_async::io::AsyncWriteExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Suffix of in-flight download files. Never synchronized.
pub const PARTIAL_SUFFIX: &str = ".sync-part";

/// Tokio-based file system implementation
///
/// Atomic replacement writes the payload to a hidden sibling file, flushes it
/// to disk and renames it over the destination, so the destination is never
/// observed half-written.
#[derive(Debug, Default, Clone)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }

    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }

    fn partial_path(path: &Path) -> Result<PathBuf> {
        let name = path.file_name().ok_or_else(|| {
            BridgeError::OperationFailed(format!("No file name in {}", path.display()))
        })?;
        let partial = format!(
            ".{}.{}{}",
            name.to_string_lossy(),
            Uuid::new_v4().simple(),
            PARTIAL_SUFFIX
        );
        Ok(path.with_file_name(partial))
    }

    async fn write_partial(partial: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(partial).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;

        Ok(FileMetadata {
            size: metadata.len(),
            modified_at: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        fs::write(path, data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn replace_file_atomic(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(Self::map_io_error)?;
        }

        let partial = Self::partial_path(path)?;

        if let Err(e) = Self::write_partial(&partial, &data).await {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                warn!(path = ?partial, error = %cleanup, "Failed to remove partial file");
            }
            return Err(Self::map_io_error(e));
        }

        if let Err(e) = fs::rename(&partial, path).await {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                warn!(path = ?partial, error = %cleanup, "Failed to remove partial file");
            }
            return Err(Self::map_io_error(e));
        }

        debug!(path = ?path, size = data.len(), "Replaced file");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await.map_err(Self::map_io_error)?;
        debug!(from = ?from, to = ?to, "Renamed");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn delete_dir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted empty directory");
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted directory");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir.next_entry().await.map_err(Self::map_io_error)? {
            entries.push(entry.path());
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }
}
