//! Local File System Abstraction
//!
//! The mirror engine never touches `std::fs` or `tokio::fs` directly: every
//! mutation of the synchronized local tree goes through [`FileSystemAccess`],
//! which lets tests and hosts substitute their own storage.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Implementations must make [`replace_file_atomic`](FileSystemAccess::replace_file_atomic)
/// crash-safe: a reader either sees the previous content or the new content,
/// never a truncated file.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn store(fs: &dyn FileSystemAccess, root: &Path, data: Bytes) -> Result<()> {
///     fs.replace_file_atomic(&root.join("docs/a.txt"), data).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file in place, creating it if it doesn't exist
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Write data to a sibling temporary file, then rename it over `path`.
    ///
    /// Parent directories are created as needed. On failure the previous
    /// content of `path` (if any) is left untouched.
    async fn replace_file_atomic(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Rename a file or directory
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete an empty directory
    async fn delete_dir(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Calculate total size of a directory recursively
    async fn directory_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in self.list_directory(&dir).await? {
                let metadata = self.metadata(&entry).await?;
                if metadata.is_directory {
                    pending.push(entry);
                } else {
                    total += metadata.size;
                }
            }
        }

        Ok(total)
    }
}
