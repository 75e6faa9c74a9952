//! # Sync Index
//!
//! Durable record of what has already been mirrored, keyed by index path
//! (see [`crate::paths`]). Besides per-path entries the store holds one
//! change-token slot, a resync flag, and the local root it describes.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::ChangeToken;
use core_async::time::unix_timestamp;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

const KEY_LOCAL_ROOT: &str = "local_root";
const KEY_CHANGE_TOKEN: &str = "change_token";
const KEY_RESYNC_REQUIRED: &str = "resync_required";

/// One mirrored file or folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub remote_id: String,
    /// Hash of the last synchronized content; always `None` for folders
    pub content_hash: Option<String>,
    pub is_folder: bool,
}

impl IndexEntry {
    pub fn document(
        path: impl Into<String>,
        remote_id: impl Into<String>,
        content_hash: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            remote_id: remote_id.into(),
            content_hash,
            is_folder: false,
        }
    }

    pub fn folder(path: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            remote_id: remote_id.into(),
            content_hash: None,
            is_folder: true,
        }
    }
}

/// Storage contract for the sync index.
///
/// Only the repository's own worker writes; readers may observe a pass in
/// progress.
#[async_trait]
pub trait SyncIndex: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<IndexEntry>>;

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<IndexEntry>>;

    async fn upsert(&self, entry: &IndexEntry) -> Result<()>;

    /// Removes `path` and every entry beneath it; returns the number of rows
    /// removed. The empty path removes everything.
    async fn remove_subtree(&self, path: &str) -> Result<u64>;

    /// Entries at or beneath `path`, ordered by path.
    async fn list_subtree(&self, path: &str) -> Result<Vec<IndexEntry>>;

    async fn len(&self) -> Result<u64>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn change_token(&self) -> Result<Option<ChangeToken>>;

    async fn set_change_token(&self, token: &ChangeToken) -> Result<()>;

    /// Forgets the stored token so the next pass crawls.
    async fn reset_change_token(&self) -> Result<()>;

    /// Whether the last pass left items that only a crawl will retry.
    async fn resync_required(&self) -> Result<bool>;

    async fn set_resync_required(&self, required: bool) -> Result<()>;
}

#[derive(Debug, FromRow)]
struct EntryRow {
    path: String,
    remote_id: String,
    content_hash: Option<String>,
    is_folder: i64,
}

impl From<EntryRow> for IndexEntry {
    fn from(row: EntryRow) -> Self {
        Self {
            path: row.path,
            remote_id: row.remote_id,
            content_hash: row.content_hash,
            is_folder: row.is_folder != 0,
        }
    }
}

/// SQLite-backed [`SyncIndex`].
pub struct SqliteSyncIndex {
    pool: SqlitePool,
}

impl SqliteSyncIndex {
    /// Opens (creating if needed) the index database at `db_path` for the
    /// mirror rooted at `local_root`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IndexRootMismatch`] when the database was created
    /// for another local root.
    pub async fn open(db_path: &Path, local_root: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            core_async::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::Index(format!("{}: {}", parent.display(), e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!(path = %db_path.display(), "Opened sync index");
        Self::from_pool(pool, local_root).await
    }

    /// Index held in memory; lost when dropped.
    pub async fn in_memory(local_root: &Path) -> Result<Self> {
        // Every connection to ":memory:" is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::from_pool(pool, local_root).await
    }

    /// Wraps an existing pool, creating the schema and binding it to
    /// `local_root`.
    pub async fn from_pool(pool: SqlitePool, local_root: &Path) -> Result<Self> {
        let index = Self { pool };
        index.create_schema().await?;
        index.bind_root(local_root).await?;
        Ok(index)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_entries (
                path TEXT PRIMARY KEY NOT NULL,
                remote_id TEXT NOT NULL,
                content_hash TEXT,
                is_folder INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_entries_remote_id ON sync_entries(remote_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn bind_root(&self, local_root: &Path) -> Result<()> {
        let requested = local_root.display().to_string();

        match self.state_value(KEY_LOCAL_ROOT).await? {
            Some(recorded) if recorded != requested => {
                Err(SyncError::IndexRootMismatch { recorded, requested })
            }
            Some(_) => Ok(()),
            None => {
                debug!(local_root = %requested, "Binding sync index to local root");
                self.set_state_value(KEY_LOCAL_ROOT, &requested).await
            }
        }
    }

    async fn state_value(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM sync_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_state_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_state_value(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Prefix that every strict descendant of `path` starts with.
fn descendant_prefix(path: &str) -> String {
    format!("{}/", path)
}

#[async_trait]
impl SyncIndex for SqliteSyncIndex {
    async fn get(&self, path: &str) -> Result<Option<IndexEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(
            "SELECT path, remote_id, content_hash, is_folder FROM sync_entries WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(IndexEntry::from))
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<IndexEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT path, remote_id, content_hash, is_folder
            FROM sync_entries
            WHERE remote_id = ?
            ORDER BY length(path)
            LIMIT 1
            "#,
        )
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(IndexEntry::from))
    }

    async fn upsert(&self, entry: &IndexEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_entries (path, remote_id, content_hash, is_folder, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                remote_id = excluded.remote_id,
                content_hash = excluded.content_hash,
                is_folder = excluded.is_folder,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.path)
        .bind(&entry.remote_id)
        .bind(&entry.content_hash)
        .bind(entry.is_folder as i64)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_subtree(&self, path: &str) -> Result<u64> {
        let result = if path.is_empty() {
            sqlx::query("DELETE FROM sync_entries")
                .execute(&self.pool)
                .await?
        } else {
            let prefix = descendant_prefix(path);
            sqlx::query(
                "DELETE FROM sync_entries WHERE path = ? OR substr(path, 1, length(?)) = ?",
            )
            .bind(path)
            .bind(&prefix)
            .bind(&prefix)
            .execute(&self.pool)
            .await?
        };

        Ok(result.rows_affected())
    }

    async fn list_subtree(&self, path: &str) -> Result<Vec<IndexEntry>> {
        let rows = if path.is_empty() {
            sqlx::query_as::<_, EntryRow>(
                "SELECT path, remote_id, content_hash, is_folder FROM sync_entries ORDER BY path",
            )
            .fetch_all(&self.pool)
            .await?
        } else {
            let prefix = descendant_prefix(path);
            sqlx::query_as::<_, EntryRow>(
                r#"
                SELECT path, remote_id, content_hash, is_folder
                FROM sync_entries
                WHERE path = ? OR substr(path, 1, length(?)) = ?
                ORDER BY path
                "#,
            )
            .bind(path)
            .bind(&prefix)
            .bind(&prefix)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows.into_iter().map(IndexEntry::from).collect())
    }

    async fn len(&self) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sync_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn change_token(&self) -> Result<Option<ChangeToken>> {
        Ok(self.state_value(KEY_CHANGE_TOKEN).await?.map(ChangeToken::new))
    }

    async fn set_change_token(&self, token: &ChangeToken) -> Result<()> {
        self.set_state_value(KEY_CHANGE_TOKEN, token.as_str()).await
    }

    async fn reset_change_token(&self) -> Result<()> {
        self.delete_state_value(KEY_CHANGE_TOKEN).await
    }

    async fn resync_required(&self) -> Result<bool> {
        Ok(self.state_value(KEY_RESYNC_REQUIRED).await?.as_deref() == Some("1"))
    }

    async fn set_resync_required(&self, required: bool) -> Result<()> {
        if required {
            self.set_state_value(KEY_RESYNC_REQUIRED, "1").await
        } else {
            self.delete_state_value(KEY_RESYNC_REQUIRED).await
        }
    }
}
