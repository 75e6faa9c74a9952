//! Remote Repository Tree Abstraction
//!
//! The contract the mirror engine consumes to read a remote content
//! repository: a change-log cursor, token-bounded change batches, object
//! resolution, folder listing and content download.
//!
//! Object resolution returns an explicit tagged variant
//! ([`RemoteObject::Document`], [`RemoteObject::Folder`],
//! [`RemoteObject::Missing`]) so callers branch with `match` instead of
//! probing object types at runtime.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Change Token
// ============================================================================

/// Opaque change-log cursor issued by the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeToken(String);

impl ChangeToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChangeToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChangeToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Change Events
// ============================================================================

/// Kind of change reported by the remote change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    SecurityChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
            ChangeKind::SecurityChanged => "security",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a change-log batch.
///
/// `remote_path` is only known when the remote reports it alongside the
/// event; the engine resolves the object by id to learn its current path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub remote_id: String,
    pub remote_path: Option<String>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, remote_id: impl Into<String>) -> Self {
        Self {
            kind,
            remote_id: remote_id.into(),
            remote_path: None,
        }
    }

    pub fn with_path(mut self, remote_path: impl Into<String>) -> Self {
        self.remote_path = Some(remote_path.into());
        self
    }
}

/// An ordered, bounded slice of the remote change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Events in the order the remote reported them
    pub events: Vec<ChangeEvent>,
    /// Token marking the end of this batch
    pub latest_token: ChangeToken,
    /// Whether more events follow `latest_token`
    pub has_more: bool,
}

// ============================================================================
// Remote Objects
// ============================================================================

/// A document (file) stored in the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    /// Absolute remote path, `/`-separated
    pub path: String,
    /// Content fingerprint; `{sha-256}<hex>` values are verified after download
    pub content_hash: String,
    pub size: Option<u64>,
}

/// A folder in the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    /// Absolute remote path, `/`-separated
    pub path: String,
}

/// A child entry returned by folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteNode {
    Document(RemoteDocument),
    Folder(RemoteFolder),
}

impl RemoteNode {
    pub fn id(&self) -> &str {
        match self {
            RemoteNode::Document(doc) => &doc.id,
            RemoteNode::Folder(folder) => &folder.id,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            RemoteNode::Document(doc) => &doc.path,
            RemoteNode::Folder(folder) => &folder.path,
        }
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        let path = self.path().trim_end_matches('/');
        path.rsplit('/').next().unwrap_or(path)
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, RemoteNode::Folder(_))
    }
}

/// Result of resolving a remote object by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteObject {
    Document(RemoteDocument),
    Folder(RemoteFolder),
    /// The object no longer exists remotely
    Missing,
}

impl From<RemoteNode> for RemoteObject {
    fn from(node: RemoteNode) -> Self {
        match node {
            RemoteNode::Document(doc) => RemoteObject::Document(doc),
            RemoteNode::Folder(folder) => RemoteObject::Folder(folder),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures reported by a [`RemoteTreeClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Server busy: {0}")]
    ServerBusy(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Account locked: {0}")]
    AccountLocked(String),

    #[error("External user not allowed: {0}")]
    ExternalUser(String),

    #[error("Change token rejected: {0}")]
    InvalidToken(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by repository: {0}")]
    NotSupported(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Credentials rejected or access denied. Locked accounts and external
    /// users are specialisations of a permission failure.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            RemoteError::PermissionDenied(_)
                | RemoteError::AccountLocked(_)
                | RemoteError::ExternalUser(_)
        )
    }

    /// Failures worth retrying later without any change on the caller's side.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_) | RemoteError::Timeout(_) | RemoteError::ServerBusy(_)
        )
    }

    /// The change log cannot serve this request; a full crawl is required.
    pub fn requires_crawl(&self) -> bool {
        matches!(
            self,
            RemoteError::InvalidToken(_) | RemoteError::NotSupported(_)
        )
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

// ============================================================================
// Client Trait
// ============================================================================

/// Read access to a remote repository tree.
///
/// Implementations are stateless from the engine's point of view and may be
/// shared between repositories if the host chooses to.
#[async_trait]
pub trait RemoteTreeClient: Send + Sync {
    /// Latest change-log token of the repository.
    ///
    /// Returns `Ok(None)` when the repository does not keep a change log.
    async fn current_token(&self) -> RemoteResult<Option<ChangeToken>>;

    /// Changes recorded after `since`, at most `max_items`, in log order.
    ///
    /// # Errors
    ///
    /// [`RemoteError::InvalidToken`] when `since` is unknown to the remote
    /// (for example after change-log truncation).
    async fn get_changes(&self, since: &ChangeToken, max_items: u32) -> RemoteResult<ChangeBatch>;

    /// Resolve an object by id.
    async fn resolve(&self, remote_id: &str) -> RemoteResult<RemoteObject>;

    /// Resolve an object by absolute remote path.
    async fn resolve_path(&self, path: &str) -> RemoteResult<RemoteObject>;

    /// Direct children of a folder.
    async fn list_children(&self, folder_id: &str) -> RemoteResult<Vec<RemoteNode>>;

    /// Full content of a document.
    async fn download_content(&self, document_id: &str) -> RemoteResult<Bytes>;
}
