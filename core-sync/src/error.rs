use bridge_traits::{BridgeError, RemoteError};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Local I/O error at {path}: {message}")]
    LocalIo { path: String, message: String },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Index belongs to {recorded}, not {requested}")]
    IndexRootMismatch { recorded: String, requested: String },

    #[error("Data inconsistency at {path}: {message}")]
    DataInconsistency { path: String, message: String },

    #[error("Name conflict: '{path}' collides with existing '{existing}'")]
    NameConflict { path: String, existing: String },

    #[error("Remote root {0} not found or not a folder")]
    RemoteRootMissing(String),

    #[error("Sync pass timed out after {0:?}")]
    Timeout(Duration),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Sync already in progress for repository {repository_id}")]
    AlreadyRunning { repository_id: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },
}

/// How a failure affects the running pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Abort the pass and surface the error to the caller
    Fatal,
    /// Report, skip the item, keep going
    Recoverable,
    /// Switch to a full crawl
    Fallback,
}

impl SyncError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SyncError::Remote(e) if e.is_authorization() => ErrorSeverity::Fatal,
            SyncError::Remote(e) if e.requires_crawl() => ErrorSeverity::Fallback,
            SyncError::Remote(_) => ErrorSeverity::Recoverable,
            SyncError::Index(_)
            | SyncError::IndexRootMismatch { .. }
            | SyncError::InvalidStateTransition { .. } => ErrorSeverity::Fatal,
            SyncError::LocalIo { .. }
            | SyncError::DataInconsistency { .. }
            | SyncError::NameConflict { .. }
            | SyncError::RemoteRootMissing(_)
            | SyncError::Timeout(_)
            | SyncError::Cancelled
            | SyncError::AlreadyRunning { .. } => ErrorSeverity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == ErrorSeverity::Fatal
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    pub(crate) fn local_io(path: &Path, error: BridgeError) -> Self {
        SyncError::LocalIo {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(error: sqlx::Error) -> Self {
        SyncError::Index(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
