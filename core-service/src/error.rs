use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Repository already registered: {0}")]
    RepositoryExists(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
