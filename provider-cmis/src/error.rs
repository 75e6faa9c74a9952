//! Error types for the CMIS provider

use bridge_traits::error::BridgeError;
use bridge_traits::RemoteError;
use thiserror::Error;

/// CMIS provider errors
#[derive(Error, Debug)]
pub enum CmisError {
    /// Credentials were rejected (HTTP 401)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Access to the object or repository is denied (HTTP 403)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The account is locked on the server side
    #[error("Account locked: {0}")]
    AccountLocked(String),

    /// Object or repository not found (HTTP 404)
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// The change-log token was not accepted by the repository
    #[error("Invalid or expired change token: {0}")]
    InvalidChangeToken(String),

    /// The repository is overloaded or throttling requests
    #[error("Server busy (status {status_code}): {message}")]
    ServerBusy { status_code: u16, message: String },

    /// Any other non-success response
    #[error("CMIS API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Failed to parse a browser binding response
    #[error("Failed to parse CMIS response: {0}")]
    ParseError(String),

    /// Connection-level failure
    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Result type for CMIS operations
pub type Result<T> = std::result::Result<T, CmisError>;

impl From<BridgeError> for CmisError {
    fn from(error: BridgeError) -> Self {
        CmisError::NetworkError(error.to_string())
    }
}

impl From<CmisError> for RemoteError {
    fn from(error: CmisError) -> Self {
        match error {
            CmisError::AuthenticationFailed(msg) | CmisError::PermissionDenied(msg) => {
                RemoteError::PermissionDenied(msg)
            }
            CmisError::AccountLocked(msg) => RemoteError::AccountLocked(msg),
            CmisError::ObjectNotFound(msg) => RemoteError::NotFound(msg),
            CmisError::InvalidChangeToken(msg) => RemoteError::InvalidToken(msg),
            CmisError::ServerBusy {
                status_code,
                message,
            } => RemoteError::ServerBusy(format!("status {}: {}", status_code, message)),
            CmisError::ApiError {
                status_code,
                message,
            } if status_code >= 500 => {
                RemoteError::Network(format!("status {}: {}", status_code, message))
            }
            CmisError::ApiError {
                status_code,
                message,
            } => RemoteError::Protocol(format!("status {}: {}", status_code, message)),
            CmisError::ParseError(msg) => RemoteError::Protocol(msg),
            CmisError::NetworkError(msg) => RemoteError::Network(msg),
        }
    }
}
