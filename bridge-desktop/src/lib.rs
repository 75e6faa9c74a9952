//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux):
//! - `FileSystemAccess` using `tokio::fs`, with atomic replace via rename
//! - `HttpClient` using `reqwest` with rustls
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
//!
//! let http_client = ReqwestHttpClient::new()?;
//! let fs = TokioFileSystem::new();
//! ```

mod filesystem;
mod http;

pub use filesystem::{TokioFileSystem, PARTIAL_SUFFIX};
pub use http::ReqwestHttpClient;
