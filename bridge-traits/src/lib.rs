//! # Host Bridge Traits
//!
//! Contracts between the mirror engine and the world around it.
//!
//! ## Overview
//!
//! The engine reads a remote repository through [`RemoteTreeClient`] and
//! writes the local tree through [`FileSystemAccess`]. Protocol adapters
//! (such as `provider-cmis`) reach the network through [`HttpClient`].
//! Desktop implementations of the local traits live in `bridge-desktop`.
//!
//! ## Traits
//!
//! - [`RemoteTreeClient`](remote::RemoteTreeClient) - Change log, resolve, list, download
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Local tree I/O with atomic replace
//! - [`HttpClient`](http::HttpClient) - Async HTTP transport with retry policy
//!
//! ## Error Handling
//!
//! Local and transport traits use [`BridgeError`](error::BridgeError).
//! The remote contract uses [`RemoteError`](remote::RemoteError), whose
//! variants carry the classification the engine needs: authorization
//! failures abort a pass, transient failures are retried later, and
//! token failures trigger a full crawl.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so that implementations can be
//! shared across async tasks.

pub mod error;
pub mod http;
pub mod remote;
pub mod storage;

pub use error::BridgeError;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use remote::{
    ChangeBatch, ChangeEvent, ChangeKind, ChangeToken, RemoteDocument, RemoteError, RemoteFolder,
    RemoteNode, RemoteObject, RemoteResult, RemoteTreeClient,
};
pub use storage::{FileMetadata, FileSystemAccess};
