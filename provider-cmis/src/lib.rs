//! # CMIS Provider
//!
//! Implements `RemoteTreeClient` on top of the CMIS 1.1 Browser Binding.
//!
//! ## Overview
//!
//! This crate provides:
//! - Basic authentication against a browser binding endpoint
//! - Repository discovery through the service document
//! - Change-log reads (`contentChanges`) and paged folder listings
//! - Content download and folder browsing for choosing a remote root
//! - Exponential backoff for busy servers and transport failures

pub mod client;
pub mod error;
pub mod types;

pub use client::{CmisClient, FolderTree, RepositoryInfo};
pub use error::{CmisError, Result};
