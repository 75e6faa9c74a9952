//! # Core Runtime Module
//!
//! Ambient infrastructure shared by the mirror engine crates:
//! - Logging and tracing bootstrap (`logging`)
//! - Repository and connection configuration (`config`)
//! - Event bus for pass lifecycle notifications (`events`)
//!
//! ## Overview
//!
//! Nothing in this crate knows how a pass works. It only fixes the
//! conventions every other crate follows: how settings are validated, how
//! events are shaped, and how log output is configured.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
