//! # Sync Engine
//!
//! Mirrors one remote repository folder into one local directory and keeps
//! the two converged over repeated passes.
//!
//! ## Overview
//!
//! - **Sync Index** (`index`): durable per-path record of what has been
//!   mirrored, plus the change-token slot
//! - **Tree Mirror** (`mirror`): create, update and remove local entries to
//!   match remote nodes; recursive subtree reconciliation
//! - **Change Dispatcher** (`dispatcher`): applies one change-log event
//! - **Strategies** (`strategy`): change-log delta and full crawl behind one
//!   trait
//! - **Orchestrator** (`orchestrator`): pass lifecycle, strategy selection,
//!   single-flight execution and cooperative cancellation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SqliteSyncIndex, SyncHooks, SyncOrchestrator, SyncSettings};
//! use std::sync::Arc;
//!
//! let index = SqliteSyncIndex::open(&config.resolved_index_path(), &config.local_root).await?;
//! let orchestrator = SyncOrchestrator::new(
//!     SyncSettings::from(&config),
//!     remote,
//!     Arc::new(index),
//!     Arc::new(TokioFileSystem::new()),
//!     SyncHooks::new().with_recoverable_error(|message, error| eprintln!("{message}: {error}")),
//! );
//!
//! let result = orchestrator.run_pass(false).await?;
//! println!("{:?}: {} downloaded", result.outcome, result.stats.downloaded);
//! ```

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod hash;
pub mod hooks;
pub mod ignore;
pub mod index;
pub mod mirror;
pub mod orchestrator;
pub mod paths;
pub mod strategy;

pub use context::{PassContext, PassStats};
pub use dispatcher::{ChangeDispatcher, DispatchOutcome};
pub use error::{ErrorSeverity, Result, SyncError};
pub use hash::{sha256_content_hash, verify_content, ContentCheck};
pub use hooks::{PassProgress, PauseSwitch, SuspendCheck, SyncHooks};
pub use ignore::IgnoreSet;
pub use index::{IndexEntry, SqliteSyncIndex, SyncIndex};
pub use mirror::TreeMirror;
pub use orchestrator::{
    CrawlReason, Decision, PassOutcome, PassResult, SyncOrchestrator, SyncSettings, SyncState,
};
pub use paths::RemotePathMapper;
pub use strategy::{
    ChangeDetection, ChangeLogStrategy, CrawlStrategy, DetectionOutcome, StrategyKind,
};
