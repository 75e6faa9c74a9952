//! Per-pass execution context shared by the strategies and mirror
//! operations: cancellation, suspension, counters and reporting.

use crate::error::{Result, SyncError};
use crate::hooks::{PassProgress, SyncHooks};
use crate::strategy::StrategyKind;
use core_async::sync::CancellationToken;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Counters accumulated over one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub downloaded: u64,
    pub skipped_unchanged: u64,
    pub folders_created: u64,
    pub deleted: u64,
    /// Out-of-scope or ignored items that were dropped without side effects
    pub discarded: u64,
    pub errors: u64,
    pub events: u64,
}

#[derive(Debug, Default)]
struct Counters {
    downloaded: AtomicU64,
    skipped_unchanged: AtomicU64,
    folders_created: AtomicU64,
    deleted: AtomicU64,
    discarded: AtomicU64,
    errors: AtomicU64,
    events: AtomicU64,
    processed: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct Scope {
    strategy: StrategyKind,
    total: Option<u64>,
}

/// State threaded through one pass.
#[derive(Debug)]
pub struct PassContext {
    cancel: CancellationToken,
    hooks: SyncHooks,
    counters: Counters,
    scope: Mutex<Scope>,
}

impl PassContext {
    pub fn new(cancel: CancellationToken, hooks: SyncHooks) -> Self {
        Self {
            cancel,
            hooks,
            counters: Counters::default(),
            scope: Mutex::new(Scope {
                strategy: StrategyKind::Crawl,
                total: None,
            }),
        }
    }

    /// Context that is never cancelled and has no hooks.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), SyncHooks::default())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation and suspension are observed here and nowhere else.
    ///
    /// Emits progress, then blocks while the host has paused the worker.
    /// Returns [`SyncError::Cancelled`] once cancellation is requested.
    pub async fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        self.hooks.progress(&self.progress());

        if let Some(suspend) = &self.hooks.suspend {
            core_async::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = suspend.wait_until_resumed() => {}
            }
        }

        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Reports a recoverable failure and counts it.
    pub fn report(&self, message: &str, error: &SyncError) {
        warn!(error = %error, "{}", message);
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.hooks.recoverable_error(message, error);
    }

    pub(crate) fn begin(&self, strategy: StrategyKind, total: Option<u64>) {
        let mut scope = self.scope.lock().unwrap_or_else(PoisonError::into_inner);
        scope.strategy = strategy;
        scope.total = total;
    }

    pub fn progress(&self) -> PassProgress {
        let scope = *self.scope.lock().unwrap_or_else(PoisonError::into_inner);
        PassProgress {
            strategy: scope.strategy,
            processed: self.counters.processed.load(Ordering::Relaxed),
            total: scope.total,
        }
    }

    pub fn stats(&self) -> PassStats {
        let c = &self.counters;
        PassStats {
            downloaded: c.downloaded.load(Ordering::Relaxed),
            skipped_unchanged: c.skipped_unchanged.load(Ordering::Relaxed),
            folders_created: c.folders_created.load(Ordering::Relaxed),
            deleted: c.deleted.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            events: c.events.load(Ordering::Relaxed),
        }
    }

    pub fn errors(&self) -> u64 {
        self.counters.errors.load(Ordering::Relaxed)
    }

    pub(crate) fn item_processed(&self) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn downloaded(&self) {
        self.counters.downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn skipped_unchanged(&self) {
        self.counters.skipped_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn folder_created(&self) {
        self.counters.folders_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn deleted(&self, count: u64) {
        self.counters.deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn discarded(&self) {
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn event_applied(&self) {
        self.counters.events.fetch_add(1, Ordering::Relaxed);
    }
}
