//! # Sync Orchestrator
//!
//! Owns the pass lifecycle for one repository.
//!
//! ## Overview
//!
//! A pass reads the stored change token, picks a strategy from an explicit
//! decision table, runs it, and persists the new token only after the
//! strategy finished without a pass-level error:
//!
//! | full rewrite | stored token | resync flag | remote token   | decision   |
//! |--------------|--------------|-------------|----------------|------------|
//! | yes          | any          | any         | not asked      | crawl      |
//! | no           | none         | any         | not asked      | crawl      |
//! | no           | some         | raised      | not asked      | crawl      |
//! | no           | some         | clear       | none           | crawl      |
//! | no           | `T`          | clear       | `T`            | up to date |
//! | no           | `T`          | clear       | other          | change log |
//!
//! A change log that rejects the stored token falls back to a crawl within
//! the same pass.
//!
//! ## State Machine
//!
//! `Idle → Running → {Idle, Error}`, `Running → Cancelling → Idle`.
//! `Error` is entered only on a fatal failure and may be left by starting
//! another pass.
//!
//! ## Single flight
//!
//! At most one pass runs per orchestrator. A second `run_pass` while one is
//! active returns a [`PassOutcome::Skipped`] result immediately.

use crate::context::{PassContext, PassStats};
use crate::error::{ErrorSeverity, Result, SyncError};
use crate::hooks::SyncHooks;
use crate::ignore::IgnoreSet;
use crate::index::SyncIndex;
use crate::mirror::TreeMirror;
use crate::paths::RemotePathMapper;
use crate::strategy::{ChangeDetection, ChangeLogStrategy, CrawlStrategy, StrategyKind};
use bridge_traits::{ChangeToken, FileSystemAccess, RemoteTreeClient};
use core_async::sync::{watch, CancellationToken};
use core_async::time::{sleep, Duration, Instant};
use core_runtime::config::RepositoryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, instrument, warn};

// ============================================================================
// Settings
// ============================================================================

/// The part of a repository's configuration the engine reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub repository_id: String,
    pub local_root: PathBuf,
    pub remote_root: String,
    pub ignore_patterns: Vec<String>,
    pub change_batch_size: u32,
    pub pass_timeout: Option<Duration>,
}

impl From<&RepositoryConfig> for SyncSettings {
    fn from(config: &RepositoryConfig) -> Self {
        Self {
            repository_id: config.id.clone(),
            local_root: config.local_root.clone(),
            remote_root: config.remote_root.clone(),
            ignore_patterns: config.ignore_patterns.clone(),
            change_batch_size: config.change_batch_size,
            pass_timeout: config.pass_timeout,
        }
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Running,
    Cancelling,
    /// The last pass failed fatally
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Running => "running",
            SyncState::Cancelling => "cancelling",
            SyncState::Error => "error",
        }
    }

    /// A pass is active or winding down.
    pub fn is_busy(&self) -> bool {
        matches!(self, SyncState::Running | SyncState::Cancelling)
    }

    pub fn validate_transition(&self, to: SyncState) -> Result<()> {
        let valid = match (self, to) {
            (SyncState::Idle, SyncState::Running) => true,
            (SyncState::Error, SyncState::Running) => true,

            (SyncState::Running, SyncState::Idle) => true,
            (SyncState::Running, SyncState::Error) => true,
            (SyncState::Running, SyncState::Cancelling) => true,

            (SyncState::Cancelling, SyncState::Idle) => true,
            (SyncState::Cancelling, SyncState::Error) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("Cannot transition from {} to {}", self, to),
            });
        }

        Ok(())
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Pass result
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    /// A strategy ran to the end
    Completed,
    /// The remote reported no changes since the stored token
    UpToDate,
    /// Another pass was already active
    Skipped,
    /// Cancellation was observed at a checkpoint
    Cancelled,
    /// A recoverable pass-level failure; reported once, retried next pass
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassResult {
    pub outcome: PassOutcome,
    pub strategy: Option<StrategyKind>,
    pub stats: PassStats,
    /// Token stored when the pass ended
    pub token: Option<ChangeToken>,
    /// Message of the failure behind an `Aborted` outcome
    pub error: Option<String>,
    pub duration: Duration,
}

impl PassResult {
    fn skipped() -> Self {
        Self {
            outcome: PassOutcome::Skipped,
            strategy: None,
            stats: PassStats::default(),
            token: None,
            error: None,
            duration: Duration::ZERO,
        }
    }
}

// ============================================================================
// Decision table
// ============================================================================

/// Why a pass crawls instead of reading the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlReason {
    FullRewrite,
    NoStoredToken,
    ResyncRequired,
    ChangeLogUnsupported,
    TokenRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    UpToDate,
    ChangeLog,
    Crawl(CrawlReason),
}

/// Rows of the decision table that need no remote round-trip.
pub fn crawl_reason(
    full_rewrite: bool,
    stored: Option<&ChangeToken>,
    resync_required: bool,
) -> Option<CrawlReason> {
    match (full_rewrite, stored, resync_required) {
        (true, _, _) => Some(CrawlReason::FullRewrite),
        (false, None, _) => Some(CrawlReason::NoStoredToken),
        (false, Some(_), true) => Some(CrawlReason::ResyncRequired),
        (false, Some(_), false) => None,
    }
}

pub fn decide(
    full_rewrite: bool,
    stored: Option<&ChangeToken>,
    resync_required: bool,
    current: Option<&ChangeToken>,
) -> Decision {
    if let Some(reason) = crawl_reason(full_rewrite, stored, resync_required) {
        return Decision::Crawl(reason);
    }

    match (stored, current) {
        (_, None) => Decision::Crawl(CrawlReason::ChangeLogUnsupported),
        (Some(stored), Some(current)) if stored == current => Decision::UpToDate,
        _ => Decision::ChangeLog,
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

struct Execution {
    strategy: Option<StrategyKind>,
    token: Option<ChangeToken>,
    up_to_date: bool,
}

/// Runs sync passes for one repository.
pub struct SyncOrchestrator {
    settings: SyncSettings,
    remote: Arc<dyn RemoteTreeClient>,
    index: Arc<dyn SyncIndex>,
    change_log: Box<dyn ChangeDetection>,
    crawl: Box<dyn ChangeDetection>,
    hooks: SyncHooks,
    state: watch::Sender<SyncState>,
    active: Mutex<Option<CancellationToken>>,
}

impl SyncOrchestrator {
    pub fn new(
        settings: SyncSettings,
        remote: Arc<dyn RemoteTreeClient>,
        index: Arc<dyn SyncIndex>,
        fs: Arc<dyn FileSystemAccess>,
        hooks: SyncHooks,
    ) -> Self {
        let mirror = Arc::new(TreeMirror::new(
            Arc::clone(&remote),
            Arc::clone(&index),
            fs,
            RemotePathMapper::new(&settings.remote_root, settings.local_root.clone()),
            IgnoreSet::new(&settings.ignore_patterns),
        ));
        let (state, _) = watch::channel(SyncState::Idle);

        Self {
            change_log: Box::new(ChangeLogStrategy::new(
                Arc::clone(&mirror),
                settings.change_batch_size,
            )),
            crawl: Box::new(CrawlStrategy::new(mirror)),
            settings,
            remote,
            index,
            hooks,
            state,
            active: Mutex::new(None),
        }
    }

    pub fn repository_id(&self) -> &str {
        &self.settings.repository_id
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn index(&self) -> &Arc<dyn SyncIndex> {
        &self.index
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Runs exactly one pass.
    ///
    /// Only fatal failures are returned as errors; the orchestrator is then
    /// left in [`SyncState::Error`].
    #[instrument(skip(self), fields(repository_id = %self.settings.repository_id))]
    pub async fn run_pass(&self, full_rewrite: bool) -> Result<PassResult> {
        let started = Instant::now();

        let Some(mut pass) = self.begin_pass()? else {
            info!(state = %self.state(), "Sync skipped, a pass is already active");
            return Ok(PassResult::skipped());
        };

        let ctx = PassContext::new(pass.cancel.clone(), self.hooks.clone());
        let run = self.execute(&ctx, full_rewrite);
        let result = match self.settings.pass_timeout {
            Some(limit) => Self::run_with_deadline(run, &pass.cancel, limit).await,
            None => run.await,
        };

        let mut summary = PassResult {
            outcome: PassOutcome::Completed,
            strategy: None,
            stats: ctx.stats(),
            token: None,
            error: None,
            duration: started.elapsed(),
        };

        match result {
            Ok(execution) => {
                summary.strategy = execution.strategy;
                summary.token = execution.token;
                if execution.up_to_date {
                    summary.outcome = PassOutcome::UpToDate;
                }
                info!(
                    outcome = ?summary.outcome,
                    strategy = ?summary.strategy,
                    downloaded = summary.stats.downloaded,
                    deleted = summary.stats.deleted,
                    errors = summary.stats.errors,
                    duration_ms = summary.duration.as_millis() as u64,
                    "Sync pass finished"
                );
                Ok(summary)
            }
            Err(SyncError::Cancelled) => {
                info!("Sync pass cancelled");
                summary.outcome = PassOutcome::Cancelled;
                summary.token = self.index.change_token().await.ok().flatten();
                Ok(summary)
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Sync pass failed");
                pass.final_state = SyncState::Error;
                Err(e)
            }
            Err(e) => {
                ctx.report("Sync pass aborted", &e);
                summary.outcome = PassOutcome::Aborted;
                summary.stats = ctx.stats();
                summary.error = Some(e.to_string());
                summary.token = self.index.change_token().await.ok().flatten();
                Ok(summary)
            }
        }
    }

    /// Requests cancellation of the active pass and waits until it has
    /// stopped. Returns immediately when no pass is active.
    pub async fn cancel(&self) {
        let token = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(token) = token else {
            return;
        };

        info!(repository_id = %self.settings.repository_id, "Cancelling sync pass");
        self.state.send_if_modified(|state| {
            if *state == SyncState::Running {
                *state = SyncState::Cancelling;
                true
            } else {
                false
            }
        });
        token.cancel();

        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| !state.is_busy()).await;
    }

    /// Forgets the stored change token so the next pass crawls.
    pub async fn reset(&self) -> Result<()> {
        if self.state().is_busy() {
            return Err(SyncError::AlreadyRunning {
                repository_id: self.settings.repository_id.clone(),
            });
        }
        info!(repository_id = %self.settings.repository_id, "Resetting change token");
        self.index.reset_change_token().await
    }

    fn begin_pass(&self) -> Result<Option<ActivePass<'_>>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return Ok(None);
        }

        let current = self.state();
        if current.is_busy() {
            return Ok(None);
        }
        current.validate_transition(SyncState::Running)?;

        let cancel = CancellationToken::new();
        *active = Some(cancel.clone());
        self.state.send_replace(SyncState::Running);

        Ok(Some(ActivePass {
            orchestrator: self,
            cancel,
            final_state: SyncState::Idle,
        }))
    }

    /// Past the deadline the pass is cancelled and allowed to reach its next
    /// checkpoint, so an item already in flight still completes.
    async fn run_with_deadline<F>(
        run: F,
        cancel: &CancellationToken,
        limit: Duration,
    ) -> Result<Execution>
    where
        F: Future<Output = Result<Execution>>,
    {
        let mut run = pin!(run);
        core_async::select! {
            result = &mut run => return result,
            _ = sleep(limit) => {}
        }

        warn!(
            timeout_ms = limit.as_millis() as u64,
            "Sync pass timed out, stopping at next checkpoint"
        );
        cancel.cancel();
        match run.await {
            Err(SyncError::Cancelled) => Err(SyncError::Timeout(limit)),
            other => other,
        }
    }

    async fn execute(&self, ctx: &PassContext, full_rewrite: bool) -> Result<Execution> {
        let stored = self.index.change_token().await?;
        let resync_required = self.index.resync_required().await?;

        let decision = match crawl_reason(full_rewrite, stored.as_ref(), resync_required) {
            Some(reason) => Decision::Crawl(reason),
            None => {
                ctx.checkpoint().await?;
                let current = self.remote.current_token().await?;
                decide(full_rewrite, stored.as_ref(), resync_required, current.as_ref())
            }
        };

        match (decision, stored) {
            (Decision::UpToDate, stored) => {
                info!("Repository is up to date");
                Ok(Execution {
                    strategy: None,
                    token: stored,
                    up_to_date: true,
                })
            }
            (Decision::ChangeLog, Some(stored)) => {
                match self.run_change_log(ctx, stored).await {
                    Err(e) if e.severity() == ErrorSeverity::Fallback => {
                        warn!(error = %e, "Change token rejected, falling back to crawl");
                        self.index.reset_change_token().await?;
                        self.run_crawl(ctx, CrawlReason::TokenRejected).await
                    }
                    other => other,
                }
            }
            (Decision::Crawl(reason), _) => self.run_crawl(ctx, reason).await,
            (Decision::ChangeLog, None) => self.run_crawl(ctx, CrawlReason::NoStoredToken).await,
        }
    }

    async fn run_change_log(&self, ctx: &PassContext, stored: ChangeToken) -> Result<Execution> {
        let mut token = stored;

        loop {
            let errors_before = ctx.errors();
            let outcome = self
                .change_log
                .detect_and_apply(ctx, Some(&token))
                .await?;
            let Some(latest) = outcome.token else {
                break;
            };

            if ctx.errors() > errors_before {
                self.index.set_resync_required(true).await?;
            }

            let advanced = latest != token;
            self.index.set_change_token(&latest).await?;
            token = latest;

            if !outcome.has_more || !advanced {
                break;
            }
        }

        Ok(Execution {
            strategy: Some(StrategyKind::ChangeLog),
            token: Some(token),
            up_to_date: false,
        })
    }

    async fn run_crawl(&self, ctx: &PassContext, reason: CrawlReason) -> Result<Execution> {
        info!(?reason, "Crawling repository");

        let errors_before = ctx.errors();
        let outcome = self.crawl.detect_and_apply(ctx, None).await?;

        match &outcome.token {
            Some(token) => self.index.set_change_token(token).await?,
            None => self.index.reset_change_token().await?,
        }
        self.index
            .set_resync_required(ctx.errors() > errors_before)
            .await?;

        Ok(Execution {
            strategy: Some(StrategyKind::Crawl),
            token: outcome.token,
            up_to_date: false,
        })
    }
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("settings", &self.settings)
            .field("state", &self.state())
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Marks a pass as active; clears the mark and publishes the final state
/// when dropped, however the pass ended.
struct ActivePass<'a> {
    orchestrator: &'a SyncOrchestrator,
    cancel: CancellationToken,
    final_state: SyncState,
}

impl Drop for ActivePass<'_> {
    fn drop(&mut self) {
        self.orchestrator
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.orchestrator.state.send_replace(self.final_state);
    }
}
