//! # Synced Repository
//!
//! One registered repository: its configuration, its orchestrator and the
//! background worker that polls the remote.
//!
//! The orchestrator is rebuilt whenever settings change. The local index is
//! shared across rebuilds so stored tokens survive a restart of the worker.
//!
//! Pass outcomes are published on the [`EventBus`] as [`SyncEvent`]s tagged
//! with the repository id. A fatal (authorization) failure blocks the poll
//! loop until the settings are updated.

use crate::error::Result;
use bridge_traits::{FileSystemAccess, RemoteTreeClient};
use chrono::{DateTime, Utc};
use core_async::sync::CancellationToken;
use core_async::task::JoinHandle;
use core_async::time::{sleep, Duration};
use core_runtime::config::RepositoryConfig;
use core_runtime::events::{CoreEvent, EventBus, RepositoryEvent, SyncEvent};
use core_sync::{
    PassOutcome, PassResult, PassStats, PauseSwitch, SqliteSyncIndex, StrategyKind, SyncHooks,
    SyncIndex, SyncOrchestrator, SyncSettings, SyncState,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::{debug, error, info, warn};

/// Summary of the most recent pass, kept for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastPass {
    pub outcome: PassOutcome,
    pub strategy: Option<StrategyKind>,
    pub stats: PassStats,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// Point-in-time view of a repository for hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryStatus {
    pub id: String,
    pub display_name: String,
    pub state: SyncState,
    pub suspended: bool,
    /// Polling stopped after a fatal failure, usually rejected credentials
    pub authorization_blocked: bool,
    pub last_pass: Option<LastPass>,
}

struct PollWorker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// A repository kept in sync by a background poll loop.
pub struct SyncedRepository {
    config: RwLock<RepositoryConfig>,
    remote: Arc<dyn RemoteTreeClient>,
    fs: Arc<dyn FileSystemAccess>,
    index: Arc<dyn SyncIndex>,
    event_bus: EventBus,
    pause: PauseSwitch,
    orchestrator: RwLock<Arc<SyncOrchestrator>>,
    poller: Mutex<Option<PollWorker>>,
    authorization_blocked: AtomicBool,
    last_pass: Mutex<Option<LastPass>>,
}

impl SyncedRepository {
    /// Open the repository's index on disk and build its orchestrator.
    ///
    /// The poll loop is not started; see [`SyncedRepository::start_polling`].
    pub async fn open(
        config: RepositoryConfig,
        remote: Arc<dyn RemoteTreeClient>,
        fs: Arc<dyn FileSystemAccess>,
        event_bus: EventBus,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let index_path = config.resolved_index_path();
        if let Some(parent) = index_path.parent() {
            fs.create_dir_all(parent).await?;
        }
        let index = SqliteSyncIndex::open(&index_path, &config.local_root).await?;

        Self::with_index(config, remote, fs, Arc::new(index), event_bus)
    }

    /// Build a repository around an already opened index.
    pub fn with_index(
        config: RepositoryConfig,
        remote: Arc<dyn RemoteTreeClient>,
        fs: Arc<dyn FileSystemAccess>,
        index: Arc<dyn SyncIndex>,
        event_bus: EventBus,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let pause = PauseSwitch::new();
        let orchestrator = build_orchestrator(
            &config,
            Arc::clone(&remote),
            Arc::clone(&fs),
            Arc::clone(&index),
            &event_bus,
            &pause,
        );

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            remote,
            fs,
            index,
            event_bus,
            pause,
            orchestrator: RwLock::new(Arc::new(orchestrator)),
            poller: Mutex::new(None),
            authorization_blocked: AtomicBool::new(false),
            last_pass: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> String {
        self.config().id
    }

    pub fn config(&self) -> RepositoryConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        Arc::clone(
            &self
                .orchestrator
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn state(&self) -> SyncState {
        self.orchestrator().state()
    }

    pub fn is_authorization_blocked(&self) -> bool {
        self.authorization_blocked.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RepositoryStatus {
        let config = self.config();
        RepositoryStatus {
            display_name: config.display_name().to_string(),
            id: config.id,
            state: self.state(),
            suspended: self.pause.is_paused(),
            authorization_blocked: self.is_authorization_blocked(),
            last_pass: self
                .last_pass
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Run one pass on the current task and publish its outcome.
    pub async fn sync_now(&self, full_rewrite: bool) -> Result<PassResult> {
        let orchestrator = self.orchestrator();
        let id = orchestrator.repository_id().to_string();

        let state = orchestrator.state();
        if state.is_busy() {
            info!(repository_id = %id, state = %state, "Sync skipped");
            self.emit(SyncEvent::Skipped {
                repository_id: id,
                state: state.to_string(),
            });
            return Ok(skipped_result());
        }

        self.emit(SyncEvent::Started {
            repository_id: id.clone(),
            full_rewrite,
        });

        match orchestrator.run_pass(full_rewrite).await {
            Ok(result) => {
                self.publish(&id, &orchestrator, &result);
                self.remember(&result);
                Ok(result)
            }
            Err(e) => {
                let fatal = e.is_fatal();
                if fatal {
                    self.authorization_blocked.store(true, Ordering::SeqCst);
                    error!(repository_id = %id, error = %e, "Sync failed, polling paused until settings change");
                }
                self.emit(SyncEvent::Failed {
                    repository_id: id,
                    message: e.to_string(),
                    recoverable: !fatal,
                });
                *self.last_pass.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastPass {
                    outcome: PassOutcome::Aborted,
                    strategy: None,
                    stats: PassStats::default(),
                    error: Some(e.to_string()),
                    finished_at: Utc::now(),
                });
                Err(e.into())
            }
        }
    }

    /// Start a pass on a background task.
    ///
    /// Returns `None` without spawning when a pass is running or cancelling.
    pub fn sync_in_background(self: &Arc<Self>, full_rewrite: bool) -> Option<JoinHandle<()>> {
        let state = self.state();
        if state.is_busy() {
            let id = self.id();
            info!(repository_id = %id, state = %state, "Sync skipped");
            self.emit(SyncEvent::Skipped {
                repository_id: id,
                state: state.to_string(),
            });
            return None;
        }

        let repository = Arc::clone(self);
        Some(core_async::spawn(async move {
            if let Err(e) = repository.sync_now(full_rewrite).await {
                warn!(repository_id = %repository.id(), error = %e, "Background sync failed");
            }
        }))
    }

    /// Cancel the running pass. Returns once it has stopped.
    pub async fn cancel_sync(&self) {
        self.orchestrator().cancel().await;
    }

    /// Hold the running pass at its next checkpoint.
    pub fn suspend(&self) {
        info!(repository_id = %self.id(), "Suspending sync");
        self.pause.pause();
    }

    pub fn resume(&self) {
        info!(repository_id = %self.id(), "Resuming sync");
        self.pause.resume();
    }

    /// Apply new poll interval and ignore patterns.
    ///
    /// Stops the worker, cancels any running pass, rebuilds the orchestrator
    /// and restarts with a full background sync. The crawl request is stored
    /// in the index, so it also survives a cancelled or interrupted restart.
    pub async fn update_settings(
        self: &Arc<Self>,
        poll_interval: Duration,
        ignore_patterns: Vec<String>,
    ) -> Result<()> {
        let mut config = self.config();
        config.poll_interval = poll_interval;
        config.ignore_patterns = ignore_patterns;
        config.validate()?;

        let worker = self.take_poller();
        self.cancel_sync().await;
        let was_polling = self.join_poller(worker).await;

        // Whichever task runs the next pass crawls with the new settings.
        self.index.set_resync_required(true).await?;

        let orchestrator = build_orchestrator(
            &config,
            Arc::clone(&self.remote),
            Arc::clone(&self.fs),
            Arc::clone(&self.index),
            &self.event_bus,
            &self.pause,
        );
        *self
            .orchestrator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(orchestrator);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.authorization_blocked.store(false, Ordering::SeqCst);

        info!(
            repository_id = %config.id,
            poll_interval_secs = config.poll_interval.as_secs(),
            ignore_patterns = config.ignore_patterns.len(),
            "Settings updated, restarting sync"
        );
        self.emit_repository(RepositoryEvent::SettingsUpdated {
            repository_id: config.id.clone(),
        });

        if was_polling {
            // The loop's first pass is the full sync.
            self.start_polling();
        } else {
            self.sync_in_background(true);
        }
        Ok(())
    }

    /// Total size in bytes of the local mirror.
    pub async fn size(&self) -> Result<u64> {
        let root = self.config().local_root;
        if !self.fs.exists(&root).await? {
            return Ok(0);
        }
        Ok(self.fs.directory_size(&root).await?)
    }

    /// Spawn the poll loop: one pass right away, then one per poll interval.
    /// Does nothing when the loop is already running.
    pub fn start_polling(self: &Arc<Self>) {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() {
            return;
        }

        let stop = CancellationToken::new();
        let handle = core_async::spawn(poll_loop(Arc::downgrade(self), stop.clone()));
        *poller = Some(PollWorker { stop, handle });
        debug!(repository_id = %self.id(), "Poll loop started");
    }

    /// Stop the poll loop and wait for it to exit. A pass already started
    /// by the loop runs to completion. Returns whether a loop was running.
    pub async fn stop_polling(&self) -> bool {
        let worker = self.take_poller();
        self.join_poller(worker).await
    }

    /// Stop polling and cancel the running pass.
    pub async fn shutdown(&self) {
        let worker = self.take_poller();
        self.pause.resume();
        self.cancel_sync().await;
        self.join_poller(worker).await;
    }

    /// Detach the poll worker and signal it to stop.
    fn take_poller(&self) -> Option<PollWorker> {
        let worker = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = &worker {
            worker.stop.cancel();
        }
        worker
    }

    async fn join_poller(&self, worker: Option<PollWorker>) -> bool {
        let Some(worker) = worker else {
            return false;
        };
        if let Err(e) = worker.handle.await {
            warn!(repository_id = %self.id(), error = %e, "Poll loop ended abnormally");
        }
        true
    }

    fn publish(&self, id: &str, orchestrator: &SyncOrchestrator, result: &PassResult) {
        let stats = &result.stats;
        let event = match result.outcome {
            PassOutcome::Completed => SyncEvent::Completed {
                repository_id: id.to_string(),
                strategy: result
                    .strategy
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                downloaded: stats.downloaded,
                deleted: stats.deleted,
                errors: stats.errors,
                duration_ms: result.duration.as_millis() as u64,
            },
            PassOutcome::UpToDate => SyncEvent::UpToDate {
                repository_id: id.to_string(),
            },
            PassOutcome::Skipped => {
                info!(repository_id = %id, "Sync skipped");
                SyncEvent::Skipped {
                    repository_id: id.to_string(),
                    state: orchestrator.state().to_string(),
                }
            }
            PassOutcome::Cancelled => SyncEvent::Cancelled {
                repository_id: id.to_string(),
                items_processed: stats.downloaded
                    + stats.skipped_unchanged
                    + stats.folders_created
                    + stats.deleted
                    + stats.discarded,
            },
            PassOutcome::Aborted => SyncEvent::Failed {
                repository_id: id.to_string(),
                message: result.error.clone().unwrap_or_default(),
                recoverable: true,
            },
        };
        self.emit(event);
    }

    fn remember(&self, result: &PassResult) {
        if result.outcome == PassOutcome::Skipped {
            return;
        }
        *self.last_pass.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastPass {
            outcome: result.outcome,
            strategy: result.strategy,
            stats: result.stats,
            error: result.error.clone(),
            finished_at: Utc::now(),
        });
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.event_bus.emit(CoreEvent::Sync(event));
    }

    pub(crate) fn emit_repository(&self, event: RepositoryEvent) {
        let _ = self.event_bus.emit(CoreEvent::Repository(event));
    }
}

impl Drop for SyncedRepository {
    fn drop(&mut self) {
        if let Some(worker) = self
            .poller
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            worker.stop.cancel();
        }
    }
}

async fn poll_loop(repository: Weak<SyncedRepository>, stop: CancellationToken) {
    loop {
        if stop.is_cancelled() {
            break;
        }
        let interval = {
            let Some(repository) = repository.upgrade() else {
                break;
            };
            if repository.is_authorization_blocked() {
                debug!(repository_id = %repository.id(), "Polling paused after authorization failure");
            } else if let Err(e) = repository.sync_now(false).await {
                warn!(repository_id = %repository.id(), error = %e, "Scheduled sync failed");
            }
            repository.config().poll_interval
        };

        core_async::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
}

fn skipped_result() -> PassResult {
    PassResult {
        outcome: PassOutcome::Skipped,
        strategy: None,
        stats: PassStats::default(),
        token: None,
        error: None,
        duration: Duration::ZERO,
    }
}

/// Hooks that forward progress and per-item failures onto the event bus.
fn bridge_hooks(repository_id: &str, event_bus: &EventBus, pause: &PauseSwitch) -> SyncHooks {
    let progress_bus = event_bus.clone();
    let progress_id = repository_id.to_string();
    let error_bus = event_bus.clone();
    let error_id = repository_id.to_string();

    SyncHooks::new()
        .with_suspend(Arc::new(pause.clone()))
        .with_progress(move |progress| {
            let _ = progress_bus.emit(CoreEvent::Sync(SyncEvent::Progress {
                repository_id: progress_id.clone(),
                strategy: progress.strategy.as_str().to_string(),
                items_processed: progress.processed,
                total_items: progress.total,
                percent: progress.percent(),
            }));
        })
        .with_recoverable_error(move |message, error| {
            let _ = error_bus.emit(CoreEvent::Sync(SyncEvent::RecoverableError {
                repository_id: error_id.clone(),
                message: format!("{}: {}", message, error),
            }));
        })
}

fn build_orchestrator(
    config: &RepositoryConfig,
    remote: Arc<dyn RemoteTreeClient>,
    fs: Arc<dyn FileSystemAccess>,
    index: Arc<dyn SyncIndex>,
    event_bus: &EventBus,
    pause: &PauseSwitch,
) -> SyncOrchestrator {
    SyncOrchestrator::new(
        SyncSettings::from(config),
        remote,
        index,
        fs,
        bridge_hooks(&config.id, event_bus, pause),
    )
}
