//! Host-supplied control and observability hooks.

use crate::error::SyncError;
use crate::strategy::StrategyKind;
use async_trait::async_trait;
use core_async::sync::watch;
use std::fmt;
use std::sync::Arc;

/// Asked at every checkpoint whether the worker may continue.
#[async_trait]
pub trait SuspendCheck: Send + Sync {
    /// Returns once the host no longer wants the worker paused.
    async fn wait_until_resumed(&self);
}

/// [`SuspendCheck`] toggled by the host.
///
/// Clones share one switch.
#[derive(Debug, Clone)]
pub struct PauseSwitch {
    paused: Arc<watch::Sender<bool>>,
}

impl PauseSwitch {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }
}

impl Default for PauseSwitch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SuspendCheck for PauseSwitch {
    async fn wait_until_resumed(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

/// Progress snapshot emitted at checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassProgress {
    pub strategy: StrategyKind,
    pub processed: u64,
    /// Known only while applying a change batch
    pub total: Option<u64>,
}

impl PassProgress {
    pub fn percent(&self) -> Option<u8> {
        match self.total {
            Some(0) => Some(100),
            Some(total) => Some((self.processed.min(total) * 100 / total) as u8),
            None => None,
        }
    }
}

pub type RecoverableErrorHook = Arc<dyn Fn(&str, &SyncError) + Send + Sync>;
pub type ProgressHook = Arc<dyn Fn(&PassProgress) + Send + Sync>;

/// Callbacks injected into an orchestrator at construction.
#[derive(Clone, Default)]
pub struct SyncHooks {
    pub(crate) suspend: Option<Arc<dyn SuspendCheck>>,
    pub(crate) on_recoverable_error: Option<RecoverableErrorHook>,
    pub(crate) on_progress: Option<ProgressHook>,
}

impl SyncHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suspend(mut self, suspend: Arc<dyn SuspendCheck>) -> Self {
        self.suspend = Some(suspend);
        self
    }

    pub fn with_recoverable_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &SyncError) + Send + Sync + 'static,
    {
        self.on_recoverable_error = Some(Arc::new(hook));
        self
    }

    pub fn with_progress<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PassProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(hook));
        self
    }

    pub(crate) fn recoverable_error(&self, message: &str, error: &SyncError) {
        if let Some(hook) = &self.on_recoverable_error {
            hook(message, error);
        }
    }

    pub(crate) fn progress(&self, progress: &PassProgress) {
        if let Some(hook) = &self.on_progress {
            hook(progress);
        }
    }
}

impl fmt::Debug for SyncHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHooks")
            .field("suspend", &self.suspend.is_some())
            .field("on_recoverable_error", &self.on_recoverable_error.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}
