//! # Change Detection Strategies
//!
//! Two interchangeable ways to bring the mirror up to date:
//!
//! - [`ChangeLogStrategy`] applies one bounded batch of the remote change
//!   log since the stored token.
//! - [`CrawlStrategy`] walks the whole remote tree and reconciles it
//!   against the index.
//!
//! Strategies hold no state between passes. Choosing between them is the
//! orchestrator's job.

use crate::context::PassContext;
use crate::dispatcher::ChangeDispatcher;
use crate::error::{Result, SyncError};
use crate::mirror::TreeMirror;
use async_trait::async_trait;
use bridge_traits::{ChangeToken, RemoteError, RemoteObject};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ChangeLog,
    Crawl,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ChangeLog => "change_log",
            StrategyKind::Crawl => "crawl",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a strategy run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionOutcome {
    /// Token to persist once the run is accepted; `None` when the remote
    /// has no change log
    pub token: Option<ChangeToken>,
    /// More change-log events are waiting after `token`
    pub has_more: bool,
}

#[async_trait]
pub trait ChangeDetection: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Detects and applies remote changes since `last_token`.
    ///
    /// Per-item failures are reported through `ctx` and do not fail the
    /// run. Errors returned here are pass-level.
    async fn detect_and_apply(
        &self,
        ctx: &PassContext,
        last_token: Option<&ChangeToken>,
    ) -> Result<DetectionOutcome>;
}

/// Applies one change-log batch, in the order the remote reported it.
pub struct ChangeLogStrategy {
    mirror: Arc<TreeMirror>,
    dispatcher: ChangeDispatcher,
    batch_size: u32,
}

impl ChangeLogStrategy {
    pub fn new(mirror: Arc<TreeMirror>, batch_size: u32) -> Self {
        Self {
            dispatcher: ChangeDispatcher::new(Arc::clone(&mirror)),
            mirror,
            batch_size,
        }
    }
}

#[async_trait]
impl ChangeDetection for ChangeLogStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ChangeLog
    }

    #[instrument(skip(self, ctx, last_token), fields(since = ?last_token.map(ChangeToken::as_str)))]
    async fn detect_and_apply(
        &self,
        ctx: &PassContext,
        last_token: Option<&ChangeToken>,
    ) -> Result<DetectionOutcome> {
        let Some(since) = last_token else {
            return Err(RemoteError::InvalidToken("no stored change token".to_string()).into());
        };

        ctx.checkpoint().await?;
        let batch = self
            .mirror
            .remote()
            .get_changes(since, self.batch_size)
            .await?;

        info!(
            events = batch.events.len(),
            latest = %batch.latest_token,
            has_more = batch.has_more,
            "Fetched change batch"
        );
        ctx.begin(StrategyKind::ChangeLog, Some(batch.events.len() as u64));

        for event in &batch.events {
            ctx.checkpoint().await?;

            match self.dispatcher.dispatch(ctx, event).await {
                Ok(outcome) => {
                    debug!(
                        kind = %event.kind,
                        remote_id = %event.remote_id,
                        ?outcome,
                        "Applied change"
                    );
                }
                Err(e) if e.is_fatal() || e.is_cancelled() => return Err(e),
                Err(e @ SyncError::RemoteRootMissing(_)) => return Err(e),
                Err(e) => {
                    let message = format!("Failed to apply {} of {}", event.kind, event.remote_id);
                    ctx.report(&message, &e);
                }
            }

            ctx.event_applied();
            ctx.item_processed();
        }

        Ok(DetectionOutcome {
            token: Some(batch.latest_token),
            has_more: batch.has_more,
        })
    }
}

/// Full reconciliation of the monitored root.
pub struct CrawlStrategy {
    mirror: Arc<TreeMirror>,
}

impl CrawlStrategy {
    pub fn new(mirror: Arc<TreeMirror>) -> Self {
        Self { mirror }
    }
}

#[async_trait]
impl ChangeDetection for CrawlStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Crawl
    }

    #[instrument(skip(self, ctx, _last_token))]
    async fn detect_and_apply(
        &self,
        ctx: &PassContext,
        _last_token: Option<&ChangeToken>,
    ) -> Result<DetectionOutcome> {
        ctx.begin(StrategyKind::Crawl, None);

        // Read before crawling: changes made during the walk are replayed
        // by the next change-log pass instead of being lost.
        ctx.checkpoint().await?;
        let token = self.mirror.remote().current_token().await?;

        ctx.checkpoint().await?;
        let root_path = self.mirror.paths().remote_root().to_string();
        let root = match self.mirror.remote().resolve_path(&root_path).await {
            Ok(RemoteObject::Folder(folder)) => folder,
            Ok(_) | Err(RemoteError::NotFound(_)) => {
                return Err(SyncError::RemoteRootMissing(root_path))
            }
            Err(e) => return Err(e.into()),
        };

        info!(root = %root_path, "Crawling remote tree");
        self.mirror.mirror_subtree(ctx, &root, "").await?;

        Ok(DetectionOutcome {
            token,
            has_more: false,
        })
    }
}
