//! Applies one change-log event to the local tree.

use crate::context::PassContext;
use crate::error::{Result, SyncError};
use crate::index::IndexEntry;
use crate::mirror::TreeMirror;
use bridge_traits::{ChangeEvent, ChangeKind, RemoteError, RemoteObject};
use std::sync::Arc;
use tracing::{debug, info};

/// What an event turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A document or folder was brought up to date
    Applied,
    /// Local content and index entries were removed
    Removed,
    /// The object lies outside the monitored root
    OutOfScope,
    /// The object lies under an ignored path
    Ignored,
    /// Nothing to do: a security change, or a deletion of something never mirrored
    NoOp,
}

/// Resolves change events and applies them through a [`TreeMirror`].
pub struct ChangeDispatcher {
    mirror: Arc<TreeMirror>,
}

impl ChangeDispatcher {
    pub fn new(mirror: Arc<TreeMirror>) -> Self {
        Self { mirror }
    }

    pub async fn dispatch(&self, ctx: &PassContext, event: &ChangeEvent) -> Result<DispatchOutcome> {
        match event.kind {
            ChangeKind::SecurityChanged => {
                info!(
                    remote_id = %event.remote_id,
                    "Security change not replicated"
                );
                return Ok(DispatchOutcome::NoOp);
            }
            ChangeKind::Deleted => return self.apply_deletion(ctx, event).await,
            ChangeKind::Created | ChangeKind::Updated => {}
        }

        let object = match self.mirror.remote().resolve(&event.remote_id).await {
            Ok(object) => object,
            Err(RemoteError::NotFound(_)) => RemoteObject::Missing,
            Err(e) => return Err(e.into()),
        };

        match object {
            RemoteObject::Missing => {
                debug!(remote_id = %event.remote_id, "Object gone, treating as deletion");
                self.apply_deletion(ctx, event).await
            }
            RemoteObject::Document(doc) => {
                let relative = match self.scope(ctx, &doc.id, &doc.path).await? {
                    Scope::Inside(relative) => relative,
                    Scope::Outside(outcome) => return Ok(outcome),
                };
                if relative.is_empty() {
                    return Err(SyncError::RemoteRootMissing(
                        self.mirror.paths().remote_root().to_string(),
                    ));
                }

                let previous = self.relocated_from(&doc.id, &relative).await?;
                self.mirror.ensure_parents(ctx, &relative).await?;
                self.mirror.sync_document(ctx, &doc, &relative).await?;
                self.remove_previous(ctx, previous).await?;
                Ok(DispatchOutcome::Applied)
            }
            RemoteObject::Folder(folder) => {
                let relative = match self.scope(ctx, &folder.id, &folder.path).await? {
                    Scope::Inside(relative) => relative,
                    Scope::Outside(outcome) => return Ok(outcome),
                };

                let previous = self.relocated_from(&folder.id, &relative).await?;
                self.mirror.ensure_parents(ctx, &relative).await?;
                self.mirror.mirror_subtree(ctx, &folder, &relative).await?;
                self.remove_previous(ctx, previous).await?;
                Ok(DispatchOutcome::Applied)
            }
        }
    }

    async fn apply_deletion(&self, ctx: &PassContext, event: &ChangeEvent) -> Result<DispatchOutcome> {
        if let Some(entry) = self.mirror.index().find_by_remote_id(&event.remote_id).await? {
            info!(path = %entry.path, "Removing item deleted remotely");
            self.mirror.remove_entry(ctx, &entry).await?;
            return Ok(DispatchOutcome::Removed);
        }

        let deleted_root = event
            .remote_path
            .as_deref()
            .and_then(|path| self.mirror.paths().to_relative(path))
            .is_some_and(|relative| relative.is_empty());
        if deleted_root {
            return Err(SyncError::RemoteRootMissing(
                self.mirror.paths().remote_root().to_string(),
            ));
        }

        debug!(remote_id = %event.remote_id, "Deleted object was never mirrored");
        Ok(DispatchOutcome::NoOp)
    }

    /// Maps a resolved remote path to an index path, discarding objects
    /// outside the monitored root or under an ignored path. An object that
    /// was mirrored before and has moved out of reach is removed locally.
    async fn scope(&self, ctx: &PassContext, remote_id: &str, remote_path: &str) -> Result<Scope> {
        let outcome = match self.mirror.paths().to_relative(remote_path) {
            None => {
                info!(path = %remote_path, "Change outside monitored root discarded");
                DispatchOutcome::OutOfScope
            }
            Some(relative) if self.mirror.ignore().is_ignored(&relative) => {
                info!(path = %relative, "Change under ignored path discarded");
                DispatchOutcome::Ignored
            }
            Some(relative) => return Ok(Scope::Inside(relative)),
        };

        if let Some(entry) = self.mirror.index().find_by_remote_id(remote_id).await? {
            info!(path = %entry.path, "Mirrored item is now out of reach, removing");
            self.mirror.remove_entry(ctx, &entry).await?;
            return Ok(Scope::Outside(DispatchOutcome::Removed));
        }

        ctx.discarded();
        Ok(Scope::Outside(outcome))
    }

    async fn relocated_from(&self, remote_id: &str, relative: &str) -> Result<Option<IndexEntry>> {
        Ok(self
            .mirror
            .index()
            .find_by_remote_id(remote_id)
            .await?
            .filter(|entry| entry.path != relative))
    }

    async fn remove_previous(&self, ctx: &PassContext, previous: Option<IndexEntry>) -> Result<()> {
        let Some(previous) = previous else {
            return Ok(());
        };

        // A case-only rename has already removed the old entry.
        let still_indexed = self
            .mirror
            .index()
            .get(&previous.path)
            .await?
            .is_some_and(|entry| entry.remote_id == previous.remote_id);
        if still_indexed {
            info!(path = %previous.path, "Removing previous location of moved item");
            self.mirror.remove_entry(ctx, &previous).await?;
        }
        Ok(())
    }
}

enum Scope {
    Inside(String),
    Outside(DispatchOutcome),
}
