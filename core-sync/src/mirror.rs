//! # Tree Mirror
//!
//! Primitives that make the local tree match remote nodes, plus the
//! recursive subtree walk used by both bootstrap and crawl.
//!
//! Local content is always written before the index entry that describes
//! it and removed before that entry is dropped, so an interrupted pass
//! never leaves the index pointing at a missing local path.

use crate::context::PassContext;
use crate::error::{Result, SyncError};
use crate::hash::{verify_content, ContentCheck};
use crate::ignore::IgnoreSet;
use crate::index::{IndexEntry, SyncIndex};
use crate::paths::{is_same_or_descendant, join, name_of, parent_of, RemotePathMapper};
use bridge_traits::{
    BridgeError, FileSystemAccess, RemoteDocument, RemoteFolder, RemoteNode, RemoteObject,
    RemoteTreeClient,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Applies remote nodes to the local tree and the sync index.
pub struct TreeMirror {
    remote: Arc<dyn RemoteTreeClient>,
    index: Arc<dyn SyncIndex>,
    fs: Arc<dyn FileSystemAccess>,
    paths: RemotePathMapper,
    ignore: IgnoreSet,
}

impl TreeMirror {
    pub fn new(
        remote: Arc<dyn RemoteTreeClient>,
        index: Arc<dyn SyncIndex>,
        fs: Arc<dyn FileSystemAccess>,
        paths: RemotePathMapper,
        ignore: IgnoreSet,
    ) -> Self {
        Self {
            remote,
            index,
            fs,
            paths,
            ignore,
        }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteTreeClient> {
        &self.remote
    }

    pub fn index(&self) -> &Arc<dyn SyncIndex> {
        &self.index
    }

    pub fn paths(&self) -> &RemotePathMapper {
        &self.paths
    }

    pub fn ignore(&self) -> &IgnoreSet {
        &self.ignore
    }

    /// Brings one document up to date, downloading only when the indexed
    /// hash differs or the local file has gone missing.
    pub async fn sync_document(
        &self,
        ctx: &PassContext,
        doc: &RemoteDocument,
        relative: &str,
    ) -> Result<()> {
        let local = self.paths.to_local(relative)?;
        let existing = self.index.get(relative).await?;

        if let Some(entry) = &existing {
            if entry.is_folder {
                debug!(path = %relative, "Folder replaced by document");
                self.remove_entry(ctx, entry).await?;
            } else if hash_matches(entry, doc) && self.local_exists(&local).await? {
                if entry.remote_id != doc.id {
                    self.index
                        .upsert(&IndexEntry::document(
                            relative,
                            &doc.id,
                            Some(doc.content_hash.clone()),
                        ))
                        .await?;
                }
                debug!(path = %relative, "Content unchanged, skipping download");
                ctx.skipped_unchanged();
                return Ok(());
            }
        } else {
            self.resolve_case_collision(ctx, relative, &local, &doc.id)
                .await?;
        }

        ctx.checkpoint().await?;
        let data = self.remote.download_content(&doc.id).await?;

        if let ContentCheck::Mismatch { actual } = verify_content(&doc.content_hash, &data) {
            return Err(SyncError::DataInconsistency {
                path: relative.to_string(),
                message: format!(
                    "downloaded content hashes to {}, expected {}",
                    actual, doc.content_hash
                ),
            });
        }

        let size = data.len();
        self.fs
            .replace_file_atomic(&local, data)
            .await
            .map_err(|e| SyncError::local_io(&local, e))?;

        self.index
            .upsert(&IndexEntry::document(
                relative,
                &doc.id,
                Some(doc.content_hash.clone()),
            ))
            .await?;

        debug!(path = %relative, size, "Downloaded document");
        ctx.downloaded();
        Ok(())
    }

    /// Makes sure the local directory for `folder` exists and is indexed.
    /// The monitored root itself is created but never indexed.
    pub async fn ensure_folder(
        &self,
        ctx: &PassContext,
        folder: &RemoteFolder,
        relative: &str,
    ) -> Result<()> {
        let local = self.paths.to_local(relative)?;

        if relative.is_empty() {
            return self
                .fs
                .create_dir_all(&local)
                .await
                .map_err(|e| SyncError::local_io(&local, e));
        }

        let existing = self.index.get(relative).await?;
        match &existing {
            Some(entry) if !entry.is_folder => {
                debug!(path = %relative, "Document replaced by folder");
                self.remove_entry(ctx, entry).await?;
            }
            Some(_) => {}
            None => {
                self.resolve_case_collision(ctx, relative, &local, &folder.id)
                    .await?
            }
        }

        if !self.local_exists(&local).await? {
            self.fs
                .create_dir_all(&local)
                .await
                .map_err(|e| SyncError::local_io(&local, e))?;
            ctx.folder_created();
        }

        let up_to_date = matches!(
            &existing,
            Some(entry) if entry.is_folder && entry.remote_id == folder.id
        );
        if !up_to_date {
            self.index
                .upsert(&IndexEntry::folder(relative, &folder.id))
                .await?;
        }

        Ok(())
    }

    /// Creates and indexes any ancestor folders of `relative` that are not
    /// yet mirrored, resolving each by remote path.
    pub async fn ensure_parents(&self, ctx: &PassContext, relative: &str) -> Result<()> {
        let mut missing = Vec::new();
        let mut parent = parent_of(relative);

        while !parent.is_empty() {
            if self.index.get(parent).await?.is_some() {
                break;
            }
            missing.push(parent);
            parent = parent_of(parent);
        }

        for ancestor in missing.into_iter().rev() {
            ctx.checkpoint().await?;
            let remote_path = self.paths.to_remote(ancestor);
            match self.remote.resolve_path(&remote_path).await? {
                RemoteObject::Folder(folder) => self.ensure_folder(ctx, &folder, ancestor).await?,
                _ => {
                    return Err(SyncError::DataInconsistency {
                        path: relative.to_string(),
                        message: format!("parent folder {} is missing remotely", remote_path),
                    })
                }
            }
        }

        Ok(())
    }

    /// Reproduces the remote subtree under `folder` at `relative`, then
    /// removes whatever the index holds beneath it that the walk did not
    /// visit.
    ///
    /// Per-item failures are reported and protect the affected subtree from
    /// removal. Fatal errors and cancellation return immediately without
    /// removing anything.
    pub async fn mirror_subtree(
        &self,
        ctx: &PassContext,
        folder: &RemoteFolder,
        relative: &str,
    ) -> Result<()> {
        self.ensure_folder(ctx, folder, relative).await?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut protected: Vec<String> = Vec::new();
        let mut stack = vec![(folder.id.clone(), relative.to_string())];

        while let Some((folder_id, folder_rel)) = stack.pop() {
            ctx.checkpoint().await?;

            let children = match self.remote.list_children(&folder_id).await {
                Ok(children) => children,
                Err(e) => {
                    let err = SyncError::from(e);
                    if err.is_fatal() {
                        return Err(err);
                    }
                    ctx.report(&format!("Failed to list folder '{}'", folder_rel), &err);
                    protected.push(folder_rel);
                    continue;
                }
            };

            let mut names: HashMap<String, String> = HashMap::new();

            for child in children {
                let child_rel = join(&folder_rel, child.name());

                if self.ignore.is_ignored(&child_rel) {
                    debug!(path = %child_rel, "Ignored");
                    ctx.discarded();
                    continue;
                }

                if let Some(existing) =
                    names.insert(child.name().to_lowercase(), child.name().to_string())
                {
                    let err = SyncError::NameConflict {
                        path: child_rel.clone(),
                        existing: join(&folder_rel, &existing),
                    };
                    ctx.report("Remote names differ only by case", &err);
                    protected.push(child_rel);
                    continue;
                }

                visited.insert(child_rel.clone());

                let result = match &child {
                    RemoteNode::Document(doc) => self.sync_document(ctx, doc, &child_rel).await,
                    RemoteNode::Folder(sub) => {
                        let result = self.ensure_folder(ctx, sub, &child_rel).await;
                        if result.is_ok() {
                            stack.push((sub.id.clone(), child_rel.clone()));
                        }
                        result
                    }
                };
                ctx.item_processed();

                match result {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() || e.is_cancelled() => return Err(e),
                    Err(e) => {
                        ctx.report(&format!("Failed to synchronize '{}'", child_rel), &e);
                        protected.push(child_rel);
                    }
                }
            }
        }

        self.prune_unvisited(ctx, relative, &visited, &protected)
            .await
    }

    async fn prune_unvisited(
        &self,
        ctx: &PassContext,
        relative: &str,
        visited: &HashSet<String>,
        protected: &[String],
    ) -> Result<()> {
        let mut removed: Vec<String> = Vec::new();

        for entry in self.index.list_subtree(relative).await? {
            if entry.path == relative || visited.contains(&entry.path) {
                continue;
            }
            if protected
                .iter()
                .chain(removed.iter())
                .any(|p| is_same_or_descendant(&entry.path, p))
            {
                continue;
            }

            if self.ignore.is_ignored(&entry.path) {
                self.forget_ignored(&entry).await?;
                removed.push(entry.path);
                continue;
            }

            info!(path = %entry.path, "Removing item deleted remotely");
            match self.remove_entry(ctx, &entry).await {
                Ok(()) => removed.push(entry.path),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => ctx.report(&format!("Failed to remove '{}'", entry.path), &e),
            }
        }

        Ok(())
    }

    /// Removes a mirrored file or folder locally, then from the index.
    /// A local path that is already gone is not an error. Entries under an
    /// ignored path are only dropped from the index.
    pub async fn remove_entry(&self, ctx: &PassContext, entry: &IndexEntry) -> Result<()> {
        if self.ignore.is_ignored(&entry.path) {
            return self.forget_ignored(entry).await;
        }

        let local = self.paths.to_local(&entry.path)?;

        if entry.is_folder {
            if self.ignore.contains_ignored_descendant(&entry.path) {
                self.remove_folder_keeping_ignored(&entry.path).await?;
            } else {
                tolerate_missing(self.fs.delete_dir_all(&local).await)
                    .map_err(|e| SyncError::local_io(&local, e))?;
            }
        } else {
            tolerate_missing(self.fs.delete_file(&local).await)
                .map_err(|e| SyncError::local_io(&local, e))?;
        }

        let removed = self.index.remove_subtree(&entry.path).await?;
        ctx.deleted(removed);
        Ok(())
    }

    async fn forget_ignored(&self, entry: &IndexEntry) -> Result<()> {
        debug!(path = %entry.path, "Dropping index entry for ignored path");
        self.index.remove_subtree(&entry.path).await?;
        Ok(())
    }

    /// Deletes the indexed content of a folder that also holds ignored
    /// local content. Directories that are not empty afterwards are kept.
    async fn remove_folder_keeping_ignored(&self, relative: &str) -> Result<()> {
        let entries = self.index.list_subtree(relative).await?;

        for entry in entries.iter().filter(|e| !e.is_folder) {
            let local = self.paths.to_local(&entry.path)?;
            tolerate_missing(self.fs.delete_file(&local).await)
                .map_err(|e| SyncError::local_io(&local, e))?;
        }

        // Deepest first, so children go before their parents.
        for entry in entries.iter().filter(|e| e.is_folder).rev() {
            let local = self.paths.to_local(&entry.path)?;
            if let Err(e) = self.fs.delete_dir(&local).await {
                if !e.is_not_found() {
                    debug!(path = %entry.path, error = %e, "Keeping folder with ignored content");
                }
            }
        }

        Ok(())
    }

    /// Detects a local sibling whose name differs from `relative` only by
    /// case. A sibling that is the same remote object (a case-only rename)
    /// is removed; anything else is a conflict.
    async fn resolve_case_collision(
        &self,
        ctx: &PassContext,
        relative: &str,
        local: &Path,
        remote_id: &str,
    ) -> Result<()> {
        let Some(parent) = local.parent() else {
            return Ok(());
        };

        let siblings = match self.fs.list_directory(parent).await {
            Ok(siblings) => siblings,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(SyncError::local_io(parent, e)),
        };

        let name = name_of(relative);
        let lowered = name.to_lowercase();

        for sibling in siblings {
            let Some(existing) = sibling.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if existing == name || existing.to_lowercase() != lowered {
                continue;
            }

            let existing_rel = join(parent_of(relative), existing);
            match self.index.get(&existing_rel).await? {
                Some(entry) if entry.remote_id == remote_id => {
                    info!(from = %existing_rel, to = %relative, "Case-only rename");
                    self.remove_entry(ctx, &entry).await?;
                }
                _ => {
                    return Err(SyncError::NameConflict {
                        path: relative.to_string(),
                        existing: existing_rel,
                    })
                }
            }
        }

        Ok(())
    }

    async fn local_exists(&self, local: &Path) -> Result<bool> {
        self.fs
            .exists(local)
            .await
            .map_err(|e| SyncError::local_io(local, e))
    }
}

fn hash_matches(entry: &IndexEntry, doc: &RemoteDocument) -> bool {
    !doc.content_hash.is_empty() && entry.content_hash.as_deref() == Some(doc.content_hash.as_str())
}

fn tolerate_missing(
    result: std::result::Result<(), BridgeError>,
) -> std::result::Result<(), BridgeError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
