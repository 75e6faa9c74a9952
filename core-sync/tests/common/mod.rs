//! Shared fixtures: an in-memory remote repository with a change log, and a
//! harness wiring it to a temp-dir mirror.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::{
    ChangeBatch, ChangeEvent, ChangeKind, ChangeToken, RemoteDocument, RemoteError, RemoteFolder,
    RemoteNode, RemoteObject, RemoteResult, RemoteTreeClient,
};
use bytes::Bytes;
use core_async::sync::Mutex as AsyncMutex;
use core_sync::{
    sha256_content_hash, SqliteSyncIndex, SyncHooks, SyncIndex, SyncOrchestrator, SyncSettings,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// In-memory remote
// ============================================================================

#[derive(Debug, Clone)]
struct Node {
    id: String,
    path: String,
    is_folder: bool,
    content: Bytes,
    content_hash: String,
}

impl Node {
    fn to_remote(&self) -> RemoteNode {
        if self.is_folder {
            RemoteNode::Folder(RemoteFolder {
                id: self.id.clone(),
                path: self.path.clone(),
            })
        } else {
            RemoteNode::Document(RemoteDocument {
                id: self.id.clone(),
                path: self.path.clone(),
                content_hash: self.content_hash.clone(),
                size: Some(self.content.len() as u64),
            })
        }
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    nodes: BTreeMap<String, Node>,
    log: Vec<(u64, ChangeEvent)>,
    seq: u64,
    oldest_valid: u64,
    changes_unsupported: bool,
    next_id: u64,
    fail_next_changes: Option<RemoteError>,
    download_failures: HashMap<String, RemoteError>,
}

impl RemoteState {
    fn find_by_path(&self, path: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.path == path)
    }

    fn log(&mut self, kind: ChangeKind, id: &str, path: &str) {
        self.seq += 1;
        let event = ChangeEvent::new(kind, id).with_path(path);
        self.log.push((self.seq, event));
    }

    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

fn parent_path(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => "/",
    }
}

fn is_under(path: &str, ancestor: &str) -> bool {
    ancestor == "/" || path == ancestor || path.starts_with(&format!("{}/", ancestor))
}

/// Remote repository held in memory. Tokens are `T<sequence>`.
pub struct InMemoryRemote {
    state: AsyncMutex<RemoteState>,
    downloads: AtomicU64,
}

impl InMemoryRemote {
    pub fn new() -> Arc<Self> {
        let mut state = RemoteState::default();
        state.nodes.insert(
            "root".to_string(),
            Node {
                id: "root".to_string(),
                path: "/".to_string(),
                is_folder: true,
                content: Bytes::new(),
                content_hash: String::new(),
            },
        );

        Arc::new(Self {
            state: AsyncMutex::new(state),
            downloads: AtomicU64::new(0),
        })
    }

    pub async fn add_folder(&self, path: &str) -> String {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.find_by_path(path) {
            return existing.id.clone();
        }
        let id = state.allocate_id("folder");
        state.nodes.insert(
            id.clone(),
            Node {
                id: id.clone(),
                path: path.to_string(),
                is_folder: true,
                content: Bytes::new(),
                content_hash: String::new(),
            },
        );
        state.log(ChangeKind::Created, &id, path);
        id
    }

    /// Creates or updates a document, creating missing parent folders.
    pub async fn put_document(&self, path: &str, content: &str) -> String {
        let parent = parent_path(path);
        if parent != "/" {
            let mut ancestors = Vec::new();
            let mut current = parent;
            while current != "/" {
                ancestors.push(current.to_string());
                current = parent_path(current);
            }
            for ancestor in ancestors.into_iter().rev() {
                self.add_folder(&ancestor).await;
            }
        }

        let mut state = self.state.lock().await;
        let content = Bytes::from(content.to_string());
        let content_hash = sha256_content_hash(&content);

        let existing = state.find_by_path(path).map(|n| n.id.clone());
        match existing {
            Some(id) => {
                if let Some(node) = state.nodes.get_mut(&id) {
                    node.content = content;
                    node.content_hash = content_hash;
                }
                state.log(ChangeKind::Updated, &id, path);
                id
            }
            None => {
                let id = state.allocate_id("doc");
                state.nodes.insert(
                    id.clone(),
                    Node {
                        id: id.clone(),
                        path: path.to_string(),
                        is_folder: false,
                        content,
                        content_hash,
                    },
                );
                state.log(ChangeKind::Created, &id, path);
                id
            }
        }
    }

    /// Deletes a node and everything beneath it, logging one event per node.
    pub async fn delete(&self, path: &str) {
        let mut state = self.state.lock().await;
        let mut doomed: Vec<(String, String)> = state
            .nodes
            .values()
            .filter(|n| is_under(&n.path, path) && n.path != "/")
            .map(|n| (n.id.clone(), n.path.clone()))
            .collect();
        // Children first, the way servers report cascading deletes.
        doomed.sort_by(|a, b| b.1.cmp(&a.1));

        for (id, node_path) in doomed {
            state.nodes.remove(&id);
            state.log(ChangeKind::Deleted, &id, &node_path);
        }
    }

    /// Moves a node (and its subtree) to a new path, logging one update.
    pub async fn move_node(&self, from: &str, to: &str) {
        let mut state = self.state.lock().await;
        let Some(id) = state.find_by_path(from).map(|n| n.id.clone()) else {
            return;
        };

        for node in state.nodes.values_mut() {
            if is_under(&node.path, from) {
                node.path = format!("{}{}", to, &node.path[from.len()..]);
            }
        }
        state.log(ChangeKind::Updated, &id, to);
    }

    pub async fn change_security(&self, path: &str) {
        let mut state = self.state.lock().await;
        if let Some(id) = state.find_by_path(path).map(|n| n.id.clone()) {
            state.log(ChangeKind::SecurityChanged, &id, path);
        }
    }

    /// Advertises a hash that the content does not match.
    pub async fn corrupt_hash(&self, path: &str) {
        let mut state = self.state.lock().await;
        if let Some(id) = state.find_by_path(path).map(|n| n.id.clone()) {
            if let Some(node) = state.nodes.get_mut(&id) {
                node.content_hash = sha256_content_hash(b"something else");
            }
        }
    }

    /// Forgets the change history; every earlier token becomes invalid.
    pub async fn truncate_log(&self) {
        let mut state = self.state.lock().await;
        state.oldest_valid = state.seq;
        state.log.clear();
    }

    pub async fn set_changes_supported(&self, supported: bool) {
        self.state.lock().await.changes_unsupported = !supported;
    }

    pub async fn fail_next_changes(&self, error: RemoteError) {
        self.state.lock().await.fail_next_changes = Some(error);
    }

    pub async fn fail_download(&self, path: &str, error: RemoteError) {
        self.state
            .lock()
            .await
            .download_failures
            .insert(path.to_string(), error);
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.fail_next_changes = None;
        state.download_failures.clear();
    }

    pub async fn token(&self) -> ChangeToken {
        ChangeToken::new(format!("T{}", self.state.lock().await.seq))
    }

    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::SeqCst)
    }

    pub async fn id_of(&self, path: &str) -> Option<String> {
        self.state.lock().await.find_by_path(path).map(|n| n.id.clone())
    }

    /// Contents under `root`, keyed by root-relative path; folders map to
    /// `None`.
    pub async fn tree_under(&self, root: &str) -> BTreeMap<String, Option<Vec<u8>>> {
        let state = self.state.lock().await;
        state
            .nodes
            .values()
            .filter(|n| is_under(&n.path, root) && n.path != root)
            .map(|n| {
                let relative = if root == "/" {
                    n.path.trim_start_matches('/').to_string()
                } else {
                    n.path[root.len() + 1..].to_string()
                };
                let content = (!n.is_folder).then(|| n.content.to_vec());
                (relative, content)
            })
            .collect()
    }
}

fn parse_token(token: &ChangeToken) -> Option<u64> {
    token.as_str().strip_prefix('T')?.parse().ok()
}

#[async_trait]
impl RemoteTreeClient for InMemoryRemote {
    async fn current_token(&self) -> RemoteResult<Option<ChangeToken>> {
        let state = self.state.lock().await;
        if state.changes_unsupported {
            return Ok(None);
        }
        Ok(Some(ChangeToken::new(format!("T{}", state.seq))))
    }

    async fn get_changes(&self, since: &ChangeToken, max_items: u32) -> RemoteResult<ChangeBatch> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.fail_next_changes.take() {
            return Err(error);
        }
        if state.changes_unsupported {
            return Err(RemoteError::NotSupported("change log".to_string()));
        }

        let since_seq = parse_token(since)
            .filter(|seq| *seq >= state.oldest_valid && *seq <= state.seq)
            .ok_or_else(|| RemoteError::InvalidToken(since.to_string()))?;

        let pending: Vec<&(u64, ChangeEvent)> =
            state.log.iter().filter(|(seq, _)| *seq > since_seq).collect();
        let taken: Vec<&(u64, ChangeEvent)> =
            pending.iter().take(max_items as usize).copied().collect();
        let latest = taken.last().map_or(since_seq, |(seq, _)| *seq);

        Ok(ChangeBatch {
            events: taken.iter().map(|(_, event)| event.clone()).collect(),
            latest_token: ChangeToken::new(format!("T{}", latest)),
            has_more: pending.len() > taken.len(),
        })
    }

    async fn resolve(&self, remote_id: &str) -> RemoteResult<RemoteObject> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .get(remote_id)
            .map_or(RemoteObject::Missing, |n| n.to_remote().into()))
    }

    async fn resolve_path(&self, path: &str) -> RemoteResult<RemoteObject> {
        let state = self.state.lock().await;
        Ok(state
            .find_by_path(path)
            .map_or(RemoteObject::Missing, |n| n.to_remote().into()))
    }

    async fn list_children(&self, folder_id: &str) -> RemoteResult<Vec<RemoteNode>> {
        let state = self.state.lock().await;
        let folder = state
            .nodes
            .get(folder_id)
            .ok_or_else(|| RemoteError::NotFound(folder_id.to_string()))?;

        let mut children: Vec<&Node> = state
            .nodes
            .values()
            .filter(|n| n.path != "/" && parent_path(&n.path) == folder.path)
            .collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(children.into_iter().map(Node::to_remote).collect())
    }

    async fn download_content(&self, document_id: &str) -> RemoteResult<Bytes> {
        let state = self.state.lock().await;
        let node = state
            .nodes
            .get(document_id)
            .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))?;

        if let Some(error) = state.download_failures.get(&node.path) {
            return Err(error.clone());
        }

        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(node.content.clone())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub temp: TempDir,
    pub remote: Arc<InMemoryRemote>,
    pub index: Arc<SqliteSyncIndex>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub errors: Arc<Mutex<Vec<String>>>,
    remote_root: String,
    batch_size: u32,
}

impl Harness {
    pub async fn new(remote_root: &str, ignore: &[&str]) -> Self {
        Self::build(InMemoryRemote::new(), remote_root, ignore, 1000, SyncHooks::new()).await
    }

    pub async fn build(
        remote: Arc<InMemoryRemote>,
        remote_root: &str,
        ignore: &[&str],
        batch_size: u32,
        hooks: SyncHooks,
    ) -> Self {
        let temp = TempDir::new().unwrap();
        let local_root = temp.path().join("mirror");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let index = Arc::new(SqliteSyncIndex::in_memory(&local_root).await.unwrap());

        let settings = SyncSettings {
            repository_id: "test-repo".to_string(),
            local_root,
            remote_root: remote_root.to_string(),
            ignore_patterns: ignore.iter().map(|p| p.to_string()).collect(),
            change_batch_size: batch_size,
            pass_timeout: None,
        };
        let orchestrator = orchestrator(settings, &remote, &index, &errors, hooks);

        Self {
            temp,
            remote,
            index,
            orchestrator,
            errors,
            remote_root: remote_root.to_string(),
            batch_size,
        }
    }

    /// Replaces the orchestrator with one using new ignore patterns and
    /// pass timeout, over the same remote, index and mirror root.
    pub fn reconfigure(
        &mut self,
        ignore: &[&str],
        pass_timeout: Option<Duration>,
        hooks: SyncHooks,
    ) {
        let settings = SyncSettings {
            repository_id: "test-repo".to_string(),
            local_root: self.local_root(),
            remote_root: self.remote_root.clone(),
            ignore_patterns: ignore.iter().map(|p| p.to_string()).collect(),
            change_batch_size: self.batch_size,
            pass_timeout,
        };
        self.orchestrator = orchestrator(settings, &self.remote, &self.index, &self.errors, hooks);
    }

    pub fn local_root(&self) -> PathBuf {
        self.temp.path().join("mirror")
    }

    pub fn local(&self, relative: &str) -> PathBuf {
        self.local_root().join(relative)
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    /// Local tree under the mirror root, keyed like
    /// [`InMemoryRemote::tree_under`].
    pub fn local_tree(&self) -> BTreeMap<String, Option<Vec<u8>>> {
        let mut tree = BTreeMap::new();
        let root = self.local_root();
        if root.exists() {
            walk(&root, &root, &mut tree);
        }
        tree
    }

    /// Every indexed path exists locally.
    pub async fn assert_index_backed_by_disk(&self) {
        for entry in self.index.list_subtree("").await.unwrap() {
            let local = self.local(&entry.path);
            assert!(local.exists(), "indexed path {} missing locally", entry.path);
            assert_eq!(local.is_dir(), entry.is_folder, "kind of {}", entry.path);
        }
    }
}

fn orchestrator(
    settings: SyncSettings,
    remote: &Arc<InMemoryRemote>,
    index: &Arc<SqliteSyncIndex>,
    errors: &Arc<Mutex<Vec<String>>>,
    hooks: SyncHooks,
) -> Arc<SyncOrchestrator> {
    let hooks = hooks.with_recoverable_error({
        let errors = Arc::clone(errors);
        move |message, error| {
            errors
                .lock()
                .unwrap()
                .push(format!("{}: {}", message, error));
        }
    });

    Arc::new(SyncOrchestrator::new(
        settings,
        Arc::clone(remote) as Arc<dyn RemoteTreeClient>,
        Arc::clone(index) as Arc<dyn SyncIndex>,
        Arc::new(TokioFileSystem::new()),
        hooks,
    ))
}

fn walk(root: &Path, dir: &Path, tree: &mut BTreeMap<String, Option<Vec<u8>>>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let relative = path
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if path.is_dir() {
            tree.insert(relative, None);
            walk(root, &path, tree);
        } else {
            tree.insert(relative, Some(std::fs::read(&path).unwrap()));
        }
    }
}
