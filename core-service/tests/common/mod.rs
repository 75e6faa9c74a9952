#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::{
    ChangeBatch, ChangeEvent, ChangeKind, ChangeToken, RemoteDocument, RemoteError, RemoteFolder,
    RemoteNode, RemoteObject, RemoteResult, RemoteTreeClient,
};
use bytes::Bytes;
use core_async::time::{timeout, Duration};
use core_runtime::config::RepositoryConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream};
use core_service::{SyncService, SyncedRepository};
use core_sync::{sha256_content_hash, SqliteSyncIndex};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct Node {
    id: String,
    content: Option<Vec<u8>>,
}

struct State {
    nodes: BTreeMap<String, Node>,
    log: Vec<ChangeEvent>,
    next_id: u64,
    reject_credentials: bool,
}

/// Small remote tree with a change log; every mutation appends one event.
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                id: "root".to_string(),
                content: None,
            },
        );
        Arc::new(Self {
            state: Mutex::new(State {
                nodes,
                log: Vec::new(),
                next_id: 0,
                reject_credentials: false,
            }),
        })
    }

    pub fn put(&self, path: &str, content: &str) {
        let mut state = self.state.lock().unwrap();
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let mut parent = String::new();
        for segment in &segments[..segments.len() - 1] {
            parent = format!("{}/{}", parent, segment);
            if !state.nodes.contains_key(&parent) {
                state.next_id += 1;
                let id = format!("folder-{}", state.next_id);
                state.nodes.insert(parent.clone(), Node { id: id.clone(), content: None });
                state.log.push(ChangeEvent::new(ChangeKind::Created, id));
            }
        }

        let existing = state.nodes.get(path).map(|node| node.id.clone());
        let (id, kind) = match existing {
            Some(id) => (id, ChangeKind::Updated),
            None => {
                state.next_id += 1;
                (format!("doc-{}", state.next_id), ChangeKind::Created)
            }
        };
        state.nodes.insert(
            path.to_string(),
            Node {
                id: id.clone(),
                content: Some(content.as_bytes().to_vec()),
            },
        );
        state.log.push(ChangeEvent::new(kind, id));
    }

    pub fn reject_credentials(&self, reject: bool) {
        self.state.lock().unwrap().reject_credentials = reject;
    }

    fn node(path: &str, node: &Node) -> RemoteNode {
        match &node.content {
            Some(content) => RemoteNode::Document(RemoteDocument {
                id: node.id.clone(),
                path: path.to_string(),
                content_hash: sha256_content_hash(content),
                size: Some(content.len() as u64),
            }),
            None => RemoteNode::Folder(RemoteFolder {
                id: node.id.clone(),
                path: path.to_string(),
            }),
        }
    }

    fn check_credentials(state: &State) -> RemoteResult<()> {
        if state.reject_credentials {
            return Err(RemoteError::PermissionDenied("bad password".into()));
        }
        Ok(())
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => "/",
    }
}

fn sequence(token: &ChangeToken) -> RemoteResult<usize> {
    token
        .as_str()
        .trim_start_matches('T')
        .parse()
        .map_err(|_| RemoteError::InvalidToken(token.to_string()))
}

#[async_trait]
impl RemoteTreeClient for FakeRemote {
    async fn current_token(&self) -> RemoteResult<Option<ChangeToken>> {
        let state = self.state.lock().unwrap();
        Self::check_credentials(&state)?;
        Ok(Some(ChangeToken::new(format!("T{}", state.log.len()))))
    }

    async fn get_changes(&self, since: &ChangeToken, max_items: u32) -> RemoteResult<ChangeBatch> {
        let state = self.state.lock().unwrap();
        Self::check_credentials(&state)?;
        let start = sequence(since)?;
        if start > state.log.len() {
            return Err(RemoteError::InvalidToken(since.to_string()));
        }
        let end = (start + max_items as usize).min(state.log.len());
        Ok(ChangeBatch {
            events: state.log[start..end].to_vec(),
            latest_token: ChangeToken::new(format!("T{}", end)),
            has_more: end < state.log.len(),
        })
    }

    async fn resolve(&self, remote_id: &str) -> RemoteResult<RemoteObject> {
        let state = self.state.lock().unwrap();
        Self::check_credentials(&state)?;
        Ok(state
            .nodes
            .iter()
            .find(|(_, node)| node.id == remote_id)
            .map(|(path, node)| RemoteObject::from(Self::node(path, node)))
            .unwrap_or(RemoteObject::Missing))
    }

    async fn resolve_path(&self, path: &str) -> RemoteResult<RemoteObject> {
        let state = self.state.lock().unwrap();
        Self::check_credentials(&state)?;
        Ok(state
            .nodes
            .get(path)
            .map(|node| RemoteObject::from(Self::node(path, node)))
            .unwrap_or(RemoteObject::Missing))
    }

    async fn list_children(&self, folder_id: &str) -> RemoteResult<Vec<RemoteNode>> {
        let state = self.state.lock().unwrap();
        Self::check_credentials(&state)?;
        let folder = state
            .nodes
            .iter()
            .find(|(_, node)| node.id == folder_id)
            .map(|(path, _)| path.clone())
            .ok_or_else(|| RemoteError::NotFound(folder_id.to_string()))?;

        Ok(state
            .nodes
            .iter()
            .filter(|(path, _)| path.as_str() != "/" && parent_of(path) == folder)
            .map(|(path, node)| Self::node(path, node))
            .collect())
    }

    async fn download_content(&self, document_id: &str) -> RemoteResult<Bytes> {
        let state = self.state.lock().unwrap();
        Self::check_credentials(&state)?;
        state
            .nodes
            .values()
            .find(|node| node.id == document_id)
            .and_then(|node| node.content.clone())
            .map(Bytes::from)
            .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))
    }
}

pub struct Fixture {
    pub temp: TempDir,
    pub remote: Arc<FakeRemote>,
    pub event_bus: EventBus,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            remote: FakeRemote::new(),
            event_bus: EventBus::new(1000),
        }
    }

    pub fn local_root(&self, id: &str) -> PathBuf {
        self.temp.path().join(id)
    }

    pub fn config(&self, id: &str) -> RepositoryConfig {
        RepositoryConfig::builder()
            .id(id)
            .local_root(self.local_root(id))
            .remote_root("/docs")
            .poll_interval(Duration::from_secs(3600))
            .index_path(self.temp.path().join(format!("{}.db", id)))
            .build()
            .unwrap()
    }

    pub async fn repository(&self, id: &str) -> Arc<SyncedRepository> {
        let config = self.config(id);
        let index = SqliteSyncIndex::in_memory(&config.local_root).await.unwrap();
        SyncedRepository::with_index(
            config,
            self.remote.clone(),
            Arc::new(TokioFileSystem::new()),
            Arc::new(index),
            self.event_bus.clone(),
        )
        .unwrap()
    }

    pub fn service(&self) -> SyncService {
        SyncService::new(Arc::new(TokioFileSystem::new()), self.event_bus.clone())
    }

    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }
}

/// Next event matching `predicate`, failing the test after five seconds.
pub async fn next_event<F>(stream: &mut EventStream, predicate: F) -> CoreEvent
where
    F: Fn(&CoreEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let event = stream.recv().await.expect("event bus closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
