//! CMIS Browser Binding client
//!
//! Implements [`RemoteTreeClient`] for CMIS 1.1 repositories reachable over
//! the JSON browser binding.

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::{
    ChangeBatch, ChangeEvent, ChangeKind, ChangeToken, RemoteDocument, RemoteFolder, RemoteNode,
    RemoteObject, RemoteResult, RemoteTreeClient,
};
use bytes::Bytes;
use core_runtime::config::CmisConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{CmisError, Result};
use crate::types::{
    ErrorResponse, ObjectData, ObjectInFolderContainer, ObjectInFolderList, ObjectList,
    ObjectParent, RepositoryInfoJson, ServiceDocument,
};

/// Children requested per `children` page
const DEFAULT_PAGE_SIZE: u32 = 100;

/// Timeout for metadata requests
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for content downloads
const CONTENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Summary of a repository advertised by the service document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryInfo {
    pub id: String,
    pub name: String,
    pub latest_change_log_token: Option<String>,
    /// `none`, `objectidsonly`, `properties` or `all`
    pub capability_changes: String,
}

impl RepositoryInfo {
    /// Whether the repository keeps a change log at all.
    pub fn supports_change_log(&self) -> bool {
        !self.capability_changes.eq_ignore_ascii_case("none")
    }
}

impl From<RepositoryInfoJson> for RepositoryInfo {
    fn from(json: RepositoryInfoJson) -> Self {
        Self {
            id: json.repository_id,
            name: json.repository_name,
            latest_change_log_token: json.latest_change_log_token,
            capability_changes: json
                .capabilities
                .capability_changes
                .unwrap_or_else(|| "none".to_string()),
        }
    }
}

/// Folder hierarchy below a remote path, used by hosts to let users pick a
/// remote root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderTree {
    pub path: String,
    pub name: String,
    pub children: Vec<FolderTree>,
}

/// CMIS Browser Binding client
///
/// # Example
///
/// ```ignore
/// use provider_cmis::CmisClient;
/// use bridge_traits::RemoteTreeClient;
///
/// let client = CmisClient::new(http_client, connection);
/// let token = client.current_token().await?;
/// ```
pub struct CmisClient {
    http_client: Arc<dyn HttpClient>,
    connection: CmisConnection,
    retry_policy: RetryPolicy,
    page_size: u32,
}

impl CmisClient {
    /// Create a client for the repository named in `connection`.
    pub fn new(http_client: Arc<dyn HttpClient>, connection: CmisConnection) -> Self {
        Self {
            http_client,
            connection,
            retry_policy: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn connection(&self) -> &CmisConnection {
        &self.connection
    }

    fn service_url(&self) -> &str {
        self.connection.url.trim_end_matches('/')
    }

    fn repository_url(&self) -> String {
        self.connection.repository_url()
    }

    fn root_folder_url(&self) -> String {
        format!("{}/root", self.repository_url())
    }

    /// URL addressing an object by absolute path, one encoded segment at a time.
    fn path_url(&self, path: &str) -> String {
        let mut url = self.root_folder_url();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn request(&self, url: String, timeout: Duration) -> HttpRequest {
        HttpRequest::get(url)
            .basic_auth(&self.connection.username, &self.connection.password)
            .header("Accept", "application/json")
            .timeout(timeout)
    }

    fn json_request(&self, url: String, selector: &str) -> HttpRequest {
        self.request(url, METADATA_TIMEOUT)
            .query("cmisselector", selector)
            .query("succinct", "true")
    }

    /// Translate a non-success response into a [`CmisError`].
    ///
    /// `change_log` marks `contentChanges` requests, where `invalidArgument`
    /// means the token is unknown to the server.
    fn error_from_response(response: &HttpResponse, change_log: bool) -> CmisError {
        let status = response.status;
        let parsed: Option<ErrorResponse> = serde_json::from_slice(&response.body).ok();
        let (exception, message) = match parsed {
            Some(body) => (body.exception, body.message),
            None => (
                String::new(),
                String::from_utf8_lossy(&response.body).chars().take(512).collect(),
            ),
        };

        match status {
            401 => CmisError::AuthenticationFailed(message),
            403 if message.to_ascii_lowercase().contains("locked")
                || exception.to_ascii_lowercase().contains("locked") =>
            {
                CmisError::AccountLocked(message)
            }
            403 => CmisError::PermissionDenied(message),
            404 => CmisError::ObjectNotFound(message),
            400 if change_log && exception == "invalidArgument" => {
                CmisError::InvalidChangeToken(message)
            }
            429 | 503 => CmisError::ServerBusy {
                status_code: status,
                message,
            },
            _ => CmisError::ApiError {
                status_code: status,
                message: if exception.is_empty() {
                    message
                } else {
                    format!("{}: {}", exception, message)
                },
            },
        }
    }

    fn is_retryable(error: &CmisError) -> bool {
        match error {
            CmisError::ServerBusy { .. } | CmisError::NetworkError(_) => true,
            CmisError::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// Delay before the next try once `failures` attempts have failed:
    /// the base delay after the first failure, doubling after each further one.
    fn backoff_after(&self, failures: u32) -> Duration {
        self.retry_policy.delay_for(failures.saturating_sub(1))
    }

    /// Execute a GET with exponential backoff on busy servers and
    /// transport failures.
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn execute_with_retry(&self, request: HttpRequest, change_log: bool) -> Result<HttpResponse> {
        let mut attempt = 0;

        loop {
            let error = match self.http_client.execute(request.clone()).await {
                Ok(response) if response.is_success() => {
                    debug!("CMIS request succeeded: status={}", response.status);
                    return Ok(response);
                }
                Ok(response) => Self::error_from_response(&response, change_log),
                Err(e) => CmisError::from(e),
            };

            attempt += 1;
            if !Self::is_retryable(&error) || attempt >= self.retry_policy.max_attempts {
                warn!("CMIS request failed after {} attempt(s): {}", attempt, error);
                return Err(error);
            }

            let backoff = self.backoff_after(attempt);
            warn!(
                "CMIS request failed (attempt {}/{}): {}, retrying in {}ms",
                attempt,
                self.retry_policy.max_attempts,
                error,
                backoff.as_millis()
            );
            core_async::time::sleep(backoff).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        change_log: bool,
    ) -> Result<T> {
        let response = self.execute_with_retry(request, change_log).await?;
        serde_json::from_slice(&response.body)
            .map_err(|e| CmisError::ParseError(format!("Failed to parse response: {}", e)))
    }

    /// Repositories advertised by the service document.
    #[instrument(skip(self))]
    pub async fn repositories(&self) -> Result<Vec<RepositoryInfo>> {
        let request = self.request(self.service_url().to_string(), METADATA_TIMEOUT);
        let document: ServiceDocument = self.get_json(request, false).await?;

        let mut repositories: Vec<RepositoryInfo> =
            document.into_values().map(RepositoryInfo::from).collect();
        repositories.sort_by(|a, b| a.id.cmp(&b.id));

        info!("Found {} CMIS repositories", repositories.len());
        Ok(repositories)
    }

    /// Info for the configured repository.
    pub async fn repository_info(&self) -> Result<RepositoryInfo> {
        let request = self.json_request(self.repository_url(), "repositoryInfo");
        let mut document: ServiceDocument = self.get_json(request, false).await?;

        document
            .remove(&self.connection.repository_id)
            .map(RepositoryInfo::from)
            .ok_or_else(|| {
                CmisError::ObjectNotFound(format!(
                    "repository '{}'",
                    self.connection.repository_id
                ))
            })
    }

    async fn object_by_id(&self, object_id: &str) -> Result<ObjectData> {
        let request = self
            .json_request(self.root_folder_url(), "object")
            .query("objectId", object_id);
        self.get_json(request, false).await
    }

    async fn object_by_path(&self, path: &str) -> Result<ObjectData> {
        let request = self.json_request(self.path_url(path), "object");
        self.get_json(request, false).await
    }

    /// Path of a filed document, from its first parent.
    async fn document_path(&self, object_id: &str, name: &str) -> Result<Option<String>> {
        let request = self
            .json_request(self.root_folder_url(), "parents")
            .query("objectId", object_id)
            .query("includeRelativePathSegment", "true");
        let parents: Vec<ObjectParent> = self.get_json(request, false).await?;

        Ok(parents.into_iter().next().and_then(|parent| {
            let segment = parent
                .relative_path_segment
                .unwrap_or_else(|| name.to_string());
            parent
                .object
                .path()
                .map(|parent_path| child_path(parent_path, &segment))
        }))
    }

    /// Build a node from object data. `known_path` is used when the caller
    /// already knows where the object lives.
    fn to_node(object: &ObjectData, known_path: Option<String>) -> Result<Option<RemoteNode>> {
        let id = object
            .object_id()
            .ok_or_else(|| CmisError::ParseError("object without cmis:objectId".into()))?
            .to_string();

        if object.is_folder() {
            let path = known_path
                .or_else(|| object.path().map(str::to_string))
                .ok_or_else(|| CmisError::ParseError(format!("folder {} without path", id)))?;
            Ok(Some(RemoteNode::Folder(RemoteFolder { id, path })))
        } else if object.is_document() {
            let Some(path) = known_path else {
                return Ok(None);
            };
            Ok(Some(RemoteNode::Document(RemoteDocument {
                id,
                path,
                content_hash: object.content_fingerprint(),
                size: object.content_length(),
            })))
        } else {
            Ok(None)
        }
    }

    async fn folder_at(&self, path: &str) -> Result<RemoteFolder> {
        let object = self.object_by_path(path).await?;
        match Self::to_node(&object, Some(path.to_string()))? {
            Some(RemoteNode::Folder(folder)) => Ok(folder),
            _ => Err(CmisError::ObjectNotFound(format!("{} is not a folder", path))),
        }
    }

    async fn children_of(&self, folder: &RemoteFolder) -> Result<Vec<RemoteNode>> {
        let mut nodes = Vec::new();
        let mut skip_count: u64 = 0;

        loop {
            let request = self
                .json_request(self.root_folder_url(), "children")
                .query("objectId", folder.id.as_str())
                .query("skipCount", skip_count.to_string())
                .query("maxItems", self.page_size.to_string())
                .query("includePathSegment", "true");
            let page: ObjectInFolderList = self.get_json(request, false).await?;
            let received = page.objects.len() as u64;

            for child in page.objects {
                let name = child
                    .path_segment
                    .as_deref()
                    .or_else(|| child.object.name())
                    .unwrap_or_default();
                if name.is_empty() {
                    warn!("Skipping child of {} without a name", folder.path);
                    continue;
                }
                let path = child_path(&folder.path, name);
                if let Some(node) = Self::to_node(&child.object, Some(path))? {
                    nodes.push(node);
                }
            }

            if !page.has_more_items {
                break;
            }
            if received == 0 {
                return Err(CmisError::ParseError(format!(
                    "children of {} reported more items but returned an empty page",
                    folder.path
                )));
            }
            skip_count += received;
        }

        debug!("Listed {} children of {}", nodes.len(), folder.path);
        Ok(nodes)
    }

    async fn object_with_id(&self, object_id: &str) -> Result<RemoteObject> {
        let object = self.object_by_id(object_id).await?;
        let known_path = if object.is_document() {
            let name = object.name().unwrap_or_default();
            match self.document_path(object_id, name).await? {
                Some(path) => Some(path),
                None => return Ok(RemoteObject::Missing),
            }
        } else {
            None
        };
        Ok(Self::to_node(&object, known_path)?
            .map(RemoteObject::from)
            .unwrap_or(RemoteObject::Missing))
    }

    async fn object_at_path(&self, path: &str) -> Result<RemoteObject> {
        let object = self.object_by_path(path).await?;
        Ok(Self::to_node(&object, Some(path.to_string()))?
            .map(RemoteObject::from)
            .unwrap_or(RemoteObject::Missing))
    }

    /// Full paths of the direct subfolders of `path`.
    #[instrument(skip(self))]
    pub async fn subfolders(&self, path: &str) -> Result<Vec<String>> {
        let folder = self.folder_at(path).await?;
        let children = self.children_of(&folder).await?;

        Ok(children
            .into_iter()
            .filter(RemoteNode::is_folder)
            .map(|node| node.path().to_string())
            .collect())
    }

    /// Folder hierarchy below `path`, `depth` levels deep.
    #[instrument(skip(self))]
    pub async fn folder_tree(&self, path: &str, depth: u32) -> Result<FolderTree> {
        let folder = self.folder_at(path).await?;
        let mut tree = FolderTree {
            name: name_of(&folder.path).to_string(),
            path: folder.path.clone(),
            children: Vec::new(),
        };
        if depth == 0 {
            return Ok(tree);
        }

        let request = self
            .json_request(self.root_folder_url(), "folderTree")
            .query("objectId", folder.id.as_str())
            .query("depth", depth.to_string());
        let containers: Vec<ObjectInFolderContainer> = self.get_json(request, false).await?;

        tree.children = containers
            .iter()
            .filter_map(|c| folder_tree_node(c, &folder.path))
            .collect();
        Ok(tree)
    }
}

fn folder_tree_node(container: &ObjectInFolderContainer, parent: &str) -> Option<FolderTree> {
    let object = &container.object.object;
    if !object.is_folder() {
        return None;
    }
    let name = container
        .object
        .path_segment
        .as_deref()
        .or_else(|| object.name())?
        .to_string();
    let path = object
        .path()
        .map(str::to_string)
        .unwrap_or_else(|| child_path(parent, &name));
    let children = container
        .children
        .iter()
        .filter_map(|c| folder_tree_node(c, &path))
        .collect();

    Some(FolderTree {
        path,
        name,
        children,
    })
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

fn change_kind(change_type: &str) -> Option<ChangeKind> {
    match change_type {
        "created" => Some(ChangeKind::Created),
        "updated" => Some(ChangeKind::Updated),
        "deleted" => Some(ChangeKind::Deleted),
        "security" => Some(ChangeKind::SecurityChanged),
        _ => None,
    }
}

fn missing_on_not_found(result: Result<RemoteObject>) -> RemoteResult<RemoteObject> {
    match result {
        Ok(object) => Ok(object),
        Err(CmisError::ObjectNotFound(_)) => Ok(RemoteObject::Missing),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RemoteTreeClient for CmisClient {
    #[instrument(skip(self))]
    async fn current_token(&self) -> RemoteResult<Option<ChangeToken>> {
        let info = self.repository_info().await?;
        if !info.supports_change_log() {
            debug!("Repository {} does not keep a change log", info.id);
            return Ok(None);
        }
        Ok(info.latest_change_log_token.map(ChangeToken::new))
    }

    #[instrument(skip(self), fields(since = %since))]
    async fn get_changes(&self, since: &ChangeToken, max_items: u32) -> RemoteResult<ChangeBatch> {
        let request = self
            .json_request(self.repository_url(), "contentChanges")
            .query("changeLogToken", since.as_str())
            .query("maxItems", max_items.to_string())
            .query("includeProperties", "true");
        let list: ObjectList = self.get_json(request, true).await?;

        let mut events = Vec::with_capacity(list.objects.len());
        for object in &list.objects {
            let Some(info) = object.change_event_info.as_ref() else {
                warn!("Change entry without changeEventInfo, skipping");
                continue;
            };
            let Some(kind) = change_kind(&info.change_type) else {
                warn!("Unknown change type '{}', skipping", info.change_type);
                continue;
            };
            let Some(id) = object.object_id() else {
                warn!("Change entry without object id, skipping");
                continue;
            };

            let event = ChangeEvent::new(kind, id);
            events.push(match object.path() {
                Some(path) => event.with_path(path),
                None => event,
            });
        }

        let latest_token = match list.change_log_token {
            Some(token) => ChangeToken::new(token),
            None if list.has_more_items => {
                return Err(CmisError::ParseError(
                    "contentChanges reported more items without a changeLogToken".into(),
                )
                .into());
            }
            None => match self.repository_info().await?.latest_change_log_token {
                Some(token) => ChangeToken::new(token),
                None => since.clone(),
            },
        };

        info!(
            "Retrieved {} changes, latest token {}",
            events.len(),
            latest_token
        );
        Ok(ChangeBatch {
            events,
            latest_token,
            has_more: list.has_more_items,
        })
    }

    #[instrument(skip(self))]
    async fn resolve(&self, remote_id: &str) -> RemoteResult<RemoteObject> {
        missing_on_not_found(self.object_with_id(remote_id).await)
    }

    #[instrument(skip(self))]
    async fn resolve_path(&self, path: &str) -> RemoteResult<RemoteObject> {
        missing_on_not_found(self.object_at_path(path).await)
    }

    #[instrument(skip(self))]
    async fn list_children(&self, folder_id: &str) -> RemoteResult<Vec<RemoteNode>> {
        let object = self.object_by_id(folder_id).await?;
        let folder = match Self::to_node(&object, None)? {
            Some(RemoteNode::Folder(folder)) => folder,
            _ => {
                return Err(CmisError::ParseError(format!("{} is not a folder", folder_id)).into())
            }
        };
        Ok(self.children_of(&folder).await?)
    }

    #[instrument(skip(self))]
    async fn download_content(&self, document_id: &str) -> RemoteResult<Bytes> {
        let request = self
            .request(self.root_folder_url(), CONTENT_TIMEOUT)
            .query("cmisselector", "content")
            .query("objectId", document_id);
        let response = self.execute_with_retry(request, false).await?;

        debug!("Downloaded {} bytes", response.body.len());
        Ok(response.body)
    }
}
