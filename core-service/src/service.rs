//! Registry of synchronized repositories.

use crate::error::{Result, ServiceError};
use crate::repository::SyncedRepository;
use bridge_traits::{FileSystemAccess, RemoteTreeClient};
use core_async::task::join_all;
use core_runtime::config::RepositoryConfig;
use core_runtime::events::{EventBus, EventStream, RepositoryEvent};
use core_sync::SyncIndex;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Host-facing entry point: owns every registered repository and the event
/// bus their workers publish on.
pub struct SyncService {
    fs: Arc<dyn FileSystemAccess>,
    event_bus: EventBus,
    repositories: RwLock<BTreeMap<String, Arc<SyncedRepository>>>,
}

impl SyncService {
    pub fn new(fs: Arc<dyn FileSystemAccess>, event_bus: EventBus) -> Self {
        Self {
            fs,
            event_bus,
            repositories: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Stream of events from every repository.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    /// Register a repository, open its index and start polling.
    pub async fn add_repository(
        &self,
        config: RepositoryConfig,
        remote: Arc<dyn RemoteTreeClient>,
    ) -> Result<Arc<SyncedRepository>> {
        self.ensure_unregistered(&config.id)?;
        let repository =
            SyncedRepository::open(config, remote, Arc::clone(&self.fs), self.event_bus.clone())
                .await?;
        self.register(repository)
    }

    /// Register a repository backed by an index the caller opened.
    pub fn add_repository_with_index(
        &self,
        config: RepositoryConfig,
        remote: Arc<dyn RemoteTreeClient>,
        index: Arc<dyn SyncIndex>,
    ) -> Result<Arc<SyncedRepository>> {
        self.ensure_unregistered(&config.id)?;
        let repository = SyncedRepository::with_index(
            config,
            remote,
            Arc::clone(&self.fs),
            index,
            self.event_bus.clone(),
        )?;
        self.register(repository)
    }

    /// Stop a repository's worker and forget it. The local mirror and its
    /// index stay on disk.
    pub async fn remove_repository(&self, id: &str) -> Result<()> {
        let repository = self
            .repositories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| ServiceError::RepositoryNotFound(id.to_string()))?;

        repository.shutdown().await;
        repository.emit_repository(RepositoryEvent::Removed {
            repository_id: id.to_string(),
        });
        info!(repository_id = %id, "Repository removed");
        Ok(())
    }

    pub fn repository(&self, id: &str) -> Option<Arc<SyncedRepository>> {
        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All repositories, ordered by id.
    pub fn repositories(&self) -> Vec<Arc<SyncedRepository>> {
        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Stop every worker and cancel running passes.
    pub async fn shutdown(&self) {
        let repositories = self.repositories();
        join_all(repositories.iter().map(|r| r.shutdown())).await;
    }

    fn ensure_unregistered(&self, id: &str) -> Result<()> {
        if self
            .repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
        {
            return Err(ServiceError::RepositoryExists(id.to_string()));
        }
        Ok(())
    }

    fn register(&self, repository: Arc<SyncedRepository>) -> Result<Arc<SyncedRepository>> {
        let id = repository.id();
        {
            let mut repositories = self
                .repositories
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if repositories.contains_key(&id) {
                return Err(ServiceError::RepositoryExists(id));
            }
            repositories.insert(id.clone(), Arc::clone(&repository));
        }

        repository.emit_repository(RepositoryEvent::Added {
            repository_id: id.clone(),
        });
        repository.start_polling();
        info!(repository_id = %id, "Repository added");
        Ok(repository)
    }
}
