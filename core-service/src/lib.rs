//! Repository service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (filesystem, HTTP)
//! and a CMIS client into per-repository sync workers. Desktop apps
//! typically enable the `desktop-shims` feature (the default), which
//! provides ready-made Tokio filesystem and `reqwest` HTTP bridges.
//!
//! ```ignore
//! use core_runtime::events::EventBus;
//! use core_service::{cmis_client, desktop_service};
//!
//! let service = desktop_service(EventBus::default());
//! let remote = cmis_client(connection)?;
//! let repository = service.add_repository(config, remote).await?;
//! ```

pub mod error;
pub mod repository;
pub mod service;

pub use error::{Result, ServiceError};
pub use repository::{LastPass, RepositoryStatus, SyncedRepository};
pub use service::SyncService;

#[cfg(feature = "desktop-shims")]
use std::sync::Arc;

#[cfg(feature = "desktop-shims")]
use core_runtime::{config::CmisConnection, events::EventBus};

/// Service backed by the Tokio filesystem bridge.
#[cfg(feature = "desktop-shims")]
pub fn desktop_service(event_bus: EventBus) -> SyncService {
    SyncService::new(Arc::new(bridge_desktop::TokioFileSystem::new()), event_bus)
}

/// CMIS client over the `reqwest` HTTP bridge.
#[cfg(feature = "desktop-shims")]
pub fn cmis_client(connection: CmisConnection) -> Result<Arc<provider_cmis::CmisClient>> {
    connection.validate()?;
    let http_client = bridge_desktop::ReqwestHttpClient::new()?;
    Ok(Arc::new(provider_cmis::CmisClient::new(
        Arc::new(http_client),
        connection,
    )))
}
