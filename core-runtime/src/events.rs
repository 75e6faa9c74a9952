//! # Event Bus System
//!
//! Broadcasts typed events from the mirror engine to any number of
//! observers (status UIs, tray controllers, log shippers) over
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps per-domain enums ([`SyncEvent`], [`RepositoryEvent`])
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Receiver wrapper with optional filtering
//!
//! ```text
//! ┌──────────────────┐  emit   ┌──────────┐  subscribe  ┌────────────┐
//! │ Repository worker├────────>│ EventBus ├────────────>│ Subscriber │
//! └──────────────────┘         └──────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::UpToDate {
//!         repository_id: "docs".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(matches!(subscriber.try_recv(), Ok(CoreEvent::Sync(_))));
//! ```
//!
//! Emitting with no subscribers returns an error that callers are free to
//! ignore; events are never buffered for future subscribers.

use core_async::sync::broadcast::{
    self,
    error::{RecvError, SendError, TryRecvError},
    Receiver,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default buffer size for the event bus.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync pass lifecycle events
    Sync(SyncEvent),
    /// Repository registration and settings events
    Repository(RepositoryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Repository(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed {
                recoverable: false, ..
            }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Failed { .. })
            | CoreEvent::Sync(SyncEvent::RecoverableError { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. })
            | CoreEvent::Sync(SyncEvent::UpToDate { .. })
            | CoreEvent::Repository(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Repository the event refers to.
    pub fn repository_id(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.repository_id(),
            CoreEvent::Repository(e) => e.repository_id(),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted while a repository runs sync passes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A pass started.
    Started {
        repository_id: String,
        /// Whether a full rewrite (crawl) was requested.
        full_rewrite: bool,
    },
    /// Progress update at a checkpoint.
    Progress {
        repository_id: String,
        /// "change_log" or "crawl".
        strategy: String,
        items_processed: u64,
        /// Known only for change-log batches.
        total_items: Option<u64>,
        /// Progress percentage (0-100), when a total is known.
        percent: Option<u8>,
    },
    /// The remote token matched the stored token; nothing to do.
    UpToDate { repository_id: String },
    /// A pass finished and its token was persisted.
    Completed {
        repository_id: String,
        strategy: String,
        downloaded: u64,
        deleted: u64,
        errors: u64,
        duration_ms: u64,
    },
    /// A pass stopped early.
    Failed {
        repository_id: String,
        message: String,
        /// `false` for authorization failures that need user action.
        recoverable: bool,
    },
    /// A pass observed cancellation.
    Cancelled {
        repository_id: String,
        items_processed: u64,
    },
    /// A pass request was dropped because one was already active.
    Skipped { repository_id: String, state: String },
    /// A single item failed; the pass continued.
    RecoverableError {
        repository_id: String,
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::UpToDate { .. } => "Already up to date",
            SyncEvent::Completed { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
            SyncEvent::Skipped { .. } => "Sync skipped",
            SyncEvent::RecoverableError { .. } => "Item could not be synchronized",
        }
    }

    fn repository_id(&self) -> &str {
        match self {
            SyncEvent::Started { repository_id, .. }
            | SyncEvent::Progress { repository_id, .. }
            | SyncEvent::UpToDate { repository_id }
            | SyncEvent::Completed { repository_id, .. }
            | SyncEvent::Failed { repository_id, .. }
            | SyncEvent::Cancelled { repository_id, .. }
            | SyncEvent::Skipped { repository_id, .. }
            | SyncEvent::RecoverableError { repository_id, .. } => repository_id,
        }
    }
}

// ============================================================================
// Repository Events
// ============================================================================

/// Events about the set of synchronized repositories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RepositoryEvent {
    Added { repository_id: String },
    Removed { repository_id: String },
    /// Settings changed and the worker restarted.
    SettingsUpdated { repository_id: String },
}

impl RepositoryEvent {
    fn description(&self) -> &str {
        match self {
            RepositoryEvent::Added { .. } => "Repository added",
            RepositoryEvent::Removed { .. } => "Repository removed",
            RepositoryEvent::SettingsUpdated { .. } => "Repository settings updated",
        }
    }

    fn repository_id(&self) -> &str {
        match self {
            RepositoryEvent::Added { repository_id }
            | RepositoryEvent::Removed { repository_id }
            | RepositoryEvent::SettingsUpdated { repository_id } => repository_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers falling behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream
// ============================================================================

type EventPredicate = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver wrapper that skips events rejected by a predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventPredicate>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only yield events for which `predicate` returns true.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only yield events about one repository.
    pub fn for_repository(self, repository_id: impl Into<String>) -> Self {
        let repository_id = repository_id.into();
        self.filter(move |event| event.repository_id() == repository_id)
    }

    /// Receives the next matching event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns the next buffered matching event without waiting.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, TryRecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |predicate| predicate(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
