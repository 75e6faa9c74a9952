//! Synchronization primitives.
//!
//! All primitives are async-aware Tokio types: locks never block the
//! executor and every type is `Send + Sync`.
//!
//! `CancellationToken` comes from `tokio-util` and is the cooperative
//! cancellation flag handed to long-running sync passes.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{watch, Mutex};
//!
//! async fn example() {
//!     let mutex = Mutex::new(42);
//!     *mutex.lock().await += 1;
//!
//!     let (tx, mut rx) = watch::channel(false);
//!     tx.send_replace(true);
//!     rx.wait_for(|paused| *paused).await.ok();
//! }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, RwLock, RwLockReadGuard,
    RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
