//! Async runtime facade for the repository mirror engine.
//!
//! Every `core-*`, `bridge-*` and `provider-*` crate depends on this crate
//! instead of reaching for Tokio directly. Keeping the runtime behind one
//! facade means the engine only ever sees a single set of primitives for
//! spawning, sleeping, locking and cancelling.
//!
//! # Modules
//!
//! - `task`: Task spawning and join handles
//! - `time`: Sleep, timeouts, intervals and instants
//! - `sync`: Locks, channels, `watch` and `CancellationToken`
//! - `fs` / `io`: Async filesystem and I/O re-exports
//! - `runtime`: `block_on` and runtime builders
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::CancellationToken;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let token = CancellationToken::new();
//!     let child = token.clone();
//!
//!     let handle = core_async::spawn(async move {
//!         core_async::select! {
//!             _ = child.cancelled() => "cancelled",
//!             _ = sleep(Duration::from_secs(60)) => "elapsed",
//!         }
//!     });
//!
//!     token.cancel();
//!     let _ = handle.await;
//! }
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

pub mod fs;
pub mod io;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
pub use tokio::select;
