//! Time-related operations.
//!
//! `sleep`, `timeout` and `interval` integrate with Tokio's timer wheel;
//! `Instant` is the monotonic std clock.
//!
//! ```rust
//! use core_async::time::{sleep, Duration, Instant};
//!
//! async fn example() {
//!     let start = Instant::now();
//!     sleep(Duration::from_millis(10)).await;
//!     assert!(start.elapsed() >= Duration::from_millis(10));
//! }
//! ```

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
pub use tokio::time::{
    error::Elapsed, interval, sleep, sleep_until, timeout, Interval, MissedTickBehavior, Sleep,
    Timeout,
};

/// Seconds since the Unix epoch, saturating to zero for clocks set before 1970.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
