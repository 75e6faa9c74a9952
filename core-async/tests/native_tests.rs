//! Integration tests for the core-async facade.

use core_async::{sync, task, time};
use std::sync::Arc;

#[core_async::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    let result = handle.await.unwrap();
    assert_eq!(result, 42);
}

#[core_async::test]
async fn test_timeout_failure() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(200)).await;
        42
    })
    .await;

    assert!(result.is_err());
}

#[core_async::test]
async fn test_cancellation_token_wakes_waiters() {
    let token = sync::CancellationToken::new();
    let child = token.child_token();

    let handle = task::spawn(async move {
        child.cancelled().await;
        "cancelled"
    });

    time::sleep(time::Duration::from_millis(10)).await;
    token.cancel();

    assert_eq!(handle.await.unwrap(), "cancelled");
    assert!(token.is_cancelled());
}

#[core_async::test]
async fn test_select_prefers_cancellation() {
    let token = sync::CancellationToken::new();
    token.cancel();

    let outcome = core_async::select! {
        _ = token.cancelled() => "cancelled",
        _ = time::sleep(time::Duration::from_secs(5)) => "elapsed",
    };

    assert_eq!(outcome, "cancelled");
}

#[core_async::test]
async fn test_watch_wait_for() {
    let (tx, rx) = sync::watch::channel(0u32);
    let tx = Arc::new(tx);
    let writer = tx.clone();

    task::spawn(async move {
        for value in 1..=3 {
            writer.send_replace(value);
            task::yield_now().await;
        }
    });

    let mut rx = rx;
    let seen = *rx.wait_for(|value| *value == 3).await.unwrap();
    assert_eq!(seen, 3);
}

#[core_async::test]
async fn test_mutex_shared_between_tasks() {
    let mutex = Arc::new(sync::Mutex::new(0));
    let mutex_clone = mutex.clone();

    task::spawn(async move {
        *mutex_clone.lock().await += 1;
    })
    .await
    .unwrap();

    assert_eq!(*mutex.lock().await, 1);
}

#[test]
fn test_unix_timestamp_is_positive() {
    assert!(time::unix_timestamp() > 1_600_000_000);
}
