//! Integration tests for cooperative cancellation, suspension and
//! single-flight execution.

mod common;

use common::{Harness, InMemoryRemote};
use core_async::sync::Notify;
use core_async::time::{timeout, Duration};
use core_sync::{PassOutcome, PauseSwitch, StrategyKind, SyncHooks, SyncIndex, SyncState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hooks that pause the worker the first time `pause_after` items have
/// been processed, and signal `paused`.
fn pausing_hooks(pause_after: u64) -> (SyncHooks, PauseSwitch, Arc<Notify>) {
    let switch = PauseSwitch::new();
    let paused = Arc::new(Notify::new());

    let hooks = SyncHooks::new()
        .with_suspend(Arc::new(switch.clone()))
        .with_progress({
            let switch = switch.clone();
            let paused = Arc::clone(&paused);
            let fired = AtomicBool::new(false);
            move |progress| {
                if progress.processed >= pause_after && !fired.swap(true, Ordering::SeqCst) {
                    switch.pause();
                    paused.notify_one();
                }
            }
        });

    (hooks, switch, paused)
}

async fn ten_documents() -> Arc<InMemoryRemote> {
    let remote = InMemoryRemote::new();
    for i in 0..10 {
        remote
            .put_document(&format!("/docs/file-{:02}.txt", i), &format!("content {}", i))
            .await;
    }
    remote
}

async fn pausing_harness(pause_after: u64) -> (Harness, PauseSwitch, Arc<Notify>) {
    let (hooks, switch, paused) = pausing_hooks(pause_after);
    let h = Harness::build(ten_documents().await, "/docs", &[], 1000, hooks).await;
    (h, switch, paused)
}

#[core_async::test]
async fn test_cancel_during_crawl_stops_at_checkpoint() {
    let (h, switch, paused) = pausing_harness(3).await;

    let pass = {
        let orchestrator = Arc::clone(&h.orchestrator);
        core_async::spawn(async move { orchestrator.run_pass(false).await })
    };

    timeout(Duration::from_secs(5), paused.notified())
        .await
        .expect("worker should reach the pause point");
    assert_eq!(h.orchestrator.state(), SyncState::Running);

    timeout(Duration::from_secs(5), h.orchestrator.cancel())
        .await
        .expect("cancel should return once the pass stopped");

    let result = pass.await.unwrap().unwrap();
    assert_eq!(result.outcome, PassOutcome::Cancelled);
    assert_eq!(h.orchestrator.state(), SyncState::Idle);
    assert_eq!(h.index.change_token().await.unwrap(), None);

    let mirrored = h.index.len().await.unwrap();
    assert!(mirrored >= 3 && mirrored < 10, "mirrored {} items", mirrored);
    h.assert_index_backed_by_disk().await;

    switch.resume();
    let finished = h.orchestrator.run_pass(false).await.unwrap();
    assert_eq!(finished.outcome, PassOutcome::Completed);
    assert_eq!(finished.strategy, Some(StrategyKind::Crawl));
    assert_eq!(h.local_tree(), h.remote.tree_under("/docs").await);
}

#[core_async::test]
async fn test_second_pass_is_skipped_while_one_is_active() {
    let (h, switch, paused) = pausing_harness(1).await;

    let pass = {
        let orchestrator = Arc::clone(&h.orchestrator);
        core_async::spawn(async move { orchestrator.run_pass(false).await })
    };
    timeout(Duration::from_secs(5), paused.notified())
        .await
        .expect("worker should reach the pause point");

    let skipped = h.orchestrator.run_pass(true).await.unwrap();
    assert_eq!(skipped.outcome, PassOutcome::Skipped);
    assert_eq!(skipped.stats.downloaded, 0);

    switch.resume();
    let result = pass.await.unwrap().unwrap();
    assert_eq!(result.outcome, PassOutcome::Completed);
    assert_eq!(result.stats.downloaded, 10);
}

#[core_async::test]
async fn test_suspended_worker_keeps_progress_and_resumes() {
    let (h, switch, paused) = pausing_harness(5).await;

    let pass = {
        let orchestrator = Arc::clone(&h.orchestrator);
        core_async::spawn(async move { orchestrator.run_pass(false).await })
    };
    timeout(Duration::from_secs(5), paused.notified())
        .await
        .expect("worker should reach the pause point");

    let before_resume = h.index.len().await.unwrap();
    core_async::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.index.len().await.unwrap(), before_resume);
    assert_eq!(h.orchestrator.state(), SyncState::Running);

    switch.resume();
    let result = timeout(Duration::from_secs(5), pass)
        .await
        .expect("pass should finish after resume")
        .unwrap()
        .unwrap();

    assert_eq!(result.outcome, PassOutcome::Completed);
    assert_eq!(h.index.len().await.unwrap(), 10);
}

#[core_async::test]
async fn test_cancel_without_active_pass_returns_immediately() {
    let h = Harness::new("/docs", &[]).await;

    timeout(Duration::from_secs(1), h.orchestrator.cancel())
        .await
        .expect("cancel on an idle orchestrator must not block");
    assert_eq!(h.orchestrator.state(), SyncState::Idle);
}

#[core_async::test]
async fn test_pass_timeout_stops_at_next_checkpoint() {
    let (hooks, switch, _paused) = pausing_hooks(3);
    let mut h = Harness::build(ten_documents().await, "/docs", &[], 1000, SyncHooks::new()).await;
    h.reconfigure(&[], Some(Duration::from_millis(200)), hooks);

    let result = timeout(Duration::from_secs(5), h.orchestrator.run_pass(false))
        .await
        .expect("timed out pass should return")
        .unwrap();

    assert_eq!(result.outcome, PassOutcome::Aborted);
    assert!(result.error.unwrap().contains("timed out"));
    assert_eq!(h.orchestrator.state(), SyncState::Idle);
    assert_eq!(h.index.change_token().await.unwrap(), None);

    let mirrored = h.index.len().await.unwrap();
    assert!(mirrored >= 3 && mirrored < 10, "mirrored {} items", mirrored);
    h.assert_index_backed_by_disk().await;
    assert!(
        h.local_tree().keys().all(|path| !path.ends_with(".sync-part")),
        "partial downloads left behind: {:?}",
        h.local_tree().keys().collect::<Vec<_>>()
    );

    switch.resume();
    h.reconfigure(&[], None, SyncHooks::new());
    let finished = h.orchestrator.run_pass(false).await.unwrap();
    assert_eq!(finished.outcome, PassOutcome::Completed);
    assert_eq!(h.local_tree(), h.remote.tree_under("/docs").await);
}
