//! Integration tests for the crawl path: first pass, convergence, ignore
//! rules, name conflicts and pruning of remotely deleted items.

mod common;

use bridge_traits::RemoteError;
use common::Harness;
use core_sync::{sha256_content_hash, PassOutcome, StrategyKind, SyncIndex};

#[core_async::test]
async fn test_first_pass_mirrors_tree_and_stores_token() {
    let h = Harness::new("/docs", &[]).await;
    h.remote.put_document("/docs/a.txt", "alpha").await;
    h.remote.add_folder("/docs/sub").await;

    let result = h.orchestrator.run_pass(false).await.unwrap();

    assert_eq!(result.outcome, PassOutcome::Completed);
    assert_eq!(result.strategy, Some(StrategyKind::Crawl));
    assert_eq!(std::fs::read(h.local("a.txt")).unwrap(), b"alpha");
    assert!(h.local("sub").is_dir());

    assert_eq!(h.index.len().await.unwrap(), 2);
    let entry = h.index.get("a.txt").await.unwrap().unwrap();
    assert_eq!(entry.content_hash, Some(sha256_content_hash(b"alpha")));
    assert!(h.index.get("sub").await.unwrap().unwrap().is_folder);

    let token = h.remote.token().await;
    assert_eq!(h.index.change_token().await.unwrap(), Some(token.clone()));
    assert_eq!(result.token, Some(token));
    assert_eq!(result.stats.downloaded, 1);
    assert_eq!(result.stats.folders_created, 1);
}

#[core_async::test]
async fn test_converged_tree_needs_no_transfers() {
    let h = Harness::new("/docs", &[]).await;
    h.remote.put_document("/docs/a.txt", "alpha").await;
    h.remote.put_document("/docs/sub/b.txt", "beta").await;
    h.remote.put_document("/docs/sub/deeper/c.txt", "gamma").await;
    h.remote.add_folder("/docs/empty").await;
    h.remote.put_document("/elsewhere/d.txt", "delta").await;

    h.orchestrator.run_pass(false).await.unwrap();
    assert_eq!(h.local_tree(), h.remote.tree_under("/docs").await);
    assert_eq!(h.remote.download_count(), 3);

    let again = h.orchestrator.run_pass(false).await.unwrap();
    assert_eq!(again.outcome, PassOutcome::UpToDate);
    assert_eq!(again.strategy, None);

    let rewrite = h.orchestrator.run_pass(true).await.unwrap();
    assert_eq!(rewrite.outcome, PassOutcome::Completed);
    assert_eq!(rewrite.stats.downloaded, 0);
    assert_eq!(rewrite.stats.skipped_unchanged, 3);
    assert_eq!(h.remote.download_count(), 3);
    assert_eq!(h.error_count(), 0);
}

#[core_async::test]
async fn test_ignored_subtree_is_never_mirrored() {
    let h = Harness::new("/", &["/docs/private"]).await;
    h.remote.put_document("/docs/a.txt", "alpha").await;
    h.remote.put_document("/docs/private/secret.txt", "secret").await;
    h.remote.put_document("/docs/private-notes.txt", "notes").await;

    h.orchestrator.run_pass(false).await.unwrap();

    assert!(h.local("docs/a.txt").exists());
    assert!(h.local("docs/private-notes.txt").exists());
    assert!(!h.local("docs/private").exists());
    assert!(h.index.list_subtree("docs/private").await.unwrap().is_empty());
}

#[core_async::test]
async fn test_remote_names_differing_by_case_are_reported() {
    let h = Harness::new("/docs", &[]).await;
    h.remote.put_document("/docs/README.md", "upper").await;
    h.remote.put_document("/docs/Readme.md", "mixed").await;

    let result = h.orchestrator.run_pass(false).await.unwrap();

    assert_eq!(result.outcome, PassOutcome::Completed);
    assert_eq!(h.error_count(), 1);
    assert!(h.errors.lock().unwrap()[0].contains("Name conflict"));
    assert_eq!(std::fs::read(h.local("README.md")).unwrap(), b"upper");
    assert!(!h.local("Readme.md").exists());
    assert_eq!(h.index.len().await.unwrap(), 1);
    assert!(h.index.resync_required().await.unwrap());
}

#[core_async::test]
async fn test_local_case_collision_leaves_existing_file_alone() {
    let h = Harness::new("/docs", &[]).await;
    std::fs::create_dir_all(h.local_root()).unwrap();
    std::fs::write(h.local("NOTES.txt"), "mine").unwrap();
    h.remote.put_document("/docs/notes.txt", "theirs").await;

    h.orchestrator.run_pass(false).await.unwrap();

    assert_eq!(h.error_count(), 1);
    assert_eq!(std::fs::read(h.local("NOTES.txt")).unwrap(), b"mine");
    assert!(h.index.get("notes.txt").await.unwrap().is_none());
}

#[core_async::test]
async fn test_crawl_removes_items_deleted_remotely() {
    let h = Harness::new("/docs", &[]).await;
    h.remote.set_changes_supported(false).await;
    h.remote.put_document("/docs/a.txt", "alpha").await;
    h.remote.put_document("/docs/sub/b.txt", "beta").await;
    h.remote.put_document("/docs/keep.txt", "keep").await;

    let first = h.orchestrator.run_pass(false).await.unwrap();
    assert_eq!(first.token, None);
    assert_eq!(h.index.len().await.unwrap(), 4);

    h.remote.delete("/docs/sub").await;
    h.remote.delete("/docs/a.txt").await;

    let second = h.orchestrator.run_pass(false).await.unwrap();
    assert_eq!(second.strategy, Some(StrategyKind::Crawl));
    assert_eq!(second.stats.deleted, 3);
    assert!(!h.local("sub").exists());
    assert!(!h.local("a.txt").exists());
    assert!(h.local("keep.txt").exists());
    assert_eq!(h.index.len().await.unwrap(), 1);
    h.assert_index_backed_by_disk().await;
}

#[core_async::test]
async fn test_missing_local_file_is_downloaded_again() {
    let h = Harness::new("/docs", &[]).await;
    h.remote.put_document("/docs/a.txt", "alpha").await;
    h.orchestrator.run_pass(false).await.unwrap();

    std::fs::remove_file(h.local("a.txt")).unwrap();

    let result = h.orchestrator.run_pass(true).await.unwrap();
    assert_eq!(result.stats.downloaded, 1);
    assert_eq!(std::fs::read(h.local("a.txt")).unwrap(), b"alpha");
}

#[core_async::test]
async fn test_hash_mismatch_skips_item() {
    let h = Harness::new("/docs", &[]).await;
    h.remote.put_document("/docs/a.txt", "alpha").await;
    h.remote.put_document("/docs/b.txt", "beta").await;
    h.remote.corrupt_hash("/docs/b.txt").await;

    let result = h.orchestrator.run_pass(false).await.unwrap();

    assert_eq!(result.outcome, PassOutcome::Completed);
    assert_eq!(result.stats.errors, 1);
    assert!(h.errors.lock().unwrap()[0].contains("Data inconsistency"));
    assert!(h.local("a.txt").exists());
    assert!(!h.local("b.txt").exists());
    assert!(h.index.get("b.txt").await.unwrap().is_none());
}

#[core_async::test]
async fn test_failed_download_is_retried_by_next_crawl() {
    let h = Harness::new("/docs", &[]).await;
    h.remote.put_document("/docs/a.txt", "alpha").await;
    h.remote
        .fail_download("/docs/a.txt", RemoteError::Network("connection reset".into()))
        .await;

    let first = h.orchestrator.run_pass(false).await.unwrap();
    assert_eq!(first.stats.errors, 1);
    assert!(h.index.resync_required().await.unwrap());

    h.remote.clear_failures().await;
    let second = h.orchestrator.run_pass(false).await.unwrap();

    assert_eq!(second.strategy, Some(StrategyKind::Crawl));
    assert_eq!(std::fs::read(h.local("a.txt")).unwrap(), b"alpha");
    assert!(!h.index.resync_required().await.unwrap());
}

#[core_async::test]
async fn test_missing_remote_root_aborts_without_pruning() {
    let h = Harness::new("/docs", &[]).await;
    h.remote.put_document("/other/a.txt", "alpha").await;

    let result = h.orchestrator.run_pass(false).await.unwrap();

    assert_eq!(result.outcome, PassOutcome::Aborted);
    assert!(result.error.unwrap().contains("/docs"));
    assert_eq!(h.error_count(), 1);
    assert_eq!(h.index.change_token().await.unwrap(), None);
}
