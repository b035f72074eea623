//! Cycle-level behaviour: idempotence, persistence, status, resets and
//! whole-cycle failures

use brandybox_core::ports::TransportError;
use brandybox_sync::state::StateStore;
use brandybox_sync::{SyncError, SyncPhase};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{self, p, Harness, MemoryStore, T};

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_second_cycle_plans_nothing_and_keeps_state() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"alpha", T + 1.0);
    h.write_local("docs/b.txt", b"bravo", T + 2.0);
    h.store.put("c.txt", b"charlie", T + 3.0);
    h.store.put("sub/d.txt", b"delta", T + 4.0);

    let first = h.sync().await;
    assert_eq!(first.outcome, SyncPhase::Synced);
    assert_eq!(first.transfers.files_uploaded, 2);
    assert_eq!(first.transfers.files_downloaded, 2);

    let before = h.saved_state().await;
    let plan = h.engine.plan_only().await.unwrap();
    assert!(plan.is_empty(), "unexpected plan: {plan:?}");

    h.store.clear_calls();
    let second = h.sync().await;
    assert_eq!(second.transfers.files_uploaded, 0);
    assert_eq!(second.transfers.files_downloaded, 0);
    assert_eq!(second.confirmed, 0);
    assert!(h.store.calls().is_empty());

    let after = h.saved_state().await;
    assert_eq!(before.entries(), after.entries());
}

#[tokio::test]
async fn test_state_tracks_files_and_their_directories() {
    let h = Harness::new().await;
    h.write_local("docs/b.txt", b"bravo", T);
    h.store.put("sub/d.txt", b"delta", T);

    h.sync().await;

    let state = h.saved_state().await;
    for path in ["docs", "docs/b.txt", "sub", "sub/d.txt"] {
        assert!(state.contains(&p(path)), "{path} missing from state");
    }
    assert_eq!(state.sync_root(), Some(h.root()));
}

#[tokio::test]
async fn test_store_without_hashes_settles() {
    let h = Harness::with_store(MemoryStore::without_hashes()).await;
    h.write_local("a.txt", b"alpha", T + 1.0);
    h.store.put("b.txt", b"bravo", T + 2.0);

    h.sync().await;
    let second = h.sync().await;
    assert_eq!(second.transfers.files_uploaded, 0);
    assert_eq!(second.transfers.files_downloaded, 0);

    // The server mtime of the upload is learned once, then nothing changes
    let plan = h.engine.plan_only().await.unwrap();
    assert!(plan.is_empty(), "unexpected plan: {plan:?}");
}

#[tokio::test]
async fn test_state_survives_restart() {
    let mut h = Harness::new().await;
    h.write_local("a.txt", b"alpha", T);
    h.store.put("b.txt", b"bravo", T);
    h.sync().await;

    h.restart().await;
    assert_eq!(h.engine.tracked_entries(), Some(2));
    let plan = h.engine.plan_only().await.unwrap();
    assert!(plan.is_empty());
}

// ============================================================================
// Status
// ============================================================================

#[tokio::test]
async fn test_status_reports_cycle_summary() {
    let h = Harness::new().await;
    let mut updates = h.engine.subscribe();
    h.write_local("a.txt", b"alpha", T);

    h.sync().await;
    assert!(updates.has_changed().unwrap());

    let status = h.engine.status();
    assert_eq!(status.phase, SyncPhase::Synced);
    assert_eq!(
        status.message.as_deref(),
        Some("Synced: 1 uploaded, 0 downloaded, 0 deleted")
    );

    h.sync().await;
    assert_eq!(h.engine.status().message.as_deref(), Some("Up to date"));
}

// ============================================================================
// Reset and root changes
// ============================================================================

#[tokio::test]
async fn test_reset_rebuilds_state_without_transfers() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"alpha", T);
    h.store.put("b.txt", b"bravo", T);
    h.sync().await;

    h.engine.reset().await.unwrap();
    assert_eq!(h.engine.tracked_entries(), Some(0));
    assert!(h.saved_state().await.is_empty());

    h.store.clear_calls();
    let report = h.sync().await;
    assert_eq!(report.transfers.files_uploaded, 0);
    assert_eq!(report.transfers.files_downloaded, 0);
    assert_eq!(report.confirmed, 2);
    assert!(h.store.calls().is_empty());
}

#[tokio::test]
async fn test_changed_root_discards_state_instead_of_deleting() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"alpha", T);
    h.sync().await;

    let other_root = TempDir::new().unwrap();
    let engine = common::build_engine(
        other_root.path(),
        &h.state_path(),
        h.store.clone(),
        &h.clock,
    )
    .await;

    let report = engine.run_cycle(&CancellationToken::new()).await.unwrap();
    assert!(report.state_reset);
    assert_eq!(report.deletions.deleted_remote, 0);
    assert_eq!(report.transfers.files_downloaded, 1);
    assert!(h.store.get("a.txt").is_some());
    assert_eq!(
        std::fs::read(other_root.path().join("a.txt")).unwrap(),
        b"alpha"
    );

    let state = StateStore::open(&h.state_path()).await.unwrap();
    assert_eq!(state.sync_root(), Some(other_root.path()));
}

#[tokio::test]
async fn test_missing_root_is_created_on_first_sync() {
    let h = Harness::new().await;
    std::fs::remove_dir(h.root()).unwrap();
    h.store.put("a.txt", b"alpha", T);

    let report = h.sync().await;
    assert_eq!(report.transfers.files_downloaded, 1);
    assert_eq!(h.read_local("a.txt").unwrap(), b"alpha");
}

#[tokio::test]
async fn test_missing_root_with_state_fails_the_cycle() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"alpha", T);
    h.sync().await;

    std::fs::remove_dir_all(h.root()).unwrap();
    let result = h.engine.run_cycle(&CancellationToken::new()).await;
    assert!(matches!(result, Err(SyncError::RootUnavailable { .. })));
    assert!(h.store.get("a.txt").is_some());
}

// ============================================================================
// Whole-cycle failures
// ============================================================================

#[tokio::test]
async fn test_listing_failure_leaves_state_untouched() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"alpha", T);
    h.sync().await;
    let before = h.saved_state().await;

    h.write_local("b.txt", b"bravo", T);
    std::fs::remove_file(h.root().join("a.txt")).unwrap();
    h.store
        .fail_listing(Some(TransportError::Network("connection refused".into())));

    let err = h
        .engine
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(h.engine.status().phase, SyncPhase::Error);

    let after = h.saved_state().await;
    assert_eq!(before.entries(), after.entries());
    assert!(h.store.get("a.txt").is_some());
    assert!(h.store.get("b.txt").is_none());
}

#[tokio::test]
async fn test_cancelled_cycle_changes_nothing() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"alpha", T);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = h.engine.run_cycle(&cancel).await;
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert!(h.store.paths().is_empty());
    assert!(h.saved_state().await.is_empty());
}
