//! Uploads, downloads, skips and conflict resolution

use std::sync::Arc;

use brandybox_core::domain::EntryKind;
use brandybox_core::ports::TransportError;
use brandybox_sync::filesystem::LocalFileSystemAdapter;
use brandybox_sync::metrics::SyncMetrics;
use brandybox_sync::planner::{Action, ConflictReason};
use brandybox_sync::state::StateStore;
use brandybox_sync::status::StatusPublisher;
use brandybox_sync::transfer::{TransferOptions, TransferScheduler};
use brandybox_sync::SyncPhase;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{p, Harness, T};

fn rejected() -> TransportError {
    TransportError::Server {
        status: 400,
        message: "rejected".into(),
    }
}

fn transfer_paths(actions: &[Action], label: &str) -> Vec<String> {
    actions
        .iter()
        .filter(|a| a.label() == label)
        .map(|a| a.path().to_string())
        .collect()
}

// ============================================================================
// Failures stay out of the state
// ============================================================================

#[tokio::test]
async fn test_failed_upload_is_not_recorded_and_is_planned_again() {
    let h = Harness::new().await;
    h.write_local("bad.txt", b"payload", T);
    h.store.fail("bad.txt", rejected());

    let report = h.sync().await;
    assert_eq!(report.outcome, SyncPhase::Warning);
    assert_eq!(report.transfers.skipped_uploads(), 1);
    assert_eq!(report.summary(), "1 paths skipped (1 uploads)");
    assert!(!h.saved_state().await.contains(&p("bad.txt")));
    assert!(h.store.get("bad.txt").is_none());

    let plan = h.engine.plan_only().await.unwrap();
    assert_eq!(transfer_paths(&plan.actions, "upload"), vec!["bad.txt"]);

    h.store.clear_failure("bad.txt");
    let report = h.sync().await;
    assert_eq!(report.outcome, SyncPhase::Synced);
    assert_eq!(report.transfers.files_uploaded, 1);
    assert!(h.saved_state().await.contains(&p("bad.txt")));
}

#[tokio::test]
async fn test_one_failure_does_not_stop_other_transfers() {
    let h = Harness::new().await;
    h.write_local("p.txt", b"papa", T);
    h.write_local("q.txt", b"quebec", T);
    h.write_local("r.txt", b"romeo", T);
    h.store.fail("q.txt", rejected());

    let report = h.sync().await;
    assert_eq!(report.transfers.files_uploaded, 2);
    assert_eq!(report.transfers.skipped.len(), 1);
    assert_eq!(report.transfers.skipped[0].path, p("q.txt"));

    let state = h.saved_state().await;
    assert!(state.contains(&p("p.txt")));
    assert!(state.contains(&p("r.txt")));
    assert!(!state.contains(&p("q.txt")));
    assert_eq!(h.store.paths(), vec!["p.txt", "r.txt"]);
}

#[tokio::test]
async fn test_crashed_transfer_task_is_reported_as_skipped() {
    let h = Harness::new().await;
    h.write_local("fine.txt", b"fine", T);
    h.write_local("crash.txt", b"boom", T);
    h.store.panic_on("crash.txt");

    let report = h.sync().await;
    assert_eq!(report.outcome, SyncPhase::Warning);
    assert_eq!(report.transfers.files_uploaded, 1);
    assert_eq!(report.transfers.skipped_uploads(), 1);
    assert_eq!(report.transfers.skipped[0].path, p("crash.txt"));
    assert!(report.transfers.skipped[0].reason.contains("panicked"));

    let state = h.saved_state().await;
    assert!(state.contains(&p("fine.txt")));
    assert!(!state.contains(&p("crash.txt")));
}

#[tokio::test]
async fn test_transient_failures_are_retried_before_skipping() {
    let h = Harness::new().await;
    h.write_local("busy.txt", b"busy", T);
    h.store.fail(
        "busy.txt",
        TransportError::Server {
            status: 503,
            message: "unavailable".into(),
        },
    );

    let report = h.sync().await;
    assert_eq!(report.transfers.skipped_uploads(), 1);

    let attempts = h
        .store
        .calls()
        .iter()
        .filter(|c| c.as_str() == "upload busy.txt")
        .count();
    assert_eq!(attempts, 3);
    assert!(h.clock.sleeps().len() >= 2);
}

#[tokio::test]
async fn test_download_of_vanished_file_is_skipped() {
    let h = Harness::new().await;
    h.store.put("gone.txt", b"soon gone", T);
    h.store
        .fail("gone.txt", TransportError::NotFound("gone.txt".into()));

    let report = h.sync().await;
    assert_eq!(report.outcome, SyncPhase::Warning);
    assert_eq!(report.transfers.skipped_downloads(), 1);
    assert!(!h.saved_state().await.contains(&p("gone.txt")));

    // No partial file left behind
    assert_eq!(std::fs::read_dir(h.root()).unwrap().count(), 0);
}

// ============================================================================
// Content comparison
// ============================================================================

#[tokio::test]
async fn test_equal_content_is_never_transferred() {
    let h = Harness::new().await;
    h.write_local("same.txt", b"identical", T + 500.0);
    h.store.put("same.txt", b"identical", T);

    let plan = h.engine.plan_only().await.unwrap();
    assert!(plan.transfers().next().is_none());

    let report = h.sync().await;
    assert_eq!(report.transfers.files_uploaded, 0);
    assert_eq!(report.transfers.files_downloaded, 0);
    assert_eq!(report.confirmed, 1);
    assert!(h.store.calls().is_empty());
    assert!(h.saved_state().await.contains(&p("same.txt")));
}

#[tokio::test]
async fn test_newer_local_copy_is_uploaded() {
    let h = Harness::new().await;
    h.write_local("notes.txt", b"local notes", T + 10.0);
    h.store.put("notes.txt", b"remote notes", T + 5.0);

    let plan = h.engine.plan_only().await.unwrap();
    assert_eq!(transfer_paths(&plan.actions, "upload"), vec!["notes.txt"]);
    assert!(transfer_paths(&plan.actions, "download").is_empty());

    h.sync().await;
    assert_eq!(h.store.get("notes.txt").unwrap().data, b"local notes");
    assert_eq!(h.read_local("notes.txt").unwrap(), b"local notes");
}

#[tokio::test]
async fn test_newer_remote_copy_is_downloaded() {
    let h = Harness::new().await;
    h.write_local("notes.txt", b"local notes", T + 5.0);
    h.store.put("notes.txt", b"remote notes", T + 10.0);

    let plan = h.engine.plan_only().await.unwrap();
    assert_eq!(transfer_paths(&plan.actions, "download"), vec!["notes.txt"]);
    assert!(transfer_paths(&plan.actions, "upload").is_empty());

    h.sync().await;
    assert_eq!(h.read_local("notes.txt").unwrap(), b"remote notes");
    assert_eq!(h.local_mtime("notes.txt"), (T + 10.0) as i64);
    assert_eq!(h.store.get("notes.txt").unwrap().data, b"remote notes");
}

#[tokio::test]
async fn test_edit_on_one_side_wins_regardless_of_mtimes() {
    let h = Harness::new().await;
    h.store.put("plan.md", b"v1", T + 100.0);
    h.sync().await;

    // Another device writes v2 with an older clock; only the remote changed
    h.store.put("plan.md", b"v2 from elsewhere", T + 50.0);

    let plan = h.engine.plan_only().await.unwrap();
    assert_eq!(transfer_paths(&plan.actions, "download"), vec!["plan.md"]);

    h.sync().await;
    assert_eq!(h.read_local("plan.md").unwrap(), b"v2 from elsewhere");
}

#[tokio::test]
async fn test_type_conflict_leaves_path_alone() {
    let h = Harness::new().await;
    h.write_local("x", b"a plain file", T);
    h.store.put("x/inner.txt", b"a file inside a folder", T);

    let plan = h.engine.plan_only().await.unwrap();
    assert!(plan
        .actions
        .iter()
        .all(|a| a.path() != &p("x") && !a.path().is_descendant_of(&p("x"))));
    assert_eq!(plan.conflicts.len(), 1);
    assert_eq!(
        plan.conflicts[0].reason,
        ConflictReason::TypeMismatch {
            local: EntryKind::File,
            remote: EntryKind::Directory,
        }
    );

    let report = h.sync().await;
    assert_eq!(report.outcome, SyncPhase::Warning);
    assert_eq!(report.conflicts.len(), 1);

    let state = h.saved_state().await;
    assert!(!state.contains(&p("x")));
    assert!(!state.contains(&p("x/inner.txt")));
    assert_eq!(h.read_local("x").unwrap(), b"a plain file");
    assert!(h.store.get("x/inner.txt").is_some());
}

#[tokio::test]
async fn test_directories_are_created_before_their_files() {
    let h = Harness::new().await;
    h.store.put("photos/2024/summer/beach.jpg", b"jpeg", T);

    let plan = h.engine.plan_only().await.unwrap();
    let order: Vec<String> = plan.actions.iter().map(|a| a.path().to_string()).collect();
    assert_eq!(
        order,
        vec![
            "photos",
            "photos/2024",
            "photos/2024/summer",
            "photos/2024/summer/beach.jpg"
        ]
    );

    let report = h.sync().await;
    assert_eq!(report.transfers.directories_created, 3);
    assert_eq!(report.transfers.files_downloaded, 1);
    assert!(h.local_exists("photos/2024/summer/beach.jpg"));
}

#[tokio::test]
async fn test_failed_remote_directory_skips_its_files() {
    let h = Harness::new().await;
    h.write_local("newdir/a.txt", b"alpha", T);
    h.write_local("newdir/b.txt", b"bravo", T);
    h.store.fail("newdir", rejected());

    let report = h.sync().await;
    assert_eq!(report.outcome, SyncPhase::Warning);
    assert_eq!(report.transfers.files_uploaded, 0);
    assert_eq!(report.transfers.skipped.len(), 3);
    assert!(report.transfers.skipped[1..]
        .iter()
        .all(|s| s.reason.contains("parent directory newdir")));
    assert!(h.store.paths().is_empty());
    assert!(!h.saved_state().await.contains(&p("newdir")));
}

#[tokio::test]
async fn test_files_under_failed_directory_still_advance_progress() {
    let h = Harness::new().await;
    h.write_local("newdir/a.txt", b"alpha", T);
    h.write_local("newdir/b.txt", b"bravo", T);
    h.store.fail("newdir", rejected());
    let plan = h.engine.plan_only().await.unwrap();

    let status = StatusPublisher::new();
    let scheduler = TransferScheduler::new(
        h.root().to_path_buf(),
        Arc::new(LocalFileSystemAdapter::new()),
        h.store.clone(),
        TransferOptions::default(),
        Arc::new(h.clock.clone()),
        status.clone(),
        Arc::new(SyncMetrics::new().unwrap()),
    );
    let state_dir = TempDir::new().unwrap();
    let mut state = StateStore::open(&state_dir.path().join("sync_state.json"))
        .await
        .unwrap();

    let report = scheduler
        .execute(&plan.actions, &mut state, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.skipped.len(), 3);
    let current = status.current();
    assert_eq!(current.phase, SyncPhase::Transferring);
    let progress = current.progress.unwrap();
    assert_eq!((progress.current, progress.total), (2, 2));
}
