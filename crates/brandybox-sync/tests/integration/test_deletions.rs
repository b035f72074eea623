//! Deletion propagation in both directions

use brandybox_core::domain::EntryKind;
use brandybox_sync::planner::Action;
use brandybox_sync::SyncPhase;

use crate::common::{p, Harness, T};

fn deletion_order(actions: &[Action]) -> Vec<String> {
    actions
        .iter()
        .filter(|a| a.is_deletion())
        .map(|a| a.path().to_string())
        .collect()
}

#[tokio::test]
async fn test_local_delete_propagates_to_remote() {
    let h = Harness::new().await;
    h.store.put("docs/report.pdf", b"%PDF-1.7", T);
    h.sync().await;
    assert!(h.saved_state().await.contains(&p("docs/report.pdf")));

    std::fs::remove_file(h.root().join("docs/report.pdf")).unwrap();

    let plan = h.engine.plan_only().await.unwrap();
    assert!(plan.actions.contains(&Action::DeleteRemote {
        path: p("docs/report.pdf"),
        kind: EntryKind::File,
    }));
    assert!(!plan
        .actions
        .iter()
        .any(|a| matches!(a, Action::Download { .. })));

    let report = h.sync().await;
    assert_eq!(report.deletions.deleted_remote, 1);
    assert!(h.store.get("docs/report.pdf").is_none());
    assert!(!h.saved_state().await.contains(&p("docs/report.pdf")));
}

#[tokio::test]
async fn test_remote_delete_propagates_to_local() {
    let h = Harness::new().await;
    h.write_local("notes.txt", b"keep me?", T);
    h.sync().await;

    h.store.remove("notes.txt");
    let report = h.sync().await;

    assert_eq!(report.deletions.deleted_local, 1);
    assert!(!h.local_exists("notes.txt"));
    assert!(!h.saved_state().await.contains(&p("notes.txt")));
}

#[tokio::test]
async fn test_remote_deletions_run_deepest_first() {
    let h = Harness::new().await;
    h.write_local("a/b/c/f.txt", b"deep", T);
    h.sync().await;

    std::fs::remove_dir_all(h.root().join("a")).unwrap();
    let plan = h.engine.plan_only().await.unwrap();
    assert_eq!(
        deletion_order(&plan.actions),
        vec!["a/b/c/f.txt", "a/b/c", "a/b", "a"]
    );

    h.store.clear_calls();
    h.sync().await;
    assert_eq!(
        h.store.calls(),
        vec![
            "delete-file a/b/c/f.txt",
            "delete-directory a/b/c",
            "delete-directory a/b",
            "delete-directory a",
        ]
    );
    assert!(h.store.paths().is_empty());
    assert!(h.saved_state().await.is_empty());
}

#[tokio::test]
async fn test_local_deletions_run_deepest_first() {
    let h = Harness::new().await;
    h.store.put("a/b/c/f.txt", b"deep", T);
    h.sync().await;
    assert!(h.local_exists("a/b/c/f.txt"));

    h.store.remove("a/b/c/f.txt");
    let plan = h.engine.plan_only().await.unwrap();
    assert_eq!(
        deletion_order(&plan.actions),
        vec!["a/b/c/f.txt", "a/b/c", "a/b", "a"]
    );

    let report = h.sync().await;
    assert_eq!(
        report.deletions.deleted_local + report.deletions.already_absent,
        4
    );
    assert!(report.deletions.failed.is_empty());
    assert!(!h.local_exists("a"));
    assert!(h.saved_state().await.is_empty());
}

#[tokio::test]
async fn test_directory_with_new_local_file_survives_remote_delete() {
    let h = Harness::new().await;
    h.store.put("shared/old.txt", b"old", T);
    h.sync().await;

    h.store.remove("shared/old.txt");
    h.write_local("shared/new.txt", b"new", T + 50.0);

    let report = h.sync().await;
    assert_eq!(report.deletions.deleted_local, 1);
    assert_eq!(report.transfers.files_uploaded, 1);
    assert!(h.local_exists("shared/new.txt"));
    assert!(!h.local_exists("shared/old.txt"));
    assert!(h.store.get("shared/new.txt").is_some());
}

#[tokio::test]
async fn test_mass_remote_delete_is_refused() {
    let h = Harness::new().await;
    for i in 0..51 {
        h.store.put(&format!("photo-{i:02}.jpg"), b"jpeg", T);
    }
    h.sync().await;
    assert_eq!(h.saved_state().await.len(), 51);

    // An empty folder where the synced files used to be
    for i in 0..51 {
        std::fs::remove_file(h.root().join(format!("photo-{i:02}.jpg"))).unwrap();
    }

    let report = h.sync().await;
    assert_eq!(report.outcome, SyncPhase::Warning);
    assert_eq!(report.guarded_deletions, 51);
    assert_eq!(report.deletions.deleted_remote, 0);
    assert_eq!(report.transfers.files_downloaded, 51);
    assert_eq!(h.store.paths().len(), 51);
    assert!(h.local_exists("photo-00.jpg"));
    assert!(report
        .summary()
        .contains("51 remote deletions refused and downloaded instead"));
}

#[tokio::test]
async fn test_failed_remote_delete_keeps_state_entry() {
    let h = Harness::new().await;
    h.write_local("locked.txt", b"locked", T);
    h.sync().await;

    std::fs::remove_file(h.root().join("locked.txt")).unwrap();
    h.store.fail(
        "locked.txt",
        brandybox_core::ports::TransportError::Server {
            status: 423,
            message: "locked".into(),
        },
    );

    let report = h.sync().await;
    assert_eq!(report.outcome, SyncPhase::Warning);
    assert_eq!(report.deletions.failed.len(), 1);
    assert!(h.saved_state().await.contains(&p("locked.txt")));

    h.store.clear_failure("locked.txt");
    let report = h.sync().await;
    assert_eq!(report.deletions.deleted_remote, 1);
    assert!(h.store.get("locked.txt").is_none());
}

#[tokio::test]
async fn test_remote_directory_delete_keeps_unsynced_local_contents() {
    let h = Harness::new().await;
    h.store.put("proj/main.rs", b"fn main() {}", T);
    h.sync().await;
    assert!(h.local_exists("proj/main.rs"));

    h.write_local("proj/.git/HEAD", b"ref: refs/heads/main", T);
    h.write_local("proj/Thumbs.db", b"thumbnail cache", T);
    h.store.remove("proj/main.rs");

    let report = h.sync().await;

    assert_eq!(report.outcome, SyncPhase::Warning);
    assert_eq!(report.deletions.deleted_local, 1);
    assert!(!h.local_exists("proj/main.rs"));
    assert!(h.local_exists("proj/.git/HEAD"));
    assert_eq!(report.deletions.failed.len(), 1);
    assert_eq!(report.deletions.failed[0].path, p("proj"));
    assert!(h.saved_state().await.contains(&p("proj")));
    assert!(!h.saved_state().await.contains(&p("proj/main.rs")));
}

#[tokio::test]
async fn test_remote_directory_delete_clears_os_metadata() {
    let h = Harness::new().await;
    h.store.put("album/cover.jpg", b"jpeg", T);
    h.sync().await;

    h.write_local("album/.DS_Store", b"finder", T);
    h.store.remove("album/cover.jpg");

    let report = h.sync().await;

    assert!(report.deletions.failed.is_empty());
    assert!(!h.local_exists("album"));
    assert!(!h.saved_state().await.contains(&p("album")));
}
