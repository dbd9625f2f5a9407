use std::path::{Path, PathBuf};

use chrono::Utc;
use storagepulse_core::{
    AggregationStore, DuplicateGroup, FileRecord, MonitoredRoot, RootScanCommit, ScanToken,
    StoreError,
};
use storagepulse_store::SqliteStore;

fn record(path: &str, size: u64, root: &str, token: i64) -> FileRecord {
    FileRecord::new(path, size, Utc::now(), root, ScanToken(token))
}

fn commit_for(root: &MonitoredRoot, token: i64, size: u64, items: u64) -> RootScanCommit {
    RootScanCommit {
        root_id: root.id.clone(),
        root_path: root.path.clone(),
        scan_token: ScanToken(token),
        size,
        items,
        free_bytes: 1000,
        completed_at: Utc::now(),
    }
}

fn store_with_root(path: &str) -> (SqliteStore, MonitoredRoot) {
    let store = SqliteStore::open_in_memory().unwrap();
    let root = MonitoredRoot::new(path);
    store.insert_root(&root).unwrap();
    (store, root)
}

#[test]
fn test_insert_and_lookup_root() {
    let (store, root) = store_with_root("/data");

    let by_id = store.root(&root.id).unwrap().unwrap();
    assert_eq!(by_id.path, PathBuf::from("/data"));
    assert!(by_id.last_scan.is_none());

    let by_path = store.root_by_path(Path::new("/data")).unwrap().unwrap();
    assert_eq!(by_path.id, root.id);

    assert!(store.root_by_path(Path::new("/other")).unwrap().is_none());
}

#[test]
fn test_duplicate_root_path_is_conflict() {
    let (store, _) = store_with_root("/data");
    let err = store.insert_root(&MonitoredRoot::new("/data")).unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
}

#[test]
fn test_roots_are_ordered_by_path() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_root(&MonitoredRoot::new("/zeta")).unwrap();
    store.insert_root(&MonitoredRoot::new("/alpha")).unwrap();

    let roots = store.roots().unwrap();
    let paths: Vec<_> = roots.iter().map(|r| r.path.clone()).collect();
    assert_eq!(paths, vec![PathBuf::from("/alpha"), PathBuf::from("/zeta")]);
}

#[test]
fn test_commit_publishes_totals_and_snapshot() {
    let (store, root) = store_with_root("/data");
    store
        .upsert_file_records(&[
            record("/data/a.txt", 100, "/data", 1),
            record("/data/b.txt", 200, "/data", 1),
        ])
        .unwrap();

    assert!(store.commit_root_scan(&commit_for(&root, 1, 300, 2)).unwrap());

    let updated = store.root(&root.id).unwrap().unwrap();
    assert_eq!(updated.size, 300);
    assert_eq!(updated.items, 2);
    assert!(updated.last_scan.is_some());

    let history = store.usage_history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].used_bytes, 300);
    assert_eq!(history[0].free_bytes, 1000);
    assert_eq!(history[0].root_id, root.id);
}

#[test]
fn test_commit_prunes_stale_records() {
    let (store, root) = store_with_root("/data");
    store
        .upsert_file_records(&[
            record("/data/a.txt", 100, "/data", 1),
            record("/data/gone.txt", 50, "/data", 1),
        ])
        .unwrap();
    store.commit_root_scan(&commit_for(&root, 1, 150, 2)).unwrap();

    // Second scan only sees a.txt.
    store
        .upsert_file_records(&[record("/data/a.txt", 120, "/data", 2)])
        .unwrap();
    store.commit_root_scan(&commit_for(&root, 2, 120, 1)).unwrap();

    let records = store.file_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, PathBuf::from("/data/a.txt"));
    assert_eq!(records[0].size, 120);
    assert_eq!(records[0].scan_token, ScanToken(2));
}

#[test]
fn test_commit_does_not_touch_other_roots() {
    let store = SqliteStore::open_in_memory().unwrap();
    let first = MonitoredRoot::new("/first");
    let second = MonitoredRoot::new("/second");
    store.insert_root(&first).unwrap();
    store.insert_root(&second).unwrap();

    store
        .upsert_file_records(&[
            record("/first/a.txt", 10, "/first", 1),
            record("/second/b.txt", 20, "/second", 5),
        ])
        .unwrap();
    store.commit_root_scan(&commit_for(&first, 1, 10, 1)).unwrap();

    assert_eq!(store.file_records().unwrap().len(), 2);
}

#[test]
fn test_commit_for_removed_root_discards_records() {
    let (store, root) = store_with_root("/data");
    assert!(store.delete_root(&root.id).unwrap());

    store
        .upsert_file_records(&[record("/data/late.txt", 10, "/data", 3)])
        .unwrap();
    assert!(!store.commit_root_scan(&commit_for(&root, 3, 10, 1)).unwrap());

    assert!(store.file_records().unwrap().is_empty());
    assert!(store.usage_history(10).unwrap().is_empty());
}

#[test]
fn test_delete_root_cascades() {
    let (store, root) = store_with_root("/data");
    store
        .upsert_file_records(&[record("/data/a.txt", 10, "/data", 1)])
        .unwrap();
    store.commit_root_scan(&commit_for(&root, 1, 10, 1)).unwrap();

    assert!(store.delete_root(&root.id).unwrap());
    assert!(store.root(&root.id).unwrap().is_none());
    assert!(store.file_records().unwrap().is_empty());
    assert!(store.usage_history(10).unwrap().is_empty());

    assert!(!store.delete_root(&root.id).unwrap());
}

#[test]
fn test_usage_history_returns_latest_oldest_first() {
    let (store, root) = store_with_root("/data");
    for (token, size) in [(1, 100), (2, 200), (3, 300)] {
        store.commit_root_scan(&commit_for(&root, token, size, 1)).unwrap();
    }

    let history = store.usage_history(2).unwrap();
    let sizes: Vec<_> = history.iter().map(|s| s.used_bytes).collect();
    assert_eq!(sizes, vec![200, 300]);
    assert!(history[0].id < history[1].id);
}

#[test]
fn test_file_type_breakdown() {
    let (store, _) = store_with_root("/data");
    store
        .upsert_file_records(&[
            record("/data/a.txt", 100, "/data", 1),
            record("/data/b.TXT", 50, "/data", 1),
            record("/data/c.jpg", 400, "/data", 1),
            record("/data/README", 5, "/data", 1),
        ])
        .unwrap();

    let stats = store.file_type_breakdown().unwrap();
    assert_eq!(stats.len(), 3);
    assert_eq!(stats[0].file_type, ".jpg");
    assert_eq!(stats[0].total_size, 400);
    assert_eq!(stats[1].file_type, ".txt");
    assert_eq!(stats[1].total_size, 150);
    assert_eq!(stats[1].count, 2);
    assert_eq!(stats[2].file_type, "unknown");
}

#[test]
fn test_replace_duplicate_groups_is_wholesale() {
    let store = SqliteStore::open_in_memory().unwrap();
    let first = DuplicateGroup {
        name: "a.txt".into(),
        size: 10,
        paths: vec!["/x/a.txt".into(), "/y/a.txt".into()],
    };
    store.replace_duplicate_groups(&[first.clone()]).unwrap();
    assert_eq!(store.duplicate_groups().unwrap(), vec![first]);

    let second = DuplicateGroup {
        name: "b.bin".into(),
        size: 99,
        paths: vec!["/x/b.bin".into(), "/z/b.bin".into()],
    };
    store.replace_duplicate_groups(&[second.clone()]).unwrap();
    assert_eq!(store.duplicate_groups().unwrap(), vec![second]);

    store.replace_duplicate_groups(&[]).unwrap();
    assert!(store.duplicate_groups().unwrap().is_empty());
}

#[test]
fn test_reset_clears_everything() {
    let (store, root) = store_with_root("/data");
    store
        .upsert_file_records(&[record("/data/a.txt", 10, "/data", 1)])
        .unwrap();
    store.commit_root_scan(&commit_for(&root, 1, 10, 1)).unwrap();
    store
        .replace_duplicate_groups(&[DuplicateGroup {
            name: "a.txt".into(),
            size: 10,
            paths: vec!["/data/a.txt".into(), "/data/b/a.txt".into()],
        }])
        .unwrap();

    store.reset().unwrap();

    assert!(store.roots().unwrap().is_empty());
    assert!(store.file_records().unwrap().is_empty());
    assert!(store.usage_history(10).unwrap().is_empty());
    assert!(store.duplicate_groups().unwrap().is_empty());
}

#[test]
fn test_data_survives_reopen() {
    let temp = tempfile::TempDir::new().unwrap();
    let db_path = temp.path().join("monitor.sqlite");

    let root = MonitoredRoot::new("/data");
    {
        let store = SqliteStore::open(&db_path).unwrap();
        store.insert_root(&root).unwrap();
    }

    let store = SqliteStore::open(&db_path).unwrap();
    let reopened = store.root(&root.id).unwrap().unwrap();
    assert_eq!(reopened.path, root.path);
}
