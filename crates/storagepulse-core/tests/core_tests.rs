use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use storagepulse_core::{
    DuplicateGroup, FileRecord, MonitorConfig, MonitoredRoot, RootId, ScanScope, ScanToken,
    UsageSnapshot,
};
use tempfile::NamedTempFile;

#[test]
fn test_parse_complete_config_file() {
    let content = r#"
database_path = "/var/lib/storagepulse/db.sqlite"
scan_interval_secs = 600
settle_window_ms = 500
max_settle_delay_ms = 5000
max_concurrent_roots = 4
store_failure_threshold = 5
log_capacity = 50
watch_enabled = false
scan_on_add = false
exclude_patterns = ["*.tmp", "node_modules"]
record_batch_size = 128
"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();

    let config = MonitorConfig::load(Some(file.path())).unwrap();

    assert_eq!(
        config.database_path,
        PathBuf::from("/var/lib/storagepulse/db.sqlite")
    );
    assert_eq!(config.scan_interval_secs, 600);
    assert_eq!(config.max_concurrent_roots, 4);
    assert_eq!(config.exclude_patterns.len(), 2);
    assert!(!config.watch_enabled);
    assert!(!config.scan_on_add);
}

#[test]
fn test_partial_config_uses_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"scan_interval_secs = 120\n").unwrap();

    let config = MonitorConfig::load(Some(file.path())).unwrap();

    assert_eq!(config.scan_interval_secs, 120);
    assert_eq!(config.settle_window_ms, 2000);
    assert!(config.watch_enabled);
}

#[test]
fn test_invalid_toml_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"this is not valid toml [[[").unwrap();

    assert!(MonitorConfig::load(Some(file.path())).is_err());
}

#[test]
fn test_zero_concurrency_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"max_concurrent_roots = 0\n").unwrap();

    let err = MonitorConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("max_concurrent_roots"));
}

#[test]
fn test_missing_config_file_is_an_error() {
    let result = MonitorConfig::load(Some(std::path::Path::new("/nonexistent/storagepulse.toml")));
    assert!(result.is_err());
}

#[test]
fn test_models_serialize_to_json() {
    let root = MonitoredRoot::new("/data");
    let json = serde_json::to_value(&root).unwrap();
    assert_eq!(json["path"], "/data");
    assert!(json["last_scan"].is_null());

    let scope = ScanScope::Root(RootId::from("abc"));
    let json = serde_json::to_value(&scope).unwrap();
    assert_eq!(json["scope"], "root");
    assert_eq!(json["root_id"], "abc");

    let snapshot = UsageSnapshot {
        id: 1,
        root_id: RootId::from("abc"),
        timestamp: Utc::now(),
        used_bytes: 200,
        free_bytes: 0,
    };
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["used_bytes"], 200);
}

#[test]
fn test_record_and_group_round_trip_fields() {
    let rec = FileRecord::new("/data/sub/a.txt", 100, Utc::now(), "/data", ScanToken(7));
    assert_eq!(rec.name, "a.txt");
    assert_eq!(rec.file_type, ".txt");
    assert_eq!(rec.root_path, PathBuf::from("/data"));

    let group = DuplicateGroup {
        name: rec.name.clone(),
        size: rec.size,
        paths: vec![PathBuf::from("/data/a.txt"), rec.path.clone()],
    };
    assert_eq!(group.wasted_bytes(), 100);
}
