//! Per-file records, usage snapshots and derived aggregates.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::root::{RootId, ScanToken};

/// Type classification for files without an extension.
pub const UNKNOWN_FILE_TYPE: &str = "unknown";

/// A regular file encountered during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path (unique key).
    pub path: PathBuf,
    /// File name (last path component).
    pub name: CompactString,
    /// Size in bytes.
    pub size: u64,
    /// Lower-cased extension including the dot, or [`UNKNOWN_FILE_TYPE`].
    pub file_type: CompactString,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Path of the monitored root that owns this file.
    pub root_path: PathBuf,
    /// Scan that last touched this record.
    pub scan_token: ScanToken,
}

impl FileRecord {
    /// Build a record for `path`, deriving its name and type classification.
    pub fn new(
        path: impl Into<PathBuf>,
        size: u64,
        modified: DateTime<Utc>,
        root_path: impl Into<PathBuf>,
        scan_token: ScanToken,
    ) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| CompactString::new(n.to_string_lossy()))
            .unwrap_or_default();
        let file_type = classify(&path);

        Self {
            path,
            name,
            size,
            file_type,
            modified,
            root_path: root_path.into(),
            scan_token,
        }
    }
}

/// Classify a file by its extension.
fn classify(path: &Path) -> CompactString {
    match path.extension() {
        Some(ext) if !ext.is_empty() => {
            let mut file_type = CompactString::new(".");
            file_type.push_str(&ext.to_string_lossy().to_lowercase());
            file_type
        }
        _ => CompactString::new(UNKNOWN_FILE_TYPE),
    }
}

/// One point in the usage history of a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Monotonic sequence number assigned by the store.
    pub id: i64,
    /// Root the snapshot was taken for.
    pub root_id: RootId,
    /// When the scan producing this snapshot completed.
    pub timestamp: DateTime<Utc>,
    /// Bytes used under the root.
    pub used_bytes: u64,
    /// Free bytes on the root's device (0 when unavailable).
    pub free_bytes: u64,
}

/// Files sharing the same name and size under different paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Shared file name.
    pub name: CompactString,
    /// Shared size in bytes.
    pub size: u64,
    /// Distinct paths, sorted.
    pub paths: Vec<PathBuf>,
}

impl DuplicateGroup {
    /// Number of files in the group.
    pub fn count(&self) -> usize {
        self.paths.len()
    }

    /// Space that would be reclaimed by keeping a single copy.
    pub fn wasted_bytes(&self) -> u64 {
        self.size * self.paths.len().saturating_sub(1) as u64
    }
}

/// Aggregate usage for one file type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTypeStats {
    /// Type classification (extension or `unknown`).
    pub file_type: CompactString,
    /// Sum of file sizes.
    pub total_size: u64,
    /// Number of files.
    pub count: u64,
}

/// Everything published when a root scan completes.
///
/// The store applies a commit atomically: readers see the new totals and the
/// new snapshot together, and stale records of the root disappear in the same
/// step.
#[derive(Debug, Clone)]
pub struct RootScanCommit {
    /// Root that was scanned.
    pub root_id: RootId,
    /// Root path (owner key of file records).
    pub root_path: PathBuf,
    /// Token the scan stamped on every record it touched.
    pub scan_token: ScanToken,
    /// Total bytes.
    pub size: u64,
    /// Regular file count.
    pub items: u64,
    /// Free bytes on the device, 0 when unavailable.
    pub free_bytes: u64,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> FileRecord {
        FileRecord::new(path, 10, Utc::now(), "/data", ScanToken(1))
    }

    #[test]
    fn test_record_derives_name_and_type() {
        let rec = record("/data/sub/Report.PDF");
        assert_eq!(rec.name, "Report.PDF");
        assert_eq!(rec.file_type, ".pdf");
    }

    #[test]
    fn test_record_without_extension_is_unknown() {
        assert_eq!(record("/data/Makefile").file_type, UNKNOWN_FILE_TYPE);
        assert_eq!(record("/data/.bashrc").file_type, UNKNOWN_FILE_TYPE);
    }

    #[test]
    fn test_wasted_bytes() {
        let group = DuplicateGroup {
            name: "a.txt".into(),
            size: 100,
            paths: vec!["/a/a.txt".into(), "/b/a.txt".into(), "/c/a.txt".into()],
        };
        assert_eq!(group.count(), 3);
        assert_eq!(group.wasted_bytes(), 200);
    }
}
