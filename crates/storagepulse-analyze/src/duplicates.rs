//! Duplicate file detection by name and size.
//!
//! Two records are duplicate candidates when they share a file name and a
//! byte size. Contents are never read.

use std::path::PathBuf;

use derive_builder::Builder;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use storagepulse_core::{AggregationStore, DuplicateGroup, FileRecord, StoreResult};

/// Configuration for duplicate detection.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct DuplicateConfig {
    /// Minimum file size to consider. Values below 1 are treated as 1.
    #[builder(default = "1")]
    pub min_size: u64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self { min_size: 1 }
    }
}

impl DuplicateConfig {
    /// Create a new config builder.
    pub fn builder() -> DuplicateConfigBuilder {
        DuplicateConfigBuilder::default()
    }
}

/// Results from duplicate analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateReport {
    /// Groups sorted by wasted space descending, then name.
    pub groups: Vec<DuplicateGroup>,

    /// Total size of all files that belong to a group.
    pub total_duplicate_size: u64,

    /// Total wasted space (could be reclaimed).
    pub total_wasted_space: u64,

    /// Number of records considered.
    pub files_analyzed: u64,

    /// Number of files that have duplicates.
    pub files_with_duplicates: u64,
}

impl DuplicateReport {
    /// Check if any duplicates were found.
    pub fn has_duplicates(&self) -> bool {
        !self.groups.is_empty()
    }

    /// Number of groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Groups file records sharing a name and size.
#[derive(Debug, Clone, Default)]
pub struct DuplicateDetector {
    config: DuplicateConfig,
}

impl DuplicateDetector {
    /// Create a detector with the default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detector with a custom config.
    pub fn with_config(config: DuplicateConfig) -> Self {
        Self { config }
    }

    /// Find duplicate groups among `records`.
    pub fn find_duplicates(&self, records: &[FileRecord]) -> DuplicateReport {
        let min_size = self.config.min_size.max(1);

        let candidates: Vec<&FileRecord> = records
            .iter()
            .filter(|r| r.size >= min_size)
            .collect();
        let files_analyzed = candidates.len() as u64;

        let mut groups: Vec<DuplicateGroup> = candidates
            .into_iter()
            .into_group_map_by(|r| (r.name.clone(), r.size))
            .into_iter()
            .filter_map(|((name, size), members)| {
                let paths: Vec<PathBuf> = members
                    .into_iter()
                    .map(|r| r.path.clone())
                    .sorted()
                    .dedup()
                    .collect();
                (paths.len() >= 2).then_some(DuplicateGroup { name, size, paths })
            })
            .collect();

        groups.sort_by(|a, b| {
            b.wasted_bytes()
                .cmp(&a.wasted_bytes())
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.size.cmp(&b.size))
        });

        let total_duplicate_size = groups.iter().map(|g| g.size * g.count() as u64).sum();
        let total_wasted_space = groups.iter().map(DuplicateGroup::wasted_bytes).sum();
        let files_with_duplicates = groups.iter().map(|g| g.count() as u64).sum();

        DuplicateReport {
            groups,
            total_duplicate_size,
            total_wasted_space,
            files_analyzed,
            files_with_duplicates,
        }
    }

    /// Recompute duplicate groups over the store's full record set and
    /// replace the stored groups with the result.
    pub fn run(&self, store: &dyn AggregationStore) -> StoreResult<DuplicateReport> {
        let records = store.file_records()?;
        let report = self.find_duplicates(&records);
        store.replace_duplicate_groups(&report.groups)?;
        tracing::debug!(
            "duplicate pass: {} groups over {} files, {} bytes wasted",
            report.group_count(),
            report.files_analyzed,
            report.total_wasted_space
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storagepulse_core::ScanToken;

    fn record(path: &str, size: u64) -> FileRecord {
        FileRecord::new(path, size, Default::default(), "/", ScanToken(1))
    }

    #[test]
    fn test_groups_by_name_and_size() {
        let records = vec![
            record("/a/report.pdf", 500),
            record("/b/report.pdf", 500),
            record("/c/report.pdf", 501),
            record("/d/other.pdf", 500),
        ];

        let report = DuplicateDetector::new().find_duplicates(&records);

        assert_eq!(report.group_count(), 1);
        let group = &report.groups[0];
        assert_eq!(group.name, "report.pdf");
        assert_eq!(group.size, 500);
        assert_eq!(
            group.paths,
            vec![PathBuf::from("/a/report.pdf"), PathBuf::from("/b/report.pdf")]
        );
        assert_eq!(report.total_wasted_space, 500);
        assert_eq!(report.files_with_duplicates, 2);
    }

    #[test]
    fn test_zero_byte_files_never_group() {
        let records = vec![record("/a/empty", 0), record("/b/empty", 0)];

        let config = DuplicateConfig::builder().min_size(0u64).build().unwrap();
        let report = DuplicateDetector::with_config(config).find_duplicates(&records);

        assert!(!report.has_duplicates());
    }

    #[test]
    fn test_same_path_twice_is_not_a_group() {
        let records = vec![record("/a/x.txt", 10), record("/a/x.txt", 10)];
        let report = DuplicateDetector::new().find_duplicates(&records);
        assert!(!report.has_duplicates());
    }

    #[test]
    fn test_groups_sorted_by_wasted_bytes_then_name() {
        let records = vec![
            record("/1/small.txt", 10),
            record("/2/small.txt", 10),
            record("/1/big.iso", 1000),
            record("/2/big.iso", 1000),
            record("/1/b.txt", 10),
            record("/2/b.txt", 10),
        ];

        let report = DuplicateDetector::new().find_duplicates(&records);
        let names: Vec<_> = report.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["big.iso", "b.txt", "small.txt"]);
    }
}
