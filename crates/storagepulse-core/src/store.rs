//! The persistence contract the engine writes through.

use std::path::Path;

use crate::error::StoreError;
use crate::record::{DuplicateGroup, FileRecord, FileTypeStats, RootScanCommit, UsageSnapshot};
use crate::root::{MonitoredRoot, RootId};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable store of monitored roots, file records, usage history and
/// duplicate groups.
///
/// Implementations must be safe to call from several root scans at once.
/// Multi-row writes ([`commit_root_scan`](Self::commit_root_scan),
/// [`replace_duplicate_groups`](Self::replace_duplicate_groups),
/// [`delete_root`](Self::delete_root), [`reset`](Self::reset)) must be
/// atomic from a reader's point of view.
pub trait AggregationStore: Send + Sync {
    /// Cheap reachability check.
    fn ping(&self) -> StoreResult<()>;

    /// Insert a new root. Fails with [`StoreError::Conflict`] if the id or
    /// path is already present.
    fn insert_root(&self, root: &MonitoredRoot) -> StoreResult<()>;

    /// Look up a root by id.
    fn root(&self, id: &RootId) -> StoreResult<Option<MonitoredRoot>>;

    /// Look up a root by path.
    fn root_by_path(&self, path: &Path) -> StoreResult<Option<MonitoredRoot>>;

    /// All roots, ordered by path.
    fn roots(&self) -> StoreResult<Vec<MonitoredRoot>>;

    /// Delete a root together with its file records and usage history.
    /// Returns `false` if no such root existed.
    fn delete_root(&self, id: &RootId) -> StoreResult<bool>;

    /// Insert or replace file records keyed by path.
    fn upsert_file_records(&self, records: &[FileRecord]) -> StoreResult<()>;

    /// Publish a completed root scan: totals, snapshot and stale-record pruning.
    ///
    /// Returns `false` (and discards the root's records) when the root was
    /// removed while it was being scanned.
    fn commit_root_scan(&self, commit: &RootScanCommit) -> StoreResult<bool>;

    /// The full file record population.
    fn file_records(&self) -> StoreResult<Vec<FileRecord>>;

    /// Replace the stored duplicate groups wholesale.
    fn replace_duplicate_groups(&self, groups: &[DuplicateGroup]) -> StoreResult<()>;

    /// Stored duplicate groups, in the order they were written.
    fn duplicate_groups(&self) -> StoreResult<Vec<DuplicateGroup>>;

    /// The most recent `limit` snapshots, oldest first.
    fn usage_history(&self, limit: usize) -> StoreResult<Vec<UsageSnapshot>>;

    /// Size and count per file type, largest total first.
    fn file_type_breakdown(&self) -> StoreResult<Vec<FileTypeStats>>;

    /// Remove every root, record, snapshot and duplicate group.
    fn reset(&self) -> StoreResult<()>;
}
