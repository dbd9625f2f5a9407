//! Sequential recursive scanner writing through an aggregation store.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};

use storagepulse_core::{
    AggregationStore, FileRecord, MonitoredRoot, RootId, RootScanCommit, ScanToken, ScanWarning,
    StoreError, WarningKind,
};

use crate::progress::ScanObserver;
use crate::space::free_space;

/// Default number of file records buffered before each store write.
pub const DEFAULT_BATCH_SIZE: usize = 512;

/// Outcome of scanning one root.
#[derive(Debug, Clone)]
pub struct RootScanReport {
    /// Root that was scanned.
    pub root_id: RootId,
    /// Root path.
    pub root_path: PathBuf,
    /// Total bytes of regular files.
    pub size: u64,
    /// Number of regular files.
    pub items: u64,
    /// Free bytes on the device (0 when unavailable).
    pub free_bytes: u64,
    /// Entries skipped because of access failures.
    pub warnings: Vec<ScanWarning>,
    /// `false` when the root was removed while it was being scanned.
    pub committed: bool,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
    /// Wall time spent on the root.
    pub duration: Duration,
}

/// Walks a root directory and persists its file records and totals.
#[derive(Debug, Clone)]
pub struct ScanEngine {
    batch_size: usize,
    excludes: GlobSet,
}

impl ScanEngine {
    /// Create an engine with the default batch size and no exclusions.
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            excludes: GlobSet::empty(),
        }
    }

    /// Set how many records are buffered before each store write.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Skip entries whose name matches any of `patterns`.
    pub fn with_exclude_patterns<S: AsRef<str>>(
        mut self,
        patterns: &[S],
    ) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            builder.add(Glob::new(pattern)?);
        }
        self.excludes = builder.build()?;
        Ok(self)
    }

    /// Compiled exclude patterns.
    pub fn excludes(&self) -> &GlobSet {
        &self.excludes
    }

    /// Whether an entry name is excluded from scanning.
    pub fn is_excluded(&self, name: &str) -> bool {
        !self.excludes.is_empty() && self.excludes.is_match(name)
    }

    /// Scan `root` and publish the result.
    ///
    /// Every record written is stamped with `token`; records of the root
    /// carrying another token are pruned by the final commit. Per-entry
    /// failures become warnings. A store failure aborts the scan and leaves
    /// the root's published totals unchanged.
    pub fn scan_root(
        &self,
        root: &MonitoredRoot,
        token: ScanToken,
        store: &dyn AggregationStore,
        observer: &dyn ScanObserver,
    ) -> Result<RootScanReport, StoreError> {
        let start = Instant::now();
        tracing::debug!("scanning root {} ({})", root.path.display(), root.id);

        let mut walk = Walk {
            engine: self,
            root_path: &root.path,
            token,
            store,
            observer,
            batch: Vec::with_capacity(self.batch_size),
            size: 0,
            items: 0,
            warnings: Vec::new(),
        };

        walk.visit_dir(&root.path)?;
        walk.flush()?;

        let Walk {
            size,
            items,
            warnings,
            ..
        } = walk;

        let free_bytes = free_space(&root.path);
        let completed_at = Utc::now();
        let commit = RootScanCommit {
            root_id: root.id.clone(),
            root_path: root.path.clone(),
            scan_token: token,
            size,
            items,
            free_bytes,
            completed_at,
        };
        let committed = store.commit_root_scan(&commit)?;
        if !committed {
            tracing::info!(
                "root {} was removed during its scan; results discarded",
                root.path.display()
            );
        }

        Ok(RootScanReport {
            root_id: root.id.clone(),
            root_path: root.path.clone(),
            size,
            items,
            free_bytes,
            warnings,
            committed,
            completed_at,
            duration: start.elapsed(),
        })
    }
}

impl Default for ScanEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one in-progress root walk.
struct Walk<'a> {
    engine: &'a ScanEngine,
    root_path: &'a Path,
    token: ScanToken,
    store: &'a dyn AggregationStore,
    observer: &'a dyn ScanObserver,
    batch: Vec<FileRecord>,
    size: u64,
    items: u64,
    warnings: Vec<ScanWarning>,
}

impl Walk<'_> {
    fn visit_dir(&mut self, dir: &Path) -> Result<(), StoreError> {
        self.observer.on_directory(dir);

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                self.warn(ScanWarning::from_io(dir, &err, WarningKind::ReadError));
                return Ok(());
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.warn(ScanWarning::from_io(dir, &err, WarningKind::ReadError));
                    continue;
                }
            };

            let path = entry.path();
            if self.engine.is_excluded(&entry.file_name().to_string_lossy()) {
                continue;
            }

            let metadata = match std::fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(err) => {
                    self.warn(ScanWarning::from_io(&path, &err, WarningKind::MetadataError));
                    continue;
                }
            };

            let file_type = metadata.file_type();
            if file_type.is_dir() {
                self.visit_dir(&path)?;
            } else if file_type.is_file() {
                self.record_file(path, &metadata)?;
            }
            // Symlinks and special files are neither followed nor counted.
        }

        Ok(())
    }

    fn record_file(&mut self, path: PathBuf, metadata: &Metadata) -> Result<(), StoreError> {
        let size = metadata.len();
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();

        self.size += size;
        self.items += 1;
        self.observer.on_file(&path, size);

        self.batch
            .push(FileRecord::new(path, size, modified, self.root_path, self.token));
        if self.batch.len() >= self.engine.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        self.store.upsert_file_records(&self.batch)?;
        self.batch.clear();
        Ok(())
    }

    fn warn(&mut self, warning: ScanWarning) {
        tracing::debug!("{}", warning.message);
        self.observer.on_warning(&warning);
        self.warnings.push(warning);
    }
}
