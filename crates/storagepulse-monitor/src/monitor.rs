//! The monitoring facade.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use storagepulse_analyze::DuplicateDetector;
use storagepulse_core::{
    AggregationStore, ConfigError, DuplicateGroup, FileTypeStats, MonitorConfig, MonitorError,
    MonitoredRoot, RootId, ScanScope, StoreError, UsageSnapshot,
};
use storagepulse_scan::{PathValidator, ScanEngine, ScanProgress};
use storagepulse_store::SqliteStore;

use crate::coordinator::{CycleHandle, ScanCoordinator};
use crate::status::{LogLevel, ScanStatus, StatusBoard};
use crate::watcher::{ChangeWatcher, WatchFilter};

/// Totals across all monitored roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSummary {
    /// Number of monitored roots.
    pub root_count: usize,
    /// Sum of root sizes from their latest completed scans.
    pub total_bytes: u64,
    /// Sum of root file counts.
    pub total_items: u64,
    /// Most recent completed root scan.
    pub last_scan: Option<DateTime<Utc>>,
}

/// Disk usage monitor over a set of root directories.
///
/// Construction restores change subscriptions for every stored root.
/// Changes to the monitor's own database and to excluded entries never
/// trigger a rescan. The periodic timer and change-driven rescans only run
/// while [`run`](Self::run) is being awaited; on-demand scans work without
/// it. Methods that may start a cycle must be called within a Tokio runtime.
pub struct StorageMonitor {
    config: MonitorConfig,
    store: Arc<dyn AggregationStore>,
    validator: PathValidator,
    coordinator: ScanCoordinator,
    watcher: ChangeWatcher,
    status: Arc<StatusBoard>,
}

impl StorageMonitor {
    /// Open the SQLite database named by the config and build a monitor on it.
    pub fn open(config: MonitorConfig) -> Result<Self, MonitorError> {
        let store = SqliteStore::open(&config.database_path)?;
        Self::with_store(config, Arc::new(store))
    }

    /// Build a monitor over an existing store.
    pub fn with_store(
        config: MonitorConfig,
        store: Arc<dyn AggregationStore>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let engine = ScanEngine::new()
            .with_batch_size(config.record_batch_size)
            .with_exclude_patterns(&config.exclude_patterns)
            .map_err(|e| ConfigError::Invalid(format!("exclude pattern: {e}")))?;

        let filter =
            WatchFilter::new(engine.excludes().clone()).ignore_database(&config.database_path);
        let status = Arc::new(StatusBoard::new(config.log_capacity));
        let coordinator = ScanCoordinator::new(
            Arc::clone(&store),
            engine,
            Arc::clone(&status),
            config.max_concurrent_roots,
            config.store_failure_threshold,
        );

        let monitor = Self {
            config,
            store,
            validator: PathValidator::new(),
            coordinator,
            watcher: ChangeWatcher::with_filter(filter),
            status,
        };

        if monitor.config.watch_enabled {
            for root in monitor.store.roots()? {
                monitor.subscribe_root(&root);
            }
        }
        Ok(monitor)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start monitoring `path`.
    ///
    /// The path must be a readable, listable directory that is not already
    /// monitored. When `scan_on_add` is set and no cycle is running, a scan
    /// of the new root starts immediately.
    pub fn add_root(&self, path: impl AsRef<Path>) -> Result<RootId, MonitorError> {
        let path = self.validator.validate(path)?;

        if self.store.root_by_path(&path)?.is_some() {
            return Err(MonitorError::AlreadyMonitored { path });
        }
        let root = MonitoredRoot::new(path);
        match self.store.insert_root(&root) {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                return Err(MonitorError::AlreadyMonitored { path: root.path });
            }
            Err(e) => return Err(e.into()),
        }
        self.status.log(
            LogLevel::Info,
            format!("Added folder {}", root.path.display()),
        );

        if self.config.watch_enabled {
            self.subscribe_root(&root);
        }

        if self.config.scan_on_add {
            match self.coordinator.request_scan(ScanScope::Root(root.id.clone())) {
                Ok(_) => {}
                Err(MonitorError::ScanAlreadyInProgress) => self.status.log(
                    LogLevel::Info,
                    format!(
                        "Scan in progress, {} will be scanned in the next cycle",
                        root.path.display()
                    ),
                ),
                Err(e) => self.status.log(
                    LogLevel::Warn,
                    format!("Initial scan of {} not started: {e}", root.path.display()),
                ),
            }
        }

        Ok(root.id)
    }

    /// Stop monitoring a root, discarding its records and history.
    ///
    /// Duplicate groups are recomputed right away; a failure to do so is
    /// logged and left for the next cycle.
    pub fn remove_root(&self, id: &RootId) -> Result<(), MonitorError> {
        let root = self
            .store
            .root(id)?
            .ok_or_else(|| MonitorError::NotFound { id: id.clone() })?;
        if !self.store.delete_root(id)? {
            return Err(MonitorError::NotFound { id: id.clone() });
        }
        self.watcher.unwatch(id);
        self.status.log(
            LogLevel::Info,
            format!("Removed folder {}", root.path.display()),
        );

        if let Err(e) = DuplicateDetector::new().run(self.store.as_ref()) {
            self.status.log(
                LogLevel::Warn,
                format!("Duplicate groups not refreshed after removing a folder: {e}"),
            );
        }
        Ok(())
    }

    /// Start a scan cycle. See [`ScanCoordinator::request_scan`].
    pub fn request_scan(&self, scope: ScanScope) -> Result<CycleHandle, MonitorError> {
        self.coordinator.request_scan(scope)
    }

    pub fn status(&self) -> ScanStatus {
        self.status.snapshot()
    }

    /// All monitored roots, ordered by path.
    pub fn roots(&self) -> Result<Vec<MonitoredRoot>, MonitorError> {
        Ok(self.store.roots()?)
    }

    /// The latest `limit` usage snapshots, oldest first.
    pub fn usage_history(&self, limit: usize) -> Result<Vec<UsageSnapshot>, MonitorError> {
        Ok(self.store.usage_history(limit)?)
    }

    /// Usage per file type, largest total first.
    pub fn file_type_breakdown(&self) -> Result<Vec<FileTypeStats>, MonitorError> {
        Ok(self.store.file_type_breakdown()?)
    }

    pub fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>, MonitorError> {
        Ok(self.store.duplicate_groups()?)
    }

    /// Totals across all roots.
    pub fn storage_summary(&self) -> Result<StorageSummary, MonitorError> {
        let roots = self.store.roots()?;
        Ok(StorageSummary {
            root_count: roots.len(),
            total_bytes: roots.iter().map(|r| r.size).sum(),
            total_items: roots.iter().map(|r| r.items).sum(),
            last_scan: roots.iter().filter_map(|r| r.last_scan).max(),
        })
    }

    /// Remove every root, record, snapshot, duplicate group and subscription.
    pub fn reset_all(&self) -> Result<(), MonitorError> {
        self.store.reset()?;
        self.watcher.clear();
        self.status.log(LogLevel::Info, "All monitoring data cleared");
        Ok(())
    }

    /// Resolve once no scan cycle is in flight.
    pub async fn wait_idle(&self) {
        self.coordinator.wait_idle().await;
    }

    /// Progress snapshots broadcast during cycles.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.status.subscribe()
    }

    /// Whether `root` has a live change subscription.
    pub fn is_watching(&self, root: &RootId) -> bool {
        self.watcher.is_watching(root)
    }

    /// Drive the periodic timer and, when enabled, change-driven rescans
    /// until `cancel` fires. Returns once both have stopped.
    pub async fn run(&self, cancel: CancellationToken) {
        self.status.log(
            LogLevel::Info,
            format!(
                "Monitoring started, full scan every {}s",
                self.config.scan_interval_secs
            ),
        );

        let periodic = self
            .coordinator
            .run_periodic(self.config.scan_interval(), cancel.clone());

        if self.config.watch_enabled {
            let changes = self.watcher.run(
                &self.coordinator,
                self.config.settle_window(),
                self.config.max_settle_delay(),
                cancel.clone(),
            );
            tokio::join!(periodic, changes);
        } else {
            periodic.await;
        }

        self.status.log(LogLevel::Info, "Monitoring stopped");
    }

    fn subscribe_root(&self, root: &MonitoredRoot) {
        if let Err(e) = self.watcher.watch(root) {
            self.status.log(LogLevel::Warn, e.to_string());
        }
    }
}
