//! Single-flight scan cycle orchestration.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use storagepulse_analyze::DuplicateDetector;
use storagepulse_core::{
    AggregationStore, MonitorError, MonitoredRoot, RootId, ScanScope, ScanToken, StoreError,
};
use storagepulse_scan::{RootScanReport, ScanEngine};

use crate::status::{Health, LogLevel, StatusBoard};
use crate::watcher::RescanSink;

/// Summary of one finished scan cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Roots the cycle covered.
    pub scope: ScanScope,
    /// Token stamped on every record written during the cycle.
    pub token: ScanToken,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
    /// Reports of roots that were scanned to completion.
    pub roots: Vec<RootScanReport>,
    /// Root and store errors, plus per-entry warnings.
    pub errors: Vec<String>,
    /// Number of duplicate groups stored, if the duplicate pass succeeded.
    pub duplicate_groups: Option<usize>,
    /// Whether the store could not be used at all during the cycle.
    pub store_failed: bool,
}

impl CycleReport {
    /// Total bytes across scanned roots.
    pub fn total_size(&self) -> u64 {
        self.roots.iter().map(|r| r.size).sum()
    }

    /// Total files across scanned roots.
    pub fn total_items(&self) -> u64 {
        self.roots.iter().map(|r| r.items).sum()
    }
}

/// Handle to a running scan cycle.
#[derive(Debug)]
pub struct CycleHandle {
    scope: ScanScope,
    task: JoinHandle<CycleReport>,
}

impl CycleHandle {
    /// Scope of the cycle.
    pub fn scope(&self) -> &ScanScope {
        &self.scope
    }

    /// Wait for the cycle to finish.
    pub async fn wait(self) -> Result<CycleReport, MonitorError> {
        self.task.await.map_err(|e| MonitorError::CycleAborted {
            message: e.to_string(),
        })
    }
}

struct Inner {
    store: Arc<dyn AggregationStore>,
    engine: ScanEngine,
    detector: DuplicateDetector,
    status: Arc<StatusBoard>,
    max_concurrent_roots: usize,
    failure_threshold: u32,
    scanning: AtomicBool,
    store_failures: AtomicU32,
    busy_tx: watch::Sender<bool>,
}

/// Runs scan cycles, at most one at a time.
///
/// Periodic, on-demand and change-triggered requests all go through
/// [`request_scan`](Self::request_scan); a request made while a cycle is in
/// flight is rejected, never queued.
#[derive(Clone)]
pub struct ScanCoordinator {
    inner: Arc<Inner>,
}

impl ScanCoordinator {
    pub fn new(
        store: Arc<dyn AggregationStore>,
        engine: ScanEngine,
        status: Arc<StatusBoard>,
        max_concurrent_roots: usize,
        failure_threshold: u32,
    ) -> Self {
        let (busy_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                engine,
                detector: DuplicateDetector::new(),
                status,
                max_concurrent_roots: max_concurrent_roots.max(1),
                failure_threshold: failure_threshold.max(1),
                scanning: AtomicBool::new(false),
                store_failures: AtomicU32::new(0),
                busy_tx,
            }),
        }
    }

    /// Start a scan cycle over `scope`.
    ///
    /// Must be called within a Tokio runtime. Fails with
    /// [`MonitorError::ScanAlreadyInProgress`] while another cycle runs,
    /// [`MonitorError::NotFound`] for an unknown root, and
    /// [`MonitorError::StoreUnavailable`] while the store is degraded and
    /// does not answer a ping. A rejected request leaves the status untouched.
    pub fn request_scan(&self, scope: ScanScope) -> Result<CycleHandle, MonitorError> {
        let inner = &self.inner;
        if inner
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("scan of {scope} rejected: cycle in progress");
            return Err(MonitorError::ScanAlreadyInProgress);
        }
        let guard = CycleGuard {
            inner: Arc::clone(inner),
        };

        if inner.status.health() == Health::Degraded {
            if let Err(e) = inner.store.ping() {
                tracing::warn!("scan of {scope} refused, store still unavailable: {e}");
                return Err(e.into());
            }
            inner.store_failures.store(0, Ordering::SeqCst);
            inner.status.set_health(Health::Healthy);
            inner
                .status
                .log(LogLevel::Info, "Store reachable again, health restored");
        }

        let target = match &scope {
            ScanScope::AllRoots => None,
            ScanScope::Root(id) => match inner.store.root(id)? {
                Some(root) => Some(root),
                None => return Err(MonitorError::NotFound { id: id.clone() }),
            },
        };

        inner.status.begin_cycle(&scope);
        inner.busy_tx.send_replace(true);

        let task = tokio::spawn(run_cycle(Arc::clone(inner), scope.clone(), target, guard));
        Ok(CycleHandle { scope, task })
    }

    /// Resolve once no cycle is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.busy_tx.subscribe();
        let _ = rx.wait_for(|busy| !busy).await;
    }

    /// Request a full cycle every `interval`, starting immediately, until
    /// `cancel` fires.
    pub async fn run_periodic(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.request_scan(ScanScope::AllRoots) {
                        Ok(_) => tracing::debug!("periodic cycle started"),
                        Err(MonitorError::ScanAlreadyInProgress) => {
                            tracing::debug!("periodic cycle skipped, scan in progress");
                        }
                        Err(e) => tracing::warn!("periodic cycle not started: {e}"),
                    }
                }
            }
        }
        tracing::debug!("periodic scheduler stopped");
    }
}

impl RescanSink for ScanCoordinator {
    fn request_rescan(&self, root: &RootId) -> Result<(), MonitorError> {
        self.request_scan(ScanScope::Root(root.clone())).map(|_| ())
    }

    fn on_watch_error(&self, path: &std::path::Path, message: &str) {
        self.inner.status.log(
            LogLevel::Warn,
            format!("Watch error on {}: {message}", path.display()),
        );
    }
}

/// Releases the single-flight flag when a cycle ends, even by panic.
struct CycleGuard {
    inner: Arc<Inner>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.inner.status.set_idle();
        self.inner.scanning.store(false, Ordering::SeqCst);
        self.inner.busy_tx.send_replace(false);
    }
}

async fn run_cycle(
    inner: Arc<Inner>,
    scope: ScanScope,
    target: Option<MonitoredRoot>,
    guard: CycleGuard,
) -> CycleReport {
    let clock = Instant::now();
    let started_at = Utc::now();
    let token = ScanToken::now();

    let mut roots_done = Vec::new();
    let mut errors = Vec::new();
    let mut store_errors = 0usize;
    let mut duplicate_groups = None;

    let roots = match target {
        Some(root) => Ok(vec![root]),
        None => {
            let store = Arc::clone(&inner.store);
            blocking(move || store.roots()).await
        }
    };

    let store_failed = match roots {
        Ok(roots) => {
            scan_roots(&inner, roots, token, &mut roots_done, &mut errors, &mut store_errors).await;

            let detector = inner.detector.clone();
            let store = Arc::clone(&inner.store);
            match blocking(move || detector.run(store.as_ref())).await {
                Ok(report) => duplicate_groups = Some(report.group_count()),
                Err(e) => {
                    let message = format!("Duplicate detection failed: {e}");
                    inner.status.record_error(message.clone());
                    errors.push(message);
                    store_errors += 1;
                }
            }

            // Every root and the duplicate pass hit the store and failed.
            store_errors > 0 && roots_done.is_empty() && duplicate_groups.is_none()
        }
        Err(e) => {
            let message = format!("Failed to list monitored roots: {e}");
            inner.status.record_error(message.clone());
            errors.push(message);
            true
        }
    };
    update_health(&inner, store_failed);

    for report in &roots_done {
        errors.extend(report.warnings.iter().map(|w| w.message.clone()));
    }

    let completed_at = Utc::now();
    inner.status.log(
        LogLevel::Info,
        format!(
            "Scan of {scope} finished: {} roots, {} errors, {:.1}s",
            roots_done.len(),
            errors.len(),
            clock.elapsed().as_secs_f64()
        ),
    );
    inner.status.end_cycle(completed_at);
    drop(guard);

    CycleReport {
        scope,
        token,
        started_at,
        completed_at,
        duration: clock.elapsed(),
        roots: roots_done,
        errors,
        duplicate_groups,
        store_failed,
    }
}

/// Scan `roots` on the blocking pool, at most `max_concurrent_roots` at once.
async fn scan_roots(
    inner: &Arc<Inner>,
    roots: Vec<MonitoredRoot>,
    token: ScanToken,
    done: &mut Vec<RootScanReport>,
    errors: &mut Vec<String>,
    store_errors: &mut usize,
) {
    let semaphore = Arc::new(Semaphore::new(inner.max_concurrent_roots));
    let mut set: JoinSet<(PathBuf, Result<RootScanReport, StoreError>)> = JoinSet::new();

    for root in roots {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let inner = Arc::clone(inner);
        inner.status.log(
            LogLevel::Info,
            format!("Scanning {}", root.path.display()),
        );
        set.spawn_blocking(move || {
            let _permit = permit;
            let result =
                inner
                    .engine
                    .scan_root(&root, token, inner.store.as_ref(), inner.status.as_ref());
            (root.path, result)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((_, Ok(report))) => {
                if report.committed {
                    inner.status.log(
                        LogLevel::Info,
                        format!(
                            "Scanned {}: {} items, {} bytes",
                            report.root_path.display(),
                            report.items,
                            report.size
                        ),
                    );
                }
                done.push(report);
            }
            Ok((path, Err(e))) => {
                let message = format!("Error scanning {}: {e}", path.display());
                inner.status.record_error(message.clone());
                errors.push(message);
                *store_errors += 1;
            }
            Err(e) => {
                let message = format!("Root scan task failed: {e}");
                inner.status.record_error(message.clone());
                errors.push(message);
            }
        }
    }
}

fn update_health(inner: &Inner, store_failed: bool) {
    if !store_failed {
        inner.store_failures.store(0, Ordering::SeqCst);
        return;
    }

    let failures = inner.store_failures.fetch_add(1, Ordering::SeqCst) + 1;
    if failures >= inner.failure_threshold && inner.status.health() == Health::Healthy {
        inner.status.set_health(Health::Degraded);
        inner.status.log(
            LogLevel::Error,
            format!("Store failed in {failures} consecutive cycles, health degraded"),
        );
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::unavailable(format!("store task failed: {e}")))?
}
