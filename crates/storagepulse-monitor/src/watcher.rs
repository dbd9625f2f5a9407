//! Filesystem change subscriptions and settle-window debouncing.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use globset::GlobSet;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use storagepulse_core::{MonitorError, MonitoredRoot, RootId};

/// Receiver of rescan requests released by the settle buffer.
pub trait RescanSink: Send + Sync {
    /// Start a rescan of `root`.
    ///
    /// [`MonitorError::ScanAlreadyInProgress`] defers the root; any other
    /// error drops it.
    fn request_rescan(&self, root: &RootId) -> Result<(), MonitorError>;

    /// A watch reported an error for `path`.
    fn on_watch_error(&self, _path: &Path, _message: &str) {}
}

/// Coalesces change signals per root.
///
/// A root becomes ready once no signal arrived for `settle_window`, or once
/// it has been pending for `max_delay` under continuous churn. Each root has
/// at most one pending entry.
#[derive(Debug)]
pub struct SettleBuffer {
    settle_window: Duration,
    max_delay: Duration,
    pending: HashMap<RootId, Pending>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    first: Instant,
    last: Instant,
}

impl Pending {
    fn deadline(&self, settle_window: Duration, max_delay: Duration) -> Instant {
        (self.last + settle_window).min(self.first + max_delay)
    }
}

impl SettleBuffer {
    pub fn new(settle_window: Duration, max_delay: Duration) -> Self {
        Self {
            settle_window,
            max_delay: max_delay.max(settle_window),
            pending: HashMap::new(),
        }
    }

    /// Record a change signal for `root` at `now`.
    pub fn record(&mut self, root: RootId, now: Instant) {
        self.pending
            .entry(root)
            .and_modify(|p| p.last = now)
            .or_insert(Pending {
                first: now,
                last: now,
            });
    }

    /// Put a root whose rescan was refused back into the buffer, restarting
    /// its settle window.
    pub fn defer(&mut self, root: RootId, now: Instant) {
        self.pending.insert(
            root,
            Pending {
                first: now,
                last: now,
            },
        );
    }

    /// Forget a root.
    pub fn remove(&mut self, root: &RootId) {
        self.pending.remove(root);
    }

    /// Earliest instant at which some root becomes ready.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|p| p.deadline(self.settle_window, self.max_delay))
            .min()
    }

    /// Remove and return every root ready at `now`, ordered by id.
    pub fn take_ready(&mut self, now: Instant) -> Vec<RootId> {
        let (settle_window, max_delay) = (self.settle_window, self.max_delay);
        let mut ready: Vec<RootId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline(settle_window, max_delay) <= now)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort();
        for id in &ready {
            self.pending.remove(id);
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Paths whose changes never trigger a rescan.
///
/// Covers entries matching the scanner's exclude patterns (any component
/// below the root) and the monitor's own database files, whose writes during
/// a cycle would otherwise schedule the next one.
#[derive(Debug, Clone, Default)]
pub struct WatchFilter {
    excludes: GlobSet,
    ignored_files: HashSet<PathBuf>,
}

impl WatchFilter {
    pub fn new(excludes: GlobSet) -> Self {
        Self {
            excludes,
            ignored_files: HashSet::new(),
        }
    }

    /// Ignore the SQLite database at `path` along with its journal files.
    pub fn ignore_database(mut self, path: &Path) -> Self {
        let path = absolute_path(path);
        let Some(name) = path.file_name().map(|n| n.to_os_string()) else {
            return self;
        };
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut file_name = name.clone();
            file_name.push(suffix);
            self.ignored_files.insert(path.with_file_name(file_name));
        }
        self
    }

    /// Whether a change at `path` below `root` is ignored.
    pub fn is_ignored(&self, root: &Path, path: &Path) -> bool {
        if self.ignored_files.contains(path) {
            return true;
        }
        if self.excludes.is_empty() {
            return false;
        }
        path.strip_prefix(root)
            .unwrap_or(path)
            .components()
            .any(|c| matches!(c, Component::Normal(name) if self.excludes.is_match(name)))
    }
}

/// Resolve `path` against the current directory, canonicalizing its parent.
fn absolute_path(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (std::fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// A raw notification tagged with the root whose watcher produced it.
struct WatchSignal {
    root: RootId,
    event: notify::Result<Event>,
}

struct RootWatch {
    watcher: RecommendedWatcher,
    path: PathBuf,
    /// `false` when directories are watched one by one.
    recursive: bool,
    excluded: HashSet<PathBuf>,
}

impl RootWatch {
    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|ex| path.starts_with(ex))
    }
}

/// Per-root change subscriptions.
///
/// A root is watched recursively when the platform allows it. If some
/// directory below it cannot be watched, each readable directory gets its
/// own subscription instead and the failing ones are excluded. Notifications
/// are delivered to [`run`](Self::run), which debounces them through a
/// [`SettleBuffer`] and hands released roots to a [`RescanSink`].
pub struct ChangeWatcher {
    filter: WatchFilter,
    watches: Mutex<HashMap<RootId, RootWatch>>,
    tx: mpsc::UnboundedSender<WatchSignal>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<WatchSignal>>>,
}

impl ChangeWatcher {
    pub fn new() -> Self {
        Self::with_filter(WatchFilter::default())
    }

    /// Create a watcher that drops changes matched by `filter`.
    pub fn with_filter(filter: WatchFilter) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            filter,
            watches: Mutex::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Subscribe to changes under `root`. Replaces an existing subscription.
    ///
    /// Fails only when the root directory itself cannot be watched.
    pub fn watch(&self, root: &MonitoredRoot) -> Result<(), MonitorError> {
        let subscription_failed = |e: notify::Error| MonitorError::WatchSubscriptionFailed {
            path: root.path.clone(),
            message: e.to_string(),
        };

        let mut watcher = self.new_watcher(&root.id).map_err(subscription_failed)?;
        let mut excluded = HashSet::new();
        let recursive = match watcher.watch(&root.path, RecursiveMode::Recursive) {
            Ok(()) => true,
            Err(err) if !err.paths.is_empty() => {
                tracing::debug!(
                    "recursive watch of {} failed ({err}), watching directories one by one",
                    root.path.display()
                );
                watcher = self.new_watcher(&root.id).map_err(subscription_failed)?;
                watcher
                    .watch(&root.path, RecursiveMode::NonRecursive)
                    .map_err(subscription_failed)?;
                watch_entries(
                    &mut watcher,
                    &self.filter,
                    &root.path,
                    &root.path,
                    &mut excluded,
                );
                false
            }
            Err(err) => return Err(subscription_failed(err)),
        };

        tracing::debug!("watching {}", root.path.display());
        self.watches.lock().insert(
            root.id.clone(),
            RootWatch {
                watcher,
                path: root.path.clone(),
                recursive,
                excluded,
            },
        );
        Ok(())
    }

    /// Drop the subscription for `root`. Returns `false` if there was none.
    pub fn unwatch(&self, root: &RootId) -> bool {
        self.watches.lock().remove(root).is_some()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.watches.lock().clear();
    }

    pub fn is_watching(&self, root: &RootId) -> bool {
        self.watches.lock().contains_key(root)
    }

    /// Paths excluded from `root`'s subscription, sorted.
    pub fn excluded_paths(&self, root: &RootId) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .watches
            .lock()
            .get(root)
            .map(|w| w.excluded.iter().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Debounce notifications and release rescans until `cancel` fires.
    ///
    /// Only one caller consumes notifications; a second concurrent call
    /// returns immediately.
    pub async fn run(
        &self,
        sink: &dyn RescanSink,
        settle_window: Duration,
        max_delay: Duration,
        cancel: CancellationToken,
    ) {
        let Some(mut rx) = self.rx.lock().take() else {
            tracing::warn!("change watcher is already running");
            return;
        };
        let mut buffer = SettleBuffer::new(settle_window, max_delay);

        loop {
            let deadline = buffer.next_deadline();
            let settle = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = rx.recv() => match signal {
                    Some(signal) => self.accept(signal, &mut buffer, sink),
                    None => break,
                },
                _ = settle => self.release(&mut buffer, sink),
            }
        }

        *self.rx.lock() = Some(rx);
        tracing::debug!("change watcher stopped");
    }

    fn new_watcher(&self, root: &RootId) -> notify::Result<RecommendedWatcher> {
        let tx = self.tx.clone();
        let root = root.clone();
        notify::recommended_watcher(move |event| {
            let _ = tx.send(WatchSignal {
                root: root.clone(),
                event,
            });
        })
    }

    fn accept(&self, signal: WatchSignal, buffer: &mut SettleBuffer, sink: &dyn RescanSink) {
        let mut watches = self.watches.lock();
        let Some(watch) = watches.get_mut(&signal.root) else {
            // Late notification for a root that is no longer watched.
            buffer.remove(&signal.root);
            return;
        };

        match signal.event {
            Ok(event) => {
                if !is_change(&event.kind) {
                    return;
                }
                if !watch.recursive && matches!(event.kind, EventKind::Create(_)) {
                    for path in &event.paths {
                        let is_dir = std::fs::symlink_metadata(path).is_ok_and(|m| m.is_dir());
                        if is_dir
                            && !watch.is_excluded(path)
                            && !self.filter.is_ignored(&watch.path, path)
                        {
                            watch_tree(
                                &mut watch.watcher,
                                &self.filter,
                                &watch.path,
                                path,
                                &mut watch.excluded,
                            );
                        }
                    }
                }
                let relevant = event.paths.is_empty()
                    || event
                        .paths
                        .iter()
                        .any(|p| !watch.is_excluded(p) && !self.filter.is_ignored(&watch.path, p));
                if relevant {
                    buffer.record(signal.root, Instant::now());
                }
            }
            Err(err) => {
                let message = err.to_string();
                if err.paths.is_empty() {
                    tracing::warn!("watch error under {}: {message}", watch.path.display());
                    let path = watch.path.clone();
                    drop(watches);
                    sink.on_watch_error(&path, &message);
                    return;
                }
                let paths = err.paths.clone();
                watch.excluded.extend(paths.iter().cloned());
                drop(watches);
                for path in &paths {
                    tracing::warn!("excluding {} from watch: {message}", path.display());
                    sink.on_watch_error(path, &message);
                }
            }
        }
    }

    fn release(&self, buffer: &mut SettleBuffer, sink: &dyn RescanSink) {
        let now = Instant::now();
        for root in buffer.take_ready(now) {
            match sink.request_rescan(&root) {
                Ok(()) => tracing::debug!("change-triggered rescan of root {root}"),
                Err(MonitorError::ScanAlreadyInProgress) => {
                    tracing::debug!("rescan of root {root} deferred, scan in progress");
                    buffer.defer(root, now);
                }
                Err(e) => tracing::warn!("change-triggered rescan of root {root} dropped: {e}"),
            }
        }
    }
}

impl Default for ChangeWatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Watch `dir` on its own, then every directory below it. Directories that
/// cannot be watched or listed are added to `excluded`.
fn watch_tree(
    watcher: &mut RecommendedWatcher,
    filter: &WatchFilter,
    root: &Path,
    dir: &Path,
    excluded: &mut HashSet<PathBuf>,
) {
    if let Err(err) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        tracing::warn!("excluding {} from watch: {err}", dir.display());
        excluded.insert(dir.to_path_buf());
        return;
    }
    watch_entries(watcher, filter, root, dir, excluded);
}

fn watch_entries(
    watcher: &mut RecommendedWatcher,
    filter: &WatchFilter,
    root: &Path,
    dir: &Path,
    excluded: &mut HashSet<PathBuf>,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!("excluding {} from watch: {err}", dir.display());
            excluded.insert(dir.to_path_buf());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if entry.file_type().is_ok_and(|t| t.is_dir()) && !filter.is_ignored(root, &path) {
            watch_tree(watcher, filter, root, &path, excluded);
        }
    }
}

/// Create, modify and remove events count as changes; access does not.
fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use globset::{Glob, GlobSetBuilder};
    use notify::event::{AccessKind, CreateKind};
    use tempfile::TempDir;

    const SETTLE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_millis(1000);

    #[test]
    fn test_root_released_after_quiet_period() {
        let mut buffer = SettleBuffer::new(SETTLE, MAX);
        let t0 = Instant::now();
        let root = RootId::from("r1");

        buffer.record(root.clone(), t0);
        buffer.record(root.clone(), t0 + Duration::from_millis(50));

        assert_eq!(buffer.len(), 1);
        assert!(buffer.take_ready(t0 + Duration::from_millis(120)).is_empty());
        assert_eq!(buffer.next_deadline(), Some(t0 + Duration::from_millis(150)));
        assert_eq!(buffer.take_ready(t0 + Duration::from_millis(150)), vec![root]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_continuous_churn_is_bounded_by_max_delay() {
        let mut buffer = SettleBuffer::new(SETTLE, MAX);
        let t0 = Instant::now();
        let root = RootId::from("r1");

        let mut t = t0;
        while t < t0 + MAX {
            buffer.record(root.clone(), t);
            t += Duration::from_millis(50);
        }

        assert_eq!(buffer.next_deadline(), Some(t0 + MAX));
        assert_eq!(buffer.take_ready(t0 + MAX), vec![root]);
    }

    #[test]
    fn test_defer_restarts_window() {
        let mut buffer = SettleBuffer::new(SETTLE, MAX);
        let t0 = Instant::now();
        let root = RootId::from("r1");

        buffer.record(root.clone(), t0);
        let later = t0 + Duration::from_secs(5);
        let ready = buffer.take_ready(later);
        assert_eq!(ready.len(), 1);

        buffer.defer(root.clone(), later);
        buffer.defer(root.clone(), later);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.take_ready(later).is_empty());
        assert_eq!(buffer.take_ready(later + SETTLE), vec![root]);
    }

    #[test]
    fn test_roots_are_independent() {
        let mut buffer = SettleBuffer::new(SETTLE, MAX);
        let t0 = Instant::now();

        buffer.record(RootId::from("a"), t0);
        buffer.record(RootId::from("b"), t0 + Duration::from_millis(80));

        let ready = buffer.take_ready(t0 + Duration::from_millis(100));
        assert_eq!(ready, vec![RootId::from("a")]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_access_events_are_not_changes() {
        assert!(is_change(&EventKind::Create(CreateKind::File)));
        assert!(!is_change(&EventKind::Access(AccessKind::Any)));
        assert!(!is_change(&EventKind::Other));
    }

    fn exclude_set(patterns: &[&str]) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern).unwrap());
        }
        builder.build().unwrap()
    }

    fn create_event(path: PathBuf) -> notify::Result<Event> {
        Ok(Event::new(EventKind::Create(CreateKind::File)).add_path(path))
    }

    #[derive(Default)]
    struct RecordingSink {
        errors: Mutex<Vec<PathBuf>>,
    }

    impl RescanSink for RecordingSink {
        fn request_rescan(&self, _root: &RootId) -> Result<(), MonitorError> {
            Ok(())
        }

        fn on_watch_error(&self, path: &Path, _message: &str) {
            self.errors.lock().push(path.to_path_buf());
        }
    }

    fn watched_root(temp: &TempDir, watcher: &ChangeWatcher) -> Option<MonitoredRoot> {
        let root = MonitoredRoot::new(temp.path().canonicalize().unwrap());
        // Some environments cannot establish inotify watches.
        watcher.watch(&root).ok().map(|()| root)
    }

    #[test]
    fn test_filter_ignores_database_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let filter = WatchFilter::default().ignore_database(&temp.path().join("pulse.sqlite"));

        assert!(filter.is_ignored(&root, &root.join("pulse.sqlite")));
        assert!(filter.is_ignored(&root, &root.join("pulse.sqlite-wal")));
        assert!(filter.is_ignored(&root, &root.join("pulse.sqlite-shm")));
        assert!(filter.is_ignored(&root, &root.join("pulse.sqlite-journal")));
        assert!(!filter.is_ignored(&root, &root.join("pulse.sqlite.bak")));
        assert!(!filter.is_ignored(&root, &root.join("notes.txt")));
    }

    #[test]
    fn test_filter_applies_exclude_patterns_to_every_component() {
        let root = PathBuf::from("/data");
        let filter = WatchFilter::new(exclude_set(&["*.tmp", "node_modules"]));

        assert!(filter.is_ignored(&root, Path::new("/data/build.tmp")));
        assert!(filter.is_ignored(&root, Path::new("/data/web/node_modules/pkg/index.js")));
        assert!(!filter.is_ignored(&root, Path::new("/data/web/src/index.js")));
        // Components of the root path itself are not matched.
        assert!(!filter.is_ignored(Path::new("/x.tmp"), Path::new("/x.tmp/notes.txt")));
    }

    #[test]
    fn test_ignored_paths_do_not_schedule_rescans() {
        let temp = TempDir::new().unwrap();
        let filter = WatchFilter::new(exclude_set(&["*.tmp"]))
            .ignore_database(&temp.path().join("pulse.sqlite"));
        let watcher = ChangeWatcher::with_filter(filter);
        let Some(root) = watched_root(&temp, &watcher) else {
            return;
        };
        let sink = RecordingSink::default();
        let mut buffer = SettleBuffer::new(SETTLE, MAX);

        for name in ["pulse.sqlite", "pulse.sqlite-wal", "scratch.tmp"] {
            let signal = WatchSignal {
                root: root.id.clone(),
                event: create_event(root.path.join(name)),
            };
            watcher.accept(signal, &mut buffer, &sink);
        }
        assert!(buffer.is_empty());

        let signal = WatchSignal {
            root: root.id.clone(),
            event: create_event(root.path.join("notes.txt")),
        };
        watcher.accept(signal, &mut buffer, &sink);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_watch_error_excludes_paths() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("cache")).unwrap();
        let watcher = ChangeWatcher::new();
        let Some(root) = watched_root(&temp, &watcher) else {
            return;
        };
        let cache = root.path.join("cache");
        let sink = RecordingSink::default();
        let mut buffer = SettleBuffer::new(SETTLE, MAX);

        let signal = WatchSignal {
            root: root.id.clone(),
            event: Err(notify::Error::generic("watch limit reached").add_path(cache.clone())),
        };
        watcher.accept(signal, &mut buffer, &sink);

        assert_eq!(watcher.excluded_paths(&root.id), vec![cache.clone()]);
        assert_eq!(*sink.errors.lock(), vec![cache.clone()]);
        assert!(buffer.is_empty());

        let signal = WatchSignal {
            root: root.id.clone(),
            event: create_event(cache.join("entry.bin")),
        };
        watcher.accept(signal, &mut buffer, &sink);
        assert!(buffer.is_empty());

        let signal = WatchSignal {
            root: root.id.clone(),
            event: create_event(root.path.join("entry.bin")),
        };
        watcher.accept(signal, &mut buffer, &sink);
        assert_eq!(buffer.len(), 1);
        assert!(watcher.is_watching(&root.id));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unwatchable_directory_is_excluded() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "data").unwrap();
        fs::create_dir_all(temp.path().join("open/nested")).unwrap();
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can still read the directory.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let scratch = TempDir::new().unwrap();
        if watched_root(&scratch, &ChangeWatcher::new()).is_none() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let watcher = ChangeWatcher::new();
        let root = MonitoredRoot::new(temp.path().canonicalize().unwrap());
        let result = watcher.watch(&root);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        result.unwrap();

        assert!(watcher.is_watching(&root.id));
        assert_eq!(watcher.excluded_paths(&root.id), vec![root.path.join("locked")]);

        let sink = RecordingSink::default();
        let mut buffer = SettleBuffer::new(SETTLE, MAX);
        let signal = WatchSignal {
            root: root.id.clone(),
            event: create_event(root.path.join("open/nested/new.txt")),
        };
        watcher.accept(signal, &mut buffer, &sink);
        assert_eq!(buffer.len(), 1);
    }
}
