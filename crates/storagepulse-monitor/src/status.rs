//! In-memory scan status and the recent log ring.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::broadcast;

use storagepulse_core::{ScanScope, ScanWarning};
use storagepulse_scan::{ScanObserver, ScanProgress};

/// Files between two progress broadcasts.
const PROGRESS_EVERY: u64 = 256;

/// Whether a scan cycle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Whether the aggregation store is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
}

/// Severity of a status log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One operator-visible log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Point-in-time copy of the monitor's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStatus {
    /// Idle or scanning.
    pub state: ScanState,
    /// Store health.
    pub health: Health,
    /// Scope of the current cycle, or of the last one when idle.
    pub scope: Option<ScanScope>,
    /// Files counted so far in the current (or last) cycle.
    pub scanned_items: u64,
    /// Bytes counted so far in the current (or last) cycle.
    pub scanned_bytes: u64,
    /// Directory being listed, while scanning.
    pub current_path: Option<PathBuf>,
    /// Errors of the in-progress or last cycle.
    pub errors: Vec<String>,
    /// Most recent log lines, oldest first.
    pub recent_logs: Vec<LogLine>,
    /// When the current (or last) cycle started.
    pub cycle_started_at: Option<DateTime<Utc>>,
    /// When the last cycle completed.
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl ScanStatus {
    /// Whether a cycle is running.
    pub fn is_scanning(&self) -> bool {
        self.state == ScanState::Scanning
    }
}

struct Inner {
    state: ScanState,
    health: Health,
    scope: Option<ScanScope>,
    scanned_items: u64,
    scanned_bytes: u64,
    current_path: Option<PathBuf>,
    errors: Vec<String>,
    logs: VecDeque<LogLine>,
    cycle_started_at: Option<DateTime<Utc>>,
    cycle_clock: Option<Instant>,
    last_completed_at: Option<DateTime<Utc>>,
}

/// Owner of the mutable scan status.
///
/// Written by the coordinator and, through [`ScanObserver`], by root scans
/// running on blocking threads. Readers get copies via [`snapshot`](Self::snapshot).
pub struct StatusBoard {
    inner: Mutex<Inner>,
    log_capacity: usize,
    progress_tx: broadcast::Sender<ScanProgress>,
}

impl StatusBoard {
    /// Create an idle, healthy board keeping `log_capacity` log lines.
    pub fn new(log_capacity: usize) -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            inner: Mutex::new(Inner {
                state: ScanState::Idle,
                health: Health::Healthy,
                scope: None,
                scanned_items: 0,
                scanned_bytes: 0,
                current_path: None,
                errors: Vec::new(),
                logs: VecDeque::with_capacity(log_capacity.min(1024)),
                cycle_started_at: None,
                cycle_clock: None,
                last_completed_at: None,
            }),
            log_capacity: log_capacity.max(1),
            progress_tx,
        }
    }

    /// Subscribe to progress snapshots broadcast during cycles.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Copy the current status.
    pub fn snapshot(&self) -> ScanStatus {
        let inner = self.inner.lock();
        ScanStatus {
            state: inner.state,
            health: inner.health,
            scope: inner.scope.clone(),
            scanned_items: inner.scanned_items,
            scanned_bytes: inner.scanned_bytes,
            current_path: inner.current_path.clone(),
            errors: inner.errors.clone(),
            recent_logs: inner.logs.iter().cloned().collect(),
            cycle_started_at: inner.cycle_started_at,
            last_completed_at: inner.last_completed_at,
        }
    }

    pub fn health(&self) -> Health {
        self.inner.lock().health
    }

    pub fn set_health(&self, health: Health) {
        self.inner.lock().health = health;
    }

    /// Enter the scanning state: counters reset, errors cleared, scope recorded.
    pub fn begin_cycle(&self, scope: &ScanScope) {
        {
            let mut inner = self.inner.lock();
            inner.state = ScanState::Scanning;
            inner.scope = Some(scope.clone());
            inner.scanned_items = 0;
            inner.scanned_bytes = 0;
            inner.current_path = None;
            inner.errors.clear();
            inner.cycle_started_at = Some(Utc::now());
            inner.cycle_clock = Some(Instant::now());
        }
        self.log(LogLevel::Info, format!("Starting scan of {scope}"));
    }

    /// Stamp completion and return to idle.
    pub fn end_cycle(&self, completed_at: DateTime<Utc>) {
        {
            let mut inner = self.inner.lock();
            inner.last_completed_at = Some(completed_at);
        }
        self.broadcast_progress();
        self.set_idle();
    }

    /// Return to idle without stamping completion.
    pub fn set_idle(&self) {
        let mut inner = self.inner.lock();
        inner.state = ScanState::Idle;
        inner.current_path = None;
    }

    /// Append an error to the current cycle's error list and the log.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.inner.lock().errors.push(message.clone());
        self.log(LogLevel::Error, message);
    }

    /// Append a line to the log ring and emit it through `tracing`.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }

        let mut inner = self.inner.lock();
        if inner.logs.len() == self.log_capacity {
            inner.logs.pop_front();
        }
        inner.logs.push_back(LogLine {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    fn broadcast_progress(&self) {
        if self.progress_tx.receiver_count() == 0 {
            return;
        }
        let progress = {
            let inner = self.inner.lock();
            ScanProgress {
                files_scanned: inner.scanned_items,
                bytes_scanned: inner.scanned_bytes,
                current_path: inner.current_path.clone().unwrap_or_default(),
                errors_count: inner.errors.len() as u64,
                elapsed: inner.cycle_clock.map(|c| c.elapsed()).unwrap_or_default(),
            }
        };
        let _ = self.progress_tx.send(progress);
    }
}

impl ScanObserver for StatusBoard {
    fn on_directory(&self, path: &Path) {
        self.inner.lock().current_path = Some(path.to_path_buf());
    }

    fn on_file(&self, _path: &Path, size: u64) {
        let scanned = {
            let mut inner = self.inner.lock();
            inner.scanned_items += 1;
            inner.scanned_bytes += size;
            inner.scanned_items
        };
        if scanned % PROGRESS_EVERY == 0 {
            self.broadcast_progress();
        }
    }

    fn on_warning(&self, warning: &ScanWarning) {
        self.record_error(warning.message.clone());
    }
}
