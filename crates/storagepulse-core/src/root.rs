//! Monitored root types.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque unique identifier of a monitored root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootId(String);

impl RootId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing identifier (e.g. one loaded from the store).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RootId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// An operator-designated directory under monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredRoot {
    /// Unique identifier.
    pub id: RootId,
    /// Absolute, canonical path of the root directory.
    pub path: PathBuf,
    /// Total size in bytes from the most recent completed scan.
    pub size: u64,
    /// Number of regular files from the most recent completed scan.
    pub items: u64,
    /// When the most recent scan of this root completed.
    pub last_scan: Option<DateTime<Utc>>,
    /// When the root was added to monitoring.
    pub added_at: DateTime<Utc>,
}

impl MonitoredRoot {
    /// Create a root that has not been scanned yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            id: RootId::generate(),
            path: path.into(),
            size: 0,
            items: 0,
            last_scan: None,
            added_at: Utc::now(),
        }
    }

    /// Whether at least one scan of this root has completed.
    pub fn is_scanned(&self) -> bool {
        self.last_scan.is_some()
    }
}

/// Which roots a scan cycle covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "root_id")]
pub enum ScanScope {
    /// Every monitored root (periodic and operator-triggered cycles).
    AllRoots,
    /// A single root (change-triggered cycles).
    Root(RootId),
}

impl fmt::Display for ScanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanScope::AllRoots => f.write_str("all roots"),
            ScanScope::Root(id) => write!(f, "root {id}"),
        }
    }
}

/// Identifies one scan of one root.
///
/// Every file record touched by a scan is stamped with its token; records of
/// the root still carrying an older token after the scan completes are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanToken(pub i64);

impl ScanToken {
    /// Create a token from the current wall clock.
    ///
    /// Tokens issued by one process are strictly increasing.
    pub fn now() -> Self {
        static LAST: AtomicI64 = AtomicI64::new(0);

        let now = Utc::now().timestamp_micros();
        let prev = LAST
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        Self(now.max(prev + 1))
    }
}
