//! Error types for monitoring operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::root::RootId;

/// Errors surfaced by the monitoring engine's operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A candidate or existing root fails read, directory or listing checks.
    #[error("Path is not accessible: {path}: {reason}")]
    NotAccessible { path: PathBuf, reason: String },

    /// The path is already a monitored root.
    #[error("Folder is already being monitored: {path}")]
    AlreadyMonitored { path: PathBuf },

    /// No monitored root has this identifier.
    #[error("Root not found: {id}")]
    NotFound { id: RootId },

    /// Another scan cycle is running.
    #[error("Scan already in progress")]
    ScanAlreadyInProgress,

    /// The aggregation store cannot be reached.
    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// A root's change subscription could not be established.
    #[error("Watch subscription failed for {path}: {message}")]
    WatchSubscriptionFailed { path: PathBuf, message: String },

    /// A scan cycle task ended without producing a report.
    #[error("Scan cycle aborted: {message}")]
    CycleAborted { message: String },

    /// The monitor could not be configured.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl MonitorError {
    /// Create a `NotAccessible` error from an I/O failure.
    pub fn not_accessible(path: impl Into<PathBuf>, source: &std::io::Error) -> Self {
        Self::NotAccessible {
            path: path.into(),
            reason: source.to_string(),
        }
    }
}

/// Errors reported by an [`AggregationStore`](crate::AggregationStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached or failed to execute a request.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// A uniqueness constraint was violated.
    #[error("store conflict: {message}")]
    Conflict { message: String },

    /// Stored data could not be decoded.
    #[error("corrupt store data: {message}")]
    Corrupt { message: String },
}

impl StoreError {
    /// Create an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Whether the failure means the store itself could not be used.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<StoreError> for MonitorError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable {
            message: err.to_string(),
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// Error listing a directory.
    ReadError,
    /// Error reading metadata.
    MetadataError,
}

/// Non-fatal problem encountered during a scan.
///
/// The affected entry contributes nothing to the totals; siblings and other
/// roots are unaffected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a permission denied warning.
    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            message: format!("Permission denied: {}", path.display()),
            path,
            kind: WarningKind::PermissionDenied,
        }
    }

    /// Classify an I/O failure on `path`.
    ///
    /// Permission errors become [`WarningKind::PermissionDenied`]; anything
    /// else takes `fallback`.
    pub fn from_io(path: impl Into<PathBuf>, error: &std::io::Error, fallback: WarningKind) -> Self {
        let path = path.into();
        if error.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::permission_denied(path);
        }
        Self {
            message: format!("Error scanning {}: {error}", path.display()),
            path,
            kind: fallback,
        }
    }
}
