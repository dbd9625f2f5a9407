//! Scanning engine for storagepulse.
//!
//! This crate walks monitored roots and persists what it finds through an
//! [`AggregationStore`](storagepulse_core::AggregationStore):
//!
//! - **Path validation** before a root is accepted into monitoring
//! - **Sequential recursive walk** per root, tolerant of per-entry failures
//! - **Incremental record upserts** in bounded batches
//! - **Atomic publication** of a root's totals and usage snapshot
//!
//! # Example
//!
//! ```rust,no_run
//! use storagepulse_core::{MonitoredRoot, ScanToken};
//! use storagepulse_scan::{PathValidator, ScanEngine, SilentObserver};
//! # fn demo(store: &dyn storagepulse_core::AggregationStore) {
//! let path = PathValidator::new().validate("/data").unwrap();
//! let root = MonitoredRoot::new(path);
//! let report = ScanEngine::new()
//!     .scan_root(&root, ScanToken::now(), store, &SilentObserver)
//!     .unwrap();
//!
//! println!("{} files, {} bytes", report.items, report.size);
//! # }
//! ```

mod progress;
mod scanner;
mod space;
mod validator;

pub use progress::{ScanObserver, ScanProgress, SilentObserver};
pub use scanner::{RootScanReport, ScanEngine};
pub use space::free_space;
pub use validator::PathValidator;

// Re-export core types for convenience
pub use storagepulse_core::{FileRecord, MonitoredRoot, ScanToken, ScanWarning, WarningKind};
