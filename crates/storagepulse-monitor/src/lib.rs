//! Monitoring engine for storagepulse.
//!
//! Ties the scanner, the duplicate detector and the store together:
//!
//! - [`ScanCoordinator`] runs single-flight scan cycles (periodic, on-demand
//!   and change-triggered) and tracks store health
//! - [`ChangeWatcher`] subscribes to filesystem changes per root and debounces
//!   them through a [`SettleBuffer`]
//! - [`StatusBoard`] owns the queryable [`ScanStatus`] and the recent log ring
//! - [`StorageMonitor`] is the facade over all of the above
//!
//! # Example
//!
//! ```rust,no_run
//! use storagepulse_core::{MonitorConfig, ScanScope};
//! use storagepulse_monitor::StorageMonitor;
//!
//! # async fn demo() -> Result<(), storagepulse_core::MonitorError> {
//! let monitor = StorageMonitor::open(MonitorConfig::default())?;
//! monitor.add_root("/data")?;
//! monitor.wait_idle().await;
//!
//! let report = monitor.request_scan(ScanScope::AllRoots)?.wait().await?;
//! println!("{} bytes in {} files", report.total_size(), report.total_items());
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod monitor;
mod status;
mod watcher;

pub use coordinator::{CycleHandle, CycleReport, ScanCoordinator};
pub use monitor::{StorageMonitor, StorageSummary};
pub use status::{Health, LogLevel, LogLine, ScanState, ScanStatus, StatusBoard};
pub use watcher::{ChangeWatcher, RescanSink, SettleBuffer, WatchFilter};

// Re-export core types for convenience
pub use storagepulse_core::{MonitorConfig, MonitorError, MonitoredRoot, RootId, ScanScope};
pub use storagepulse_scan::ScanProgress;
