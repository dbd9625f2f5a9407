//! Core types and traits for storagepulse.
//!
//! This crate holds the data model shared by every other crate in the
//! workspace: monitored roots, file records, usage snapshots and duplicate
//! groups, the [`AggregationStore`] contract the engine persists through,
//! the error taxonomy, and the monitor configuration.

mod config;
mod error;
mod record;
mod root;
mod store;

pub use config::{MonitorConfig, MonitorConfigBuilder};
pub use error::{ConfigError, MonitorError, ScanWarning, StoreError, WarningKind};
pub use record::{
    DuplicateGroup, FileRecord, FileTypeStats, RootScanCommit, UNKNOWN_FILE_TYPE, UsageSnapshot,
};
pub use root::{MonitoredRoot, RootId, ScanScope, ScanToken};
pub use store::{AggregationStore, StoreResult};
