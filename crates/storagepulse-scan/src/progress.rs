//! Scan progress reporting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use storagepulse_core::ScanWarning;

/// Receives progress notifications from the scan engine.
///
/// Called from the blocking thread running a root's walk; several roots may
/// report concurrently. All methods default to no-ops.
pub trait ScanObserver: Send + Sync {
    /// A directory is about to be listed.
    fn on_directory(&self, _path: &Path) {}
    /// A regular file was counted.
    fn on_file(&self, _path: &Path, _size: u64) {}
    /// An entry was skipped because of an access failure.
    fn on_warning(&self, _warning: &ScanWarning) {}
}

/// Observer that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl ScanObserver for SilentObserver {}

/// Progress information during a scan cycle.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Number of files scanned so far.
    pub files_scanned: u64,
    /// Total bytes scanned so far.
    pub bytes_scanned: u64,
    /// Current path being scanned.
    pub current_path: PathBuf,
    /// Number of errors encountered.
    pub errors_count: u64,
    /// Time elapsed since the cycle started.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Create initial progress state.
    pub fn new() -> Self {
        Self {
            files_scanned: 0,
            bytes_scanned: 0,
            current_path: PathBuf::new(),
            errors_count: 0,
            elapsed: Duration::ZERO,
        }
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_starts_empty() {
        let progress = ScanProgress::default();
        assert_eq!(progress.files_scanned, 0);
        assert_eq!(progress.bytes_scanned, 0);
        assert_eq!(progress.elapsed, Duration::ZERO);
        assert!(progress.current_path.as_os_str().is_empty());
    }
}
