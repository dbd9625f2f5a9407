//! Device free-space lookup.

use std::path::Path;

/// Free bytes on the device holding `path`.
///
/// Returns 0 when the figure is unavailable; callers store it as-is.
#[cfg(unix)]
pub fn free_space(path: &Path) -> u64 {
    match nix::sys::statvfs::statvfs(path) {
        Ok(stat) => (stat.blocks_free() as u64).saturating_mul(stat.fragment_size() as u64),
        Err(e) => {
            tracing::debug!("free space unavailable for {}: {}", path.display(), e);
            0
        }
    }
}

#[cfg(not(unix))]
pub fn free_space(_path: &Path) -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_path_reports_zero() {
        assert_eq!(free_space(Path::new("/nonexistent/storagepulse/missing")), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_root_reports_free_space() {
        let temp = tempfile::TempDir::new().unwrap();
        // A writable temp directory lives on a device with some free space.
        assert!(free_space(temp.path()) > 0);
    }
}
