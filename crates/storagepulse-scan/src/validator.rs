//! Root path validation.

use std::path::{Path, PathBuf};

use storagepulse_core::MonitorError;

/// Checks that a candidate root is a readable, listable directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathValidator;

impl PathValidator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self
    }

    /// Validate `path` and return its canonical absolute form.
    ///
    /// Fails with [`MonitorError::NotAccessible`] when the path cannot be
    /// resolved, is not a directory, or cannot be listed.
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<PathBuf, MonitorError> {
        let path = path.as_ref();

        let canonical = path
            .canonicalize()
            .map_err(|e| MonitorError::not_accessible(path, &e))?;

        let metadata =
            std::fs::metadata(&canonical).map_err(|e| MonitorError::not_accessible(&canonical, &e))?;
        if !metadata.is_dir() {
            return Err(MonitorError::NotAccessible {
                path: canonical,
                reason: "Path is not a directory".to_string(),
            });
        }

        std::fs::read_dir(&canonical).map_err(|e| MonitorError::not_accessible(&canonical, &e))?;

        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_accepts_directory() {
        let temp = TempDir::new().unwrap();
        let validated = PathValidator::new().validate(temp.path()).unwrap();
        assert_eq!(validated, temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_rejects_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain.txt");
        fs::write(&file, "not a directory").unwrap();

        let err = PathValidator::new().validate(&file).unwrap_err();
        assert!(matches!(err, MonitorError::NotAccessible { .. }));
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_rejects_missing_path() {
        let temp = TempDir::new().unwrap();
        let err = PathValidator::new()
            .validate(temp.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, MonitorError::NotAccessible { .. }));
    }

    #[test]
    fn test_relative_path_is_made_absolute() {
        let validated = PathValidator::new().validate(".").unwrap();
        assert!(validated.is_absolute());
    }
}
