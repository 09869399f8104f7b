//! Staging directories for cross-device transfers
//!
//! The remote service writes into a private directory first; the session
//! promotes the result into the final path. Dropping a [`StagingDir`] removes
//! it along with anything left inside.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CopyError, Result};

/// Uniquely named directory under the staging root, removed on drop
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    /// Create a fresh directory below `root`
    pub fn create(root: &Path) -> Result<Self> {
        let path = root.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&path).map_err(|e| CopyError::local(&path, e))?;
        debug!(path = %path.display(), "staging directory created");
        Ok(Self { path })
    }

    /// Directory path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "staging directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staging directory {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_removed_on_drop() {
        let root = tempfile::TempDir::new().unwrap();
        let staging = StagingDir::create(root.path()).unwrap();
        let path = staging.path().to_path_buf();
        fs::write(path.join("partial.bin"), b"half").unwrap();
        assert!(path.is_dir());

        drop(staging);
        assert!(!path.exists());
    }

    #[test]
    fn test_staging_names_are_unique() {
        let root = tempfile::TempDir::new().unwrap();
        let a = StagingDir::create(root.path()).unwrap();
        let b = StagingDir::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_drop_after_external_removal_is_quiet() {
        let root = tempfile::TempDir::new().unwrap();
        let staging = StagingDir::create(root.path()).unwrap();
        fs::remove_dir_all(staging.path()).unwrap();
        drop(staging);
    }
}
