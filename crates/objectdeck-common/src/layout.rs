//! Data-directory layout
//!
//! One process owns one data directory:
//!
//! ```text
//! <dataDir>/
//!   metadata.db               relational metadata store
//!   encryption.marker         zero-byte file when a key is configured
//!   upload-sessions/<id>/...  staged upload content
//!   logs/<jobId>.log          per-job transfer logs
//!   locks/                    process-wide lockfile
//! ```

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Resolved paths inside the data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// Wrap an existing data directory path without touching the filesystem.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory tree, verifying the root is writable.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.upload_sessions_dir())?;
        fs::create_dir_all(self.logs_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        let probe = self.root.join(".write-probe");
        fs::write(&probe, b"")
            .map_err(|e| Error::internal(format!("data dir not writable: {e}")))?;
        fs::remove_file(&probe)?;
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn metadata_db(&self) -> PathBuf {
        self.root.join("metadata.db")
    }

    #[must_use]
    pub fn encryption_marker(&self) -> PathBuf {
        self.root.join("encryption.marker")
    }

    #[must_use]
    pub fn upload_sessions_dir(&self) -> PathBuf {
        self.root.join("upload-sessions")
    }

    /// Staging directory for one upload session.
    #[must_use]
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.upload_sessions_dir().join(session_id)
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Append log for one job.
    #[must_use]
    pub fn job_log(&self, job_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{job_id}.log"))
    }

    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    #[must_use]
    pub fn lockfile(&self) -> PathBuf {
        self.locks_dir().join("objectdeck.lock")
    }

    /// Write or remove the encryption marker to match whether a key is
    /// configured. The marker's absence is what allows plaintext legacy rows
    /// to pass through decryption unchanged.
    pub fn set_encryption_marker(&self, key_configured: bool) -> Result<()> {
        let marker = self.encryption_marker();
        if key_configured {
            fs::write(&marker, b"")?;
        } else if marker.exists() {
            fs::remove_file(&marker)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = DataLayout::new("/var/lib/objectdeck");
        assert_eq!(
            layout.metadata_db(),
            PathBuf::from("/var/lib/objectdeck/metadata.db")
        );
        assert_eq!(
            layout.job_log("abc"),
            PathBuf::from("/var/lib/objectdeck/logs/abc.log")
        );
        assert_eq!(
            layout.session_dir("s1"),
            PathBuf::from("/var/lib/objectdeck/upload-sessions/s1")
        );
    }

    #[test]
    fn test_ensure_and_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(tmp.path().join("data"));
        layout.ensure().unwrap();
        assert!(layout.upload_sessions_dir().is_dir());
        assert!(layout.logs_dir().is_dir());

        layout.set_encryption_marker(true).unwrap();
        assert!(layout.encryption_marker().exists());
        layout.set_encryption_marker(false).unwrap();
        assert!(!layout.encryption_marker().exists());
    }
}
