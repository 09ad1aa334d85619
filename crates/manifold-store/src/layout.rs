//! Download root layout.

use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;
use tracing::warn;

use crate::error::{StoreError, StoreResult};

/// Filesystem layout under the configured download root:
/// `store/` for content-addressed artifacts and `downloading/<task_id>/`
/// for the daemon's in-flight payloads.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    /// Wrap a download root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The download root itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/store`.
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    /// `<root>/downloading`.
    #[must_use]
    pub fn downloading_dir(&self) -> PathBuf {
        self.root.join("downloading")
    }

    /// The task-private directory the daemon writes into.
    #[must_use]
    pub fn task_download_dir(&self, task_id: i64) -> PathBuf {
        self.downloading_dir().join(task_id.to_string())
    }

    /// Final location for a content hash, fanned out on the first two hex
    /// characters.
    #[must_use]
    pub fn store_path_for(&self, content_hash: &str) -> PathBuf {
        let prefix = content_hash.get(..2).unwrap_or(content_hash);
        self.store_dir().join(prefix).join(content_hash)
    }

    /// Create the root and its fixed subdirectories. Inability to create
    /// the root is fatal to the process.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when any directory cannot be created.
    pub fn ensure(&self) -> StoreResult<()> {
        for dir in [self.root.clone(), self.store_dir(), self.downloading_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|source| StoreError::io("create_dir_all", dir.clone(), source))?;
        }
        Ok(())
    }

    /// Free bytes on the filesystem backing the download root.
    ///
    /// Failures report zero free space, which makes admission fail closed.
    #[must_use]
    pub fn machine_free(&self) -> u64 {
        match statvfs(&self.root) {
            Ok(stats) => {
                let fragment = u64::from(stats.fragment_size());
                u64::from(stats.blocks_available()).saturating_mul(fragment)
            }
            Err(error) => {
                warn!(%error, root = %self.root.display(), "statvfs failed");
                0
            }
        }
    }
}
