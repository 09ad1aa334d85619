//! Promotion, reference management, and sweeps.

use std::path::{Path, PathBuf};

use manifold_data::{Db, ReferenceDeletion, StoredFileRow, UserFileRow};
use tokio::task::spawn_blocking;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::layout::StoreLayout;

/// Content-addressed store service.
#[derive(Clone)]
pub struct ContentStore {
    layout: StoreLayout,
    db: Db,
}

impl ContentStore {
    /// Wire the store to its layout and catalog.
    #[must_use]
    pub const fn new(layout: StoreLayout, db: Db) -> Self {
        Self { layout, db }
    }

    /// The layout in use.
    #[must_use]
    pub const fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Promote a completed artifact into the store.
    ///
    /// Hashes the payload (on the blocking pool; SHA-256 over large trees
    /// is CPU-bound), dedups against the catalog, renames the source to
    /// its content address, and records the row. Concurrent promoters of
    /// the same content converge on one row and one on-disk tree;
    /// `ref_count` starts at zero and references are the caller's job.
    ///
    /// # Errors
    ///
    /// Returns an error when the source is missing, hashing fails, the
    /// rename fails, or the catalog write fails.
    pub async fn move_to_store(
        &self,
        source: &Path,
        original_name: &str,
    ) -> StoreResult<StoredFileRow> {
        if !source.exists() {
            return Err(StoreError::MissingSource {
                path: source.to_path_buf(),
            });
        }

        let hash_input = source.to_path_buf();
        let content_hash = spawn_blocking(move || manifold_hash::content_hash(&hash_input))
            .await
            .map_err(|source| StoreError::Join { source })??;

        let files = self.db.files();
        if let Some(existing) = files.find_by_hash(&content_hash).await? {
            info!(%content_hash, "content already stored, dropping duplicate payload");
            remove_path(source);
            return Ok(existing);
        }

        let size_input = source.to_path_buf();
        let (size, is_directory) = spawn_blocking(move || payload_size(&size_input))
            .await
            .map_err(|source| StoreError::Join { source })??;

        let destination = self.layout.store_path_for(&content_hash);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::io("create_dir_all", parent.to_path_buf(), source))?;
        }

        if destination.exists() {
            // A concurrent promoter won the rename; our copy is surplus.
            warn!(path = %destination.display(), "store path already exists");
            remove_path(source);
        } else {
            tokio::fs::rename(source, &destination)
                .await
                .map_err(|source_err| StoreError::io("rename", source.to_path_buf(), source_err))?;
            info!(from = %source.display(), to = %destination.display(), "artifact promoted");
        }

        let destination_str = destination.to_string_lossy();
        let (row, _inserted) = files
            .insert_or_get(
                &content_hash,
                &destination_str,
                i64::try_from(size).unwrap_or(i64::MAX),
                is_directory,
                original_name,
            )
            .await?;
        Ok(row)
    }

    /// Create a user reference to a stored artifact.
    ///
    /// Returns `None` when the user already references it; the catalog
    /// guarantees the reference count moves exactly once per distinct
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog transaction fails.
    pub async fn create_user_reference(
        &self,
        owner_id: i64,
        stored_file_id: i64,
        display_name: Option<&str>,
    ) -> StoreResult<Option<UserFileRow>> {
        Ok(self
            .db
            .files()
            .create_user_reference(owner_id, stored_file_id, display_name)
            .await?)
    }

    /// Delete a user reference; the last reference takes the artifact and
    /// its row with it.
    ///
    /// Returns `false` for the loser of a concurrent double delete.
    /// Filesystem removal failures are logged and never roll the catalog
    /// back; the orphaned tree is picked up by [`Self::sweep_unindexed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog transaction fails.
    pub async fn delete_user_reference(&self, user_file_id: i64) -> StoreResult<bool> {
        match self.db.files().delete_user_reference(user_file_id).await? {
            ReferenceDeletion::NotFound => Ok(false),
            ReferenceDeletion::Deleted => Ok(true),
            ReferenceDeletion::Orphaned(artifact) => {
                info!(
                    stored_file_id = artifact.stored_file_id,
                    path = %artifact.real_path,
                    "last reference dropped, removing artifact"
                );
                remove_path(Path::new(&artifact.real_path));
                Ok(true)
            }
        }
    }

    /// Delete zero-reference catalog rows and their trees.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub async fn sweep_zero_refs(&self) -> StoreResult<usize> {
        let files = self.db.files();
        let mut removed = 0_usize;
        for row in files.list_zero_ref().await? {
            if files.delete_stored(row.id).await? {
                remove_path(Path::new(&row.real_path));
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "swept zero-reference stored files");
        }
        Ok(removed)
    }

    /// Delete `store/**` trees with no matching catalog row.
    ///
    /// These appear when a removal failed mid-way or a process died
    /// between the rename and the insert.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub async fn sweep_unindexed(&self) -> StoreResult<usize> {
        let known: std::collections::HashSet<PathBuf> = self
            .db
            .files()
            .list_paths()
            .await?
            .into_iter()
            .map(PathBuf::from)
            .collect();

        let store_dir = self.layout.store_dir();
        let mut removed = 0_usize;
        // Entries live exactly two levels down: store/<hh>/<hash>.
        for entry in WalkDir::new(&store_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.into_path();
            if !known.contains(&path) {
                warn!(path = %path.display(), "removing unindexed store entry");
                remove_path(&path);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove a task's private download directory after a terminal
    /// transition.
    pub async fn cleanup_task_dir(&self, task_id: i64) {
        let dir = self.layout.task_download_dir(task_id);
        if !dir.exists() {
            return;
        }
        if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
            error!(path = %dir.display(), %err, "failed to clean task download directory");
        } else {
            info!(path = %dir.display(), "task download directory removed");
        }
    }
}

/// Size of a payload and whether it is a directory tree.
fn payload_size(path: &Path) -> StoreResult<(u64, bool)> {
    let metadata = std::fs::symlink_metadata(path)
        .map_err(|source| StoreError::io("metadata", path.to_path_buf(), source))?;
    if !metadata.is_dir() {
        return Ok((metadata.len(), false));
    }

    let mut total = 0_u64;
    for entry in WalkDir::new(path).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file() {
            total = total.saturating_add(entry.metadata().map(|m| m.len()).unwrap_or(0));
        }
    }
    Ok((total, true))
}

/// Best-effort recursive removal. Failures are logged; catalog state is
/// already committed and the sweep collects leftovers.
fn remove_path(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(err) = result {
        if err.kind() != std::io::ErrorKind::NotFound {
            error!(path = %path.display(), %err, "failed to remove path");
        }
    }
}
