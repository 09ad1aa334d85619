//! Content-addressed artifact rows and user references.
//!
//! The reference-count contract: a user's reference count equals the
//! number of distinct stored files they reference, each counted once.
//! Creation and deletion therefore run inside single transactions so the
//! counter and the reference rows can never drift.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DataError, Result, is_unique_violation};
use crate::model::{StoredFileRow, UserFileRow};

/// Artifact identity handed back when a deletion orphaned the stored row;
/// the caller owns removing the path from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Stored file surrogate key (already deleted).
    pub stored_file_id: i64,
    /// Absolute path to remove.
    pub real_path: String,
    /// Whether the path is a directory tree.
    pub is_directory: bool,
}

/// Outcome of deleting a user reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceDeletion {
    /// The reference was already gone; concurrent delete lost the race.
    NotFound,
    /// The reference was removed; other references keep the artifact alive.
    Deleted,
    /// The reference was removed and it was the last one; the stored row is
    /// gone and the artifact must be removed from disk.
    Orphaned(StoredArtifact),
}

/// Repository for `stored_files` and `user_files`.
#[derive(Clone)]
pub struct FileStore {
    pool: SqlitePool,
}

impl FileStore {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a stored-file row, or return the existing row for the same
    /// content hash. `ref_count` starts at zero either way; references are
    /// the caller's responsibility.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or re-query fails.
    pub async fn insert_or_get(
        &self,
        content_hash: &str,
        real_path: &str,
        size: i64,
        is_directory: bool,
        original_name: &str,
    ) -> Result<(StoredFileRow, bool)> {
        let inserted = sqlx::query_as::<_, StoredFileRow>(
            r"
            INSERT INTO stored_files
                (content_hash, real_path, size, is_directory, original_name, ref_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
            ON CONFLICT (content_hash) DO NOTHING
            RETURNING *
            ",
        )
        .bind(content_hash)
        .bind(real_path)
        .bind(size)
        .bind(is_directory)
        .bind(original_name)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await;

        match inserted {
            Ok(Some(row)) => {
                info!(stored_file_id = row.id, content_hash, "stored file recorded");
                Ok((row, true))
            }
            Ok(None) => self.require_by_hash(content_hash).await,
            Err(source) if is_unique_violation(&source) => self.require_by_hash(content_hash).await,
            Err(source) => Err(DataError::query("files.insert_or_get", source)),
        }
    }

    async fn require_by_hash(&self, content_hash: &str) -> Result<(StoredFileRow, bool)> {
        let row = self.find_by_hash(content_hash).await?.ok_or_else(|| {
            DataError::query("files.insert_or_get", sqlx::Error::RowNotFound)
        })?;
        Ok((row, false))
    }

    /// Fetch a stored file by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, stored_file_id: i64) -> Result<Option<StoredFileRow>> {
        sqlx::query_as::<_, StoredFileRow>("SELECT * FROM stored_files WHERE id = ?1")
            .bind(stored_file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::query("files.get", source))
    }

    /// Fetch a stored file by content hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_by_hash(&self, content_hash: &str) -> Result<Option<StoredFileRow>> {
        sqlx::query_as::<_, StoredFileRow>("SELECT * FROM stored_files WHERE content_hash = ?1")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::query("files.find_by_hash", source))
    }

    /// Create a user reference and bump the reference count, in one
    /// transaction.
    ///
    /// Returns `None` when the user already references the artifact,
    /// whether observed up front or lost to a concurrent insert; in the
    /// latter case the whole transaction rolls back so the counter is
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails for any other reason.
    pub async fn create_user_reference(
        &self,
        owner_id: i64,
        stored_file_id: i64,
        display_name: Option<&str>,
    ) -> Result<Option<UserFileRow>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|source| DataError::query("files.create_reference.begin", source))?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM user_files WHERE owner_id = ?1 AND stored_file_id = ?2",
        )
        .bind(owner_id)
        .bind(stored_file_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|source| DataError::query("files.create_reference.lookup", source))?;
        if existing.is_some() {
            debug!(owner_id, stored_file_id, "reference already present");
            return Ok(None);
        }

        let stored = sqlx::query_as::<_, StoredFileRow>("SELECT * FROM stored_files WHERE id = ?1")
            .bind(stored_file_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|source| DataError::query("files.create_reference.stored", source))?;
        let Some(stored) = stored else {
            debug!(stored_file_id, "stored file vanished before referencing");
            return Ok(None);
        };

        let name = display_name.unwrap_or(&stored.original_name);
        let inserted = sqlx::query_as::<_, UserFileRow>(
            r"
            INSERT INTO user_files (owner_id, stored_file_id, display_name, created_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            ",
        )
        .bind(owner_id)
        .bind(stored_file_id)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await;

        let user_file = match inserted {
            Ok(row) => row,
            Err(source) if is_unique_violation(&source) => {
                // A concurrent creator won; roll back so the count stays
                // exactly one per distinct reference.
                tx.rollback()
                    .await
                    .map_err(|source| DataError::query("files.create_reference.rollback", source))?;
                return Ok(None);
            }
            Err(source) => return Err(DataError::query("files.create_reference.insert", source)),
        };

        sqlx::query("UPDATE stored_files SET ref_count = ref_count + 1 WHERE id = ?1")
            .bind(stored_file_id)
            .execute(&mut *tx)
            .await
            .map_err(|source| DataError::query("files.create_reference.increment", source))?;

        tx.commit()
            .await
            .map_err(|source| DataError::query("files.create_reference.commit", source))?;

        info!(owner_id, stored_file_id, user_file_id = user_file.id, "user reference created");
        Ok(Some(user_file))
    }

    /// Delete a user reference and decrement the count; when the count
    /// reaches zero the stored row is deleted and its artifact identity is
    /// returned for filesystem removal.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn delete_user_reference(&self, user_file_id: i64) -> Result<ReferenceDeletion> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|source| DataError::query("files.delete_reference.begin", source))?;

        let stored_file_id: Option<i64> = sqlx::query_scalar(
            "DELETE FROM user_files WHERE id = ?1 RETURNING stored_file_id",
        )
        .bind(user_file_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|source| DataError::query("files.delete_reference.delete", source))?;

        let Some(stored_file_id) = stored_file_id else {
            tx.rollback()
                .await
                .map_err(|source| DataError::query("files.delete_reference.rollback", source))?;
            return Ok(ReferenceDeletion::NotFound);
        };

        let remaining: Option<i64> = sqlx::query_scalar(
            r"
            UPDATE stored_files
            SET ref_count = ref_count - 1
            WHERE id = ?1
            RETURNING ref_count
            ",
        )
        .bind(stored_file_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|source| DataError::query("files.delete_reference.decrement", source))?;

        let outcome = match remaining {
            Some(count) if count <= 0 => {
                let artifact = sqlx::query_as::<_, (String, bool)>(
                    "DELETE FROM stored_files WHERE id = ?1 RETURNING real_path, is_directory",
                )
                .bind(stored_file_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|source| DataError::query("files.delete_reference.orphan", source))?;

                artifact.map_or(ReferenceDeletion::Deleted, |(real_path, is_directory)| {
                    ReferenceDeletion::Orphaned(StoredArtifact {
                        stored_file_id,
                        real_path,
                        is_directory,
                    })
                })
            }
            _ => ReferenceDeletion::Deleted,
        };

        tx.commit()
            .await
            .map_err(|source| DataError::query("files.delete_reference.commit", source))?;
        Ok(outcome)
    }

    /// Whether a user already references a stored file.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn user_has_reference(&self, owner_id: i64, stored_file_id: i64) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM user_files WHERE owner_id = ?1 AND stored_file_id = ?2",
        )
        .bind(owner_id)
        .bind(stored_file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| DataError::query("files.user_has_reference", source))?;
        Ok(found.is_some())
    }

    /// Sum of stored sizes across a user's references.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn used_space(&self, owner_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r"
            SELECT COALESCE(SUM(s.size), 0)
            FROM user_files u
            JOIN stored_files s ON s.id = u.stored_file_id
            WHERE u.owner_id = ?1
            ",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|source| DataError::query("files.used_space", source))
    }

    /// Stored rows with no live references, for the periodic sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_zero_ref(&self) -> Result<Vec<StoredFileRow>> {
        sqlx::query_as::<_, StoredFileRow>("SELECT * FROM stored_files WHERE ref_count <= 0")
            .fetch_all(&self.pool)
            .await
            .map_err(|source| DataError::query("files.list_zero_ref", source))
    }

    /// All stored paths, for reconciling the on-disk store tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_paths(&self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT real_path FROM stored_files")
            .fetch_all(&self.pool)
            .await
            .map_err(|source| DataError::query("files.list_paths", source))
    }

    /// Delete a stored row directly (zero-reference sweep).
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_stored(&self, stored_file_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM stored_files WHERE id = ?1 AND ref_count <= 0")
            .bind(stored_file_id)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::query("files.delete_stored", source))?;
        Ok(result.rows_affected() == 1)
    }

    /// A user's file references, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_for_user(&self, owner_id: i64) -> Result<Vec<UserFileRow>> {
        sqlx::query_as::<_, UserFileRow>(
            "SELECT * FROM user_files WHERE owner_id = ?1 ORDER BY id DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| DataError::query("files.list_for_user", source))
    }
}
