//! Shared download task repository.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DataError, Result, is_unique_violation};
use crate::model::{TaskRow, TaskSnapshotUpdate, TaskStatus};

/// Repository for `download_tasks`.
#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a task by fingerprint, creating it when absent.
    ///
    /// Returns the row and whether this call performed the insert. Under a
    /// concurrent create, exactly one caller observes `true`; the others
    /// re-query the winner's row.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or lookup fails.
    pub async fn find_or_create(
        &self,
        uri_hash: &str,
        uri: &str,
        name: Option<&str>,
        total_length: i64,
    ) -> Result<(TaskRow, bool)> {
        if let Some(existing) = self.find_by_hash(uri_hash).await? {
            return Ok((existing, false));
        }

        let now = Utc::now();
        let inserted = sqlx::query_as::<_, TaskRow>(
            r"
            INSERT INTO download_tasks
                (uri_hash, uri, status, name, total_length, created_at, updated_at)
            VALUES (?1, ?2, 'queued', ?3, ?4, ?5, ?5)
            ON CONFLICT (uri_hash) DO NOTHING
            RETURNING *
            ",
        )
        .bind(uri_hash)
        .bind(uri)
        .bind(name)
        .bind(total_length)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;

        match inserted {
            Ok(Some(row)) => {
                info!(task_id = row.id, uri_hash, "created shared download task");
                Ok((row, true))
            }
            Ok(None) => {
                let row = self.find_by_hash(uri_hash).await?.ok_or_else(|| {
                    DataError::query("tasks.find_or_create", sqlx::Error::RowNotFound)
                })?;
                Ok((row, false))
            }
            Err(source) if is_unique_violation(&source) => {
                let row = self.find_by_hash(uri_hash).await?.ok_or_else(|| {
                    DataError::query("tasks.find_or_create", sqlx::Error::RowNotFound)
                })?;
                Ok((row, false))
            }
            Err(source) => Err(DataError::query("tasks.find_or_create", source)),
        }
    }

    /// Fetch a task by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, task_id: i64) -> Result<Option<TaskRow>> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM download_tasks WHERE id = ?1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::query("tasks.get", source))
    }

    /// Fetch a task by fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_by_hash(&self, uri_hash: &str) -> Result<Option<TaskRow>> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM download_tasks WHERE uri_hash = ?1")
            .bind(uri_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::query("tasks.find_by_hash", source))
    }

    /// Fetch a task by daemon handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_by_gid(&self, gid: &str) -> Result<Option<TaskRow>> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM download_tasks WHERE gid = ?1")
            .bind(gid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::query("tasks.find_by_gid", source))
    }

    /// Record the daemon handle assigned to a freshly submitted task.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn assign_gid(&self, task_id: i64, gid: &str) -> Result<()> {
        sqlx::query("UPDATE download_tasks SET gid = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(task_id)
            .bind(gid)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::query("tasks.assign_gid", source))?;
        Ok(())
    }

    /// Swap the daemon handle during the BT metadata handoff.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn swap_gid(&self, task_id: i64, new_gid: &str) -> Result<()> {
        sqlx::query("UPDATE download_tasks SET gid = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(task_id)
            .bind(new_gid)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::query("tasks.swap_gid", source))?;
        info!(task_id, new_gid, "daemon handle swapped");
        Ok(())
    }

    /// Attach the completed artifact to the task: the completion
    /// compare-and-swap.
    ///
    /// At most one caller ever succeeds for a task; only the winner may
    /// create user references and release frozen space.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn attach_stored_file(&self, task_id: i64, stored_file_id: i64) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r"
            UPDATE download_tasks
            SET stored_file_id = ?2,
                status = 'complete',
                completed_at = ?3,
                updated_at = ?3
            WHERE id = ?1 AND stored_file_id IS NULL
            ",
        )
        .bind(task_id)
        .bind(stored_file_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("tasks.attach_stored_file", source))?;
        Ok(result.rows_affected() == 1)
    }

    /// Write a new lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_status(&self, task_id: i64, status: TaskStatus) -> Result<()> {
        sqlx::query("UPDATE download_tasks SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(task_id)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::query("tasks.set_status", source))?;
        Ok(())
    }

    /// Move a task to `error` with a raw and an optional translated
    /// message.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_error(
        &self,
        task_id: i64,
        raw: Option<&str>,
        display: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE download_tasks
            SET status = 'error',
                error = COALESCE(?2, error),
                error_display = COALESCE(?3, error_display),
                download_speed = 0,
                upload_speed = 0,
                updated_at = ?4
            WHERE id = ?1
            ",
        )
        .bind(task_id)
        .bind(raw)
        .bind(display)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("tasks.mark_error", source))?;
        Ok(())
    }

    /// Cancellation write: `error` status, cleared handle, zeroed rates.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_canceled(&self, task_id: i64, display: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE download_tasks
            SET status = 'error',
                gid = NULL,
                error_display = ?2,
                download_speed = 0,
                upload_speed = 0,
                updated_at = ?3
            WHERE id = ?1
            ",
        )
        .bind(task_id)
        .bind(display)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("tasks.mark_canceled", source))?;
        Ok(())
    }

    /// Refresh metadata fields from a daemon snapshot, optionally moving
    /// the lifecycle status in the same write.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn apply_snapshot(
        &self,
        task_id: i64,
        status: Option<TaskStatus>,
        update: &TaskSnapshotUpdate,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE download_tasks
            SET status = COALESCE(?2, status),
                name = COALESCE(?3, name),
                total_length = ?4,
                completed_length = ?5,
                download_speed = ?6,
                upload_speed = ?7,
                updated_at = ?8
            WHERE id = ?1
            ",
        )
        .bind(task_id)
        .bind(status.map(TaskStatus::as_str))
        .bind(update.name.as_deref())
        .bind(update.total_length)
        .bind(update.completed_length)
        .bind(update.download_speed)
        .bind(update.upload_speed)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("tasks.apply_snapshot", source))?;
        Ok(())
    }

    /// Raise the peak counters; an atomic conditional write so peaks never
    /// decrease under concurrent polls.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn raise_peaks(
        &self,
        task_id: i64,
        download_speed: i64,
        connections: i64,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE download_tasks
            SET peak_download_speed = CASE
                    WHEN peak_download_speed < ?2 THEN ?2
                    ELSE peak_download_speed
                END,
                peak_connections = CASE
                    WHEN peak_connections < ?3 THEN ?3
                    ELSE peak_connections
                END
            WHERE id = ?1
            ",
        )
        .bind(task_id)
        .bind(download_speed)
        .bind(connections)
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("tasks.raise_peaks", source))?;
        Ok(())
    }

    /// Reset an errored task for a retry by a new subscriber.
    ///
    /// Guarded on `status = 'error'` so only one resetter wins; the old
    /// handle and error fields are cleared before resubmission.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn reset_for_retry(&self, task_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE download_tasks
            SET status = 'queued',
                gid = NULL,
                error = NULL,
                error_display = NULL,
                download_speed = 0,
                upload_speed = 0,
                completed_length = 0,
                updated_at = ?2
            WHERE id = ?1 AND status = 'error'
            ",
        )
        .bind(task_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("tasks.reset_for_retry", source))?;
        Ok(result.rows_affected() == 1)
    }

    /// Tasks the poll loop must visit: a live daemon handle and a
    /// non-terminal status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_pollable(&self) -> Result<Vec<TaskRow>> {
        sqlx::query_as::<_, TaskRow>(
            r"
            SELECT * FROM download_tasks
            WHERE gid IS NOT NULL
              AND status NOT IN ('complete', 'error', 'removed')
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|source| DataError::query("tasks.list_pollable", source))
    }

    /// Completed tasks joined with their artifact paths, for the orphan
    /// sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_completed_with_paths(&self) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r"
            SELECT t.id, s.real_path
            FROM download_tasks t
            JOIN stored_files s ON s.id = t.stored_file_id
            WHERE t.status = 'complete'
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|source| DataError::query("tasks.list_completed_with_paths", source))?;
        Ok(rows)
    }

    /// Flag a completed task whose artifact vanished from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_removed(&self, task_id: i64) -> Result<()> {
        self.set_status(task_id, TaskStatus::Removed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;

    #[tokio::test]
    async fn find_or_create_is_idempotent_per_hash() {
        let db = memory_db().await;
        let tasks = db.tasks();

        let (first, created) = tasks
            .find_or_create("hash-a", "https://ex.com/a", None, 0)
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.task_status(), TaskStatus::Queued);

        let (second, created_again) = tasks
            .find_or_create("hash-a", "https://ex.com/a", None, 0)
            .await
            .unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn attach_stored_file_cas_succeeds_once() {
        let db = memory_db().await;
        let tasks = db.tasks();
        let files = db.files();

        let (task, _) = tasks
            .find_or_create("hash-b", "https://ex.com/b", None, 0)
            .await
            .unwrap();
        let (stored, _) = files
            .insert_or_get("cafe01", "/store/ca/cafe01", 10, false, "b.bin")
            .await
            .unwrap();
        let (other, _) = files
            .insert_or_get("cafe02", "/store/ca/cafe02", 10, false, "b2.bin")
            .await
            .unwrap();

        assert!(tasks.attach_stored_file(task.id, stored.id).await.unwrap());
        assert!(!tasks.attach_stored_file(task.id, other.id).await.unwrap());

        let row = tasks.get(task.id).await.unwrap().unwrap();
        assert_eq!(row.stored_file_id, Some(stored.id));
        assert_eq!(row.task_status(), TaskStatus::Complete);
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn peaks_never_decrease() {
        let db = memory_db().await;
        let tasks = db.tasks();
        let (task, _) = tasks
            .find_or_create("hash-c", "https://ex.com/c", None, 0)
            .await
            .unwrap();

        tasks.raise_peaks(task.id, 100, 4).await.unwrap();
        tasks.raise_peaks(task.id, 50, 2).await.unwrap();
        tasks.raise_peaks(task.id, 80, 9).await.unwrap();

        let row = tasks.get(task.id).await.unwrap().unwrap();
        assert_eq!(row.peak_download_speed, 100);
        assert_eq!(row.peak_connections, 9);
    }

    #[tokio::test]
    async fn reset_for_retry_clears_handle_and_errors() {
        let db = memory_db().await;
        let tasks = db.tasks();
        let (task, _) = tasks
            .find_or_create("hash-d", "https://ex.com/d", None, 0)
            .await
            .unwrap();
        tasks.assign_gid(task.id, "gid-1").await.unwrap();
        tasks
            .mark_error(task.id, Some("errorCode=2"), Some("network timeout"))
            .await
            .unwrap();

        assert!(tasks.reset_for_retry(task.id).await.unwrap());
        // A second reset loses the guard: the task is queued now.
        assert!(!tasks.reset_for_retry(task.id).await.unwrap());

        let row = tasks.get(task.id).await.unwrap().unwrap();
        assert_eq!(row.task_status(), TaskStatus::Queued);
        assert!(row.gid.is_none());
        assert!(row.error.is_none());
        assert!(row.error_display.is_none());
    }

    #[tokio::test]
    async fn pollable_excludes_terminal_and_handleless_tasks() {
        let db = memory_db().await;
        let tasks = db.tasks();

        let (queued, _) = tasks
            .find_or_create("hash-e", "https://ex.com/e", None, 0)
            .await
            .unwrap();
        let (active, _) = tasks
            .find_or_create("hash-f", "https://ex.com/f", None, 0)
            .await
            .unwrap();
        tasks.assign_gid(active.id, "gid-f").await.unwrap();
        tasks.set_status(active.id, TaskStatus::Active).await.unwrap();

        let (errored, _) = tasks
            .find_or_create("hash-g", "https://ex.com/g", None, 0)
            .await
            .unwrap();
        tasks.assign_gid(errored.id, "gid-g").await.unwrap();
        tasks.mark_error(errored.id, Some("boom"), None).await.unwrap();

        let pollable = tasks.list_pollable().await.unwrap();
        let ids: Vec<i64> = pollable.iter().map(|row| row.id).collect();
        assert!(ids.contains(&active.id));
        assert!(!ids.contains(&queued.id), "no gid yet");
        assert!(!ids.contains(&errored.id), "terminal");
    }

    #[tokio::test]
    async fn mark_canceled_clears_gid_and_rates() {
        let db = memory_db().await;
        let tasks = db.tasks();
        let (task, _) = tasks
            .find_or_create("hash-h", "https://ex.com/h", None, 0)
            .await
            .unwrap();
        tasks.assign_gid(task.id, "gid-h").await.unwrap();

        tasks
            .mark_canceled(task.id, "all subscribers out of space")
            .await
            .unwrap();
        let row = tasks.get(task.id).await.unwrap().unwrap();
        assert_eq!(row.task_status(), TaskStatus::Error);
        assert!(row.gid.is_none());
        assert_eq!(
            row.error_display.as_deref(),
            Some("all subscribers out of space")
        );
        assert_eq!(row.download_speed, 0);
    }
}
