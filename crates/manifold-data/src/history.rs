//! Append-only audit trail of terminated subscriptions.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{DataError, Result};
use crate::model::TaskHistoryRow;

/// Repository for `task_history`. Not on the hot path; written once per
/// terminal subscription transition for the retry UI.
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn append(
        &self,
        owner_id: i64,
        uri: &str,
        name: Option<&str>,
        total_length: i64,
        final_status: &str,
        error_display: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO task_history
                (owner_id, uri, name, total_length, final_status, error_display, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(owner_id)
        .bind(uri)
        .bind(name)
        .bind(total_length)
        .bind(final_status)
        .bind(error_display)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("history.append", source))?;
        Ok(())
    }

    /// A user's records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_for_user(&self, owner_id: i64, limit: i64) -> Result<Vec<TaskHistoryRow>> {
        sqlx::query_as::<_, TaskHistoryRow>(
            "SELECT * FROM task_history WHERE owner_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| DataError::query("history.list_for_user", source))
    }

    /// Drop a user's records.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_for_user(&self, owner_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM task_history WHERE owner_id = ?1")
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::query("history.clear_for_user", source))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::memory_db;

    #[tokio::test]
    async fn append_list_clear() {
        let db = memory_db().await;
        let history = db.history();

        history
            .append(1, "https://ex.com/a", Some("a"), 10, "success", None)
            .await
            .unwrap();
        history
            .append(1, "https://ex.com/b", None, 0, "failed", Some("network timeout"))
            .await
            .unwrap();
        history
            .append(2, "https://ex.com/c", None, 0, "failed", None)
            .await
            .unwrap();

        let mine = history.list_for_user(1, 10).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].uri, "https://ex.com/b", "newest first");
        assert_eq!(mine[0].error_display.as_deref(), Some("network timeout"));

        assert_eq!(history.clear_for_user(1).await.unwrap(), 2);
        assert!(history.list_for_user(1, 10).await.unwrap().is_empty());
        assert_eq!(history.list_for_user(2, 10).await.unwrap().len(), 1);
    }
}
