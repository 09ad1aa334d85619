//! User subscription repository.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DataError, Result, is_unique_violation};
use crate::model::{SubscriptionListing, SubscriptionRow};

/// Repository for `user_task_subscriptions`.
#[derive(Clone)]
pub struct SubscriptionStore {
    pool: SqlitePool,
}

impl SubscriptionStore {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pending subscription, returning the existing row when the
    /// `(owner, task)` pair already subscribed.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or re-query fails.
    pub async fn create(
        &self,
        owner_id: i64,
        task_id: i64,
        frozen_space: i64,
    ) -> Result<(SubscriptionRow, bool)> {
        let now = Utc::now();
        let inserted = sqlx::query_as::<_, SubscriptionRow>(
            r"
            INSERT INTO user_task_subscriptions
                (owner_id, task_id, frozen_space, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'pending', ?4, ?4)
            ON CONFLICT (owner_id, task_id) DO NOTHING
            RETURNING *
            ",
        )
        .bind(owner_id)
        .bind(task_id)
        .bind(frozen_space)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;

        match inserted {
            Ok(Some(row)) => {
                info!(owner_id, task_id, frozen_space, "subscription created");
                Ok((row, true))
            }
            Ok(None) => self.require_existing(owner_id, task_id).await,
            Err(source) if is_unique_violation(&source) => {
                self.require_existing(owner_id, task_id).await
            }
            Err(source) => Err(DataError::query("subscriptions.create", source)),
        }
    }

    async fn require_existing(&self, owner_id: i64, task_id: i64) -> Result<(SubscriptionRow, bool)> {
        let row = self.find(owner_id, task_id).await?.ok_or_else(|| {
            DataError::query("subscriptions.create", sqlx::Error::RowNotFound)
        })?;
        Ok((row, false))
    }

    /// Fetch by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, subscription_id: i64) -> Result<Option<SubscriptionRow>> {
        sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM user_task_subscriptions WHERE id = ?1",
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.get", source))
    }

    /// Fetch by the unique `(owner, task)` pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find(&self, owner_id: i64, task_id: i64) -> Result<Option<SubscriptionRow>> {
        sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM user_task_subscriptions WHERE owner_id = ?1 AND task_id = ?2",
        )
        .bind(owner_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.find", source))
    }

    /// All pending subscriptions of a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_pending_for_task(&self, task_id: i64) -> Result<Vec<SubscriptionRow>> {
        sqlx::query_as::<_, SubscriptionRow>(
            r"
            SELECT * FROM user_task_subscriptions
            WHERE task_id = ?1 AND status = 'pending'
            ORDER BY id
            ",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.list_pending_for_task", source))
    }

    /// Count of pending subscriptions of a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_pending_for_task(&self, task_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_task_subscriptions WHERE task_id = ?1 AND status = 'pending'",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.count_pending_for_task", source))
    }

    /// Freeze space for a pending subscription after a late size reveal.
    ///
    /// A compare-and-swap guarded on `frozen_space = 0`, so re-deliveries
    /// of the same reveal cannot double-freeze.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn freeze_space(&self, subscription_id: i64, amount: i64) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE user_task_subscriptions
            SET frozen_space = ?2, updated_at = ?3
            WHERE id = ?1 AND status = 'pending' AND frozen_space = 0
            ",
        )
        .bind(subscription_id)
        .bind(amount)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.freeze_space", source))?;
        Ok(result.rows_affected() == 1)
    }

    /// Move one pending subscription to `success`, releasing its freeze.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_success(&self, subscription_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE user_task_subscriptions
            SET status = 'success', frozen_space = 0, updated_at = ?2
            WHERE id = ?1 AND status = 'pending'
            ",
        )
        .bind(subscription_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.mark_success", source))?;
        Ok(result.rows_affected() == 1)
    }

    /// Move one pending subscription to `failed`, releasing its freeze.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_failed(&self, subscription_id: i64, display: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE user_task_subscriptions
            SET status = 'failed', frozen_space = 0, error_display = ?2, updated_at = ?3
            WHERE id = ?1 AND status = 'pending'
            ",
        )
        .bind(subscription_id)
        .bind(display)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.mark_failed", source))?;
        Ok(result.rows_affected() == 1)
    }

    /// Fail every pending subscription of a task with one display message.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn fail_all_pending(&self, task_id: i64, display: &str) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE user_task_subscriptions
            SET status = 'failed', frozen_space = 0, error_display = ?2, updated_at = ?3
            WHERE task_id = ?1 AND status = 'pending'
            ",
        )
        .bind(task_id)
        .bind(display)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.fail_all_pending", source))?;
        Ok(result.rows_affected())
    }

    /// Delete a subscription for cancellation, counting the survivors in
    /// the same transaction.
    ///
    /// Returns `None` when the row was already gone (idempotent cancel);
    /// otherwise the number of pending subscriptions the task still has,
    /// which the caller uses to decide whether to stop the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn delete_and_count_pending(
        &self,
        subscription_id: i64,
        owner_id: i64,
    ) -> Result<Option<i64>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|source| DataError::query("subscriptions.delete.begin", source))?;

        let task_id: Option<i64> = sqlx::query_scalar(
            r"
            DELETE FROM user_task_subscriptions
            WHERE id = ?1 AND owner_id = ?2
            RETURNING task_id
            ",
        )
        .bind(subscription_id)
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|source| DataError::query("subscriptions.delete", source))?;

        let Some(task_id) = task_id else {
            tx.rollback()
                .await
                .map_err(|source| DataError::query("subscriptions.delete.rollback", source))?;
            return Ok(None);
        };

        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_task_subscriptions WHERE task_id = ?1 AND status = 'pending'",
        )
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|source| DataError::query("subscriptions.delete.count", source))?;

        tx.commit()
            .await
            .map_err(|source| DataError::query("subscriptions.delete.commit", source))?;
        Ok(Some(remaining))
    }

    /// Remove every terminated subscription of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_terminated(&self, owner_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM user_task_subscriptions
            WHERE owner_id = ?1 AND status IN ('success', 'failed')
            ",
        )
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.clear_terminated", source))?;
        Ok(result.rows_affected())
    }

    /// Sum of frozen bytes across a user's pending subscriptions.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn frozen_space(&self, owner_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r"
            SELECT COALESCE(SUM(frozen_space), 0)
            FROM user_task_subscriptions
            WHERE owner_id = ?1 AND status = 'pending'
            ",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.frozen_space", source))
    }

    /// Subscriptions of a user joined with their tasks, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_for_user(&self, owner_id: i64) -> Result<Vec<SubscriptionListing>> {
        sqlx::query_as::<_, SubscriptionListing>(
            r"
            SELECT s.id,
                   s.owner_id,
                   s.task_id,
                   s.status,
                   s.frozen_space,
                   s.error_display,
                   s.created_at,
                   t.status AS task_status,
                   t.uri,
                   t.name,
                   t.total_length,
                   t.completed_length,
                   t.download_speed,
                   t.upload_speed,
                   t.error_display AS task_error_display
            FROM user_task_subscriptions s
            JOIN download_tasks t ON t.id = s.task_id
            WHERE s.owner_id = ?1
            ORDER BY s.id DESC
            ",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.list_for_user", source))
    }

    /// Owners of every subscription of a task, for fan-out targeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_for_task(&self, task_id: i64) -> Result<Vec<SubscriptionRow>> {
        sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM user_task_subscriptions WHERE task_id = ?1 ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| DataError::query("subscriptions.list_for_task", source))
    }
}
