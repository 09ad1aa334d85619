//! DB-backed runtime configuration overrides.
//!
//! Environment settings provide defaults; rows in the `config` table win
//! so operators can retune the daemon endpoint and caps without a restart.

use sqlx::SqlitePool;

use crate::error::{DataError, Result};

/// Repository for the `config` key/value table.
#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch one value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::query("config.get", source))
    }

    /// Fetch one value parsed as an integer, falling back when absent or
    /// unparsable.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_i64_or(&self, key: &str, fallback: i64) -> Result<i64> {
        Ok(self
            .get(key)
            .await?
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(fallback))
    }

    /// Upsert one value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO config (key, value) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|source| DataError::query("config.set", source))?;
        Ok(())
    }
}
