//! Connection pool construction and startup checks.

use std::str::FromStr as _;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row as _, SqlitePool};
use tracing::info;

use crate::config::ConfigStore;
use crate::error::{DataError, Result};
use crate::files::FileStore;
use crate::history::HistoryStore;
use crate::subscriptions::SubscriptionStore;
use crate::tasks::TaskStore;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the shared connection pool and its repositories.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open the database, apply pragmas, and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the pool cannot be opened,
    /// or migrations fail.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|source| DataError::query("db.parse_url", source))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        // An in-memory database is per-connection; pin the pool to one
        // connection so every caller sees the same schema.
        let max_connections = if url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|source| DataError::query("db.connect", source))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| DataError::Migration { source })?;

        info!(url, "database ready");
        Ok(Self { pool })
    }

    /// Access the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run the engine integrity check; startup aborts on any finding.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Integrity`] when the engine reports anything
    /// other than `ok`, or a query error when the pragma itself fails.
    pub async fn integrity_check(&self) -> Result<()> {
        let rows = sqlx::query("PRAGMA integrity_check")
            .fetch_all(&self.pool)
            .await
            .map_err(|source| DataError::query("db.integrity_check", source))?;

        let findings: Vec<String> = rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>(0).ok())
            .filter(|finding| finding != "ok")
            .collect();

        if findings.is_empty() {
            Ok(())
        } else {
            Err(DataError::Integrity {
                report: findings.join("; "),
            })
        }
    }

    /// Task repository.
    #[must_use]
    pub fn tasks(&self) -> TaskStore {
        TaskStore::new(self.pool.clone())
    }

    /// Subscription repository.
    #[must_use]
    pub fn subscriptions(&self) -> SubscriptionStore {
        SubscriptionStore::new(self.pool.clone())
    }

    /// Stored-file and user-reference repository.
    #[must_use]
    pub fn files(&self) -> FileStore {
        FileStore::new(self.pool.clone())
    }

    /// Task history repository.
    #[must_use]
    pub fn history(&self) -> HistoryStore {
        HistoryStore::new(self.pool.clone())
    }

    /// Runtime configuration repository.
    #[must_use]
    pub fn config(&self) -> ConfigStore {
        ConfigStore::new(self.pool.clone())
    }
}
