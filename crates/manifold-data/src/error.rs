//! Error types for the data layer.

use thiserror::Error;

/// Result alias for data layer operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by the data layer.
#[derive(Debug, Error)]
pub enum DataError {
    /// Migration execution failed.
    #[error("migration failed")]
    Migration {
        /// Underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },
    /// A database operation failed.
    #[error("database operation failed")]
    Query {
        /// Operation identifier for logs.
        operation: &'static str,
        /// Underlying SQL error.
        #[source]
        source: sqlx::Error,
    },
    /// The database failed its startup integrity check.
    #[error("database integrity check failed")]
    Integrity {
        /// Verbatim report returned by the engine.
        report: String,
    },
}

impl DataError {
    pub(crate) const fn query(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Query { operation, source }
    }
}

/// Whether an error is the unique-constraint violation expected under
/// concurrent creates.
#[must_use]
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn query_error_exposes_source() {
        let err = DataError::query("tasks.get", sqlx::Error::RowNotFound);
        assert_eq!(err.to_string(), "database operation failed");
        assert!(err.source().is_some());
    }

    #[test]
    fn integrity_error_carries_report() {
        let err = DataError::Integrity {
            report: "row 12 missing".to_string(),
        };
        assert_eq!(err.to_string(), "database integrity check failed");
    }

    #[test]
    fn row_not_found_is_not_a_unique_violation() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
