//! Error primitives for the content store.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the content store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure during promotion or removal.
    #[error("store io failure")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The artifact the daemon reported does not exist.
    #[error("promotion source missing")]
    MissingSource {
        /// Path the daemon reported.
        path: PathBuf,
    },
    /// Content hashing failed.
    #[error("content hashing failed")]
    Hash {
        /// Underlying fingerprint error.
        #[source]
        source: manifold_hash::FingerprintError,
    },
    /// Catalog operation failed.
    #[error("store catalog failure")]
    Data {
        /// Underlying data layer error.
        #[source]
        source: manifold_data::DataError,
    },
    /// A blocking hash task was cancelled or panicked.
    #[error("blocking task failed")]
    Join {
        /// Underlying join error.
        #[source]
        source: tokio::task::JoinError,
    },
}

impl StoreError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

impl From<manifold_data::DataError> for StoreError {
    fn from(source: manifold_data::DataError) -> Self {
        Self::Data { source }
    }
}

impl From<manifold_hash::FingerprintError> for StoreError {
    fn from(source: manifold_hash::FingerprintError) -> Self {
        Self::Hash { source }
    }
}
