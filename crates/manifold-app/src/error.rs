//! Application bootstrap errors. Every variant is fatal to the process.

use thiserror::Error;

/// Fatal startup failures.
#[derive(Debug, Error)]
pub(crate) enum AppError {
    /// Settings could not be loaded or validated.
    #[error("configuration load failed")]
    Config {
        /// Underlying config error.
        #[source]
        source: manifold_config::ConfigError,
    },
    /// The catalog could not be opened, migrated, or verified.
    #[error("database startup failed")]
    Database {
        /// Underlying data error.
        #[source]
        source: manifold_data::DataError,
    },
    /// The download root could not be created.
    #[error("download root unavailable")]
    DownloadRoot {
        /// Underlying store error.
        #[source]
        source: manifold_store::StoreError,
    },
    /// The daemon client could not be constructed.
    #[error("daemon client construction failed")]
    Daemon {
        /// Underlying daemon error.
        #[source]
        source: manifold_daemon::DaemonError,
    },
    /// The probe client could not be constructed.
    #[error("probe client construction failed")]
    Probe {
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },
}
