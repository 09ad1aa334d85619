//! Error primitives for the orchestration core.

use thiserror::Error;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the orchestration core. The boundary layer maps
/// rejection variants to client errors and the rest to server errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The submission could not be fingerprinted.
    #[error("submission rejected")]
    Fingerprint {
        /// Underlying fingerprint failure.
        #[source]
        source: manifold_hash::FingerprintError,
    },
    /// The submission target resolves into blocked address space.
    #[error("submission target blocked")]
    Blocked {
        /// Underlying guard rejection.
        #[source]
        source: manifold_probe::GuardError,
    },
    /// The payload exceeds the per-task size cap.
    #[error("payload exceeds the task size limit")]
    TooLarge {
        /// Reported payload size.
        size: i64,
        /// Configured cap.
        limit: i64,
    },
    /// The user lacks the space to admit this payload.
    #[error("quota or disk space insufficient")]
    SpaceDenied {
        /// Bytes the payload needs.
        needed: i64,
        /// Bytes the user has available.
        available: i64,
    },
    /// The user already references the artifact this task produced.
    #[error("user already owns the resulting file")]
    AlreadyOwned,
    /// The torrent blob was not valid base64.
    #[error("torrent payload is not valid base64")]
    InvalidTorrentEncoding,
    /// Submitting the task to the daemon failed.
    #[error("daemon submission failed")]
    SubmitFailed {
        /// Underlying daemon error.
        #[source]
        source: manifold_daemon::DaemonError,
    },
    /// Catalog failure.
    #[error("catalog operation failed")]
    Data {
        /// Underlying data error.
        #[source]
        source: manifold_data::DataError,
    },
    /// Content store failure.
    #[error("content store operation failed")]
    Store {
        /// Underlying store error.
        #[source]
        source: manifold_store::StoreError,
    },
    /// Configuration resolution failure.
    #[error("configuration unavailable")]
    Config {
        /// Underlying config error.
        #[source]
        source: manifold_config::ConfigError,
    },
    /// The catalog contradicted an invariant (e.g. a subscription whose
    /// task row vanished).
    #[error("catalog state inconsistent")]
    Inconsistent {
        /// What was expected and missing.
        detail: &'static str,
    },
}

impl CoreError {
    /// Whether the error is a client-side rejection (4xx at the boundary)
    /// rather than an internal failure.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Fingerprint { .. }
                | Self::Blocked { .. }
                | Self::TooLarge { .. }
                | Self::SpaceDenied { .. }
                | Self::AlreadyOwned
                | Self::InvalidTorrentEncoding
        )
    }
}

impl From<manifold_hash::FingerprintError> for CoreError {
    fn from(source: manifold_hash::FingerprintError) -> Self {
        Self::Fingerprint { source }
    }
}

impl From<manifold_probe::GuardError> for CoreError {
    fn from(source: manifold_probe::GuardError) -> Self {
        Self::Blocked { source }
    }
}

impl From<manifold_data::DataError> for CoreError {
    fn from(source: manifold_data::DataError) -> Self {
        Self::Data { source }
    }
}

impl From<manifold_store::StoreError> for CoreError {
    fn from(source: manifold_store::StoreError) -> Self {
        Self::Store { source }
    }
}

impl From<manifold_config::ConfigError> for CoreError {
    fn from(source: manifold_config::ConfigError) -> Self {
        Self::Config { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_distinguished_from_internal_failures() {
        assert!(CoreError::AlreadyOwned.is_rejection());
        assert!(
            CoreError::SpaceDenied {
                needed: 10,
                available: 5,
            }
            .is_rejection()
        );
        assert!(
            !CoreError::Data {
                source: manifold_data::DataError::Integrity {
                    report: "bad".to_string(),
                },
            }
            .is_rejection()
        );
    }
}
