//! Error primitives for submission fingerprinting.

use thiserror::Error;

/// Result alias for fingerprinting operations.
pub type FingerprintResult<T> = Result<T, FingerprintError>;

/// Errors raised while deriving a submission fingerprint.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The magnet link carried no usable `urn:btih` topic.
    #[error("magnet link carries no info-hash")]
    InvalidMagnet {
        /// The offending magnet URI.
        uri: String,
    },
    /// The torrent payload could not be parsed far enough to find `info`.
    #[error("torrent metainfo is corrupt")]
    CorruptTorrent {
        /// Static description of the structural failure.
        reason: &'static str,
    },
    /// The submission scheme is not one the orchestrator accepts.
    #[error("unsupported submission scheme")]
    UnsupportedScheme {
        /// The offending URI.
        uri: String,
    },
    /// IO failure while hashing artifact content.
    #[error("content hashing io failure")]
    Io {
        /// Path involved in the failure.
        path: std::path::PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn variants_render_constant_messages() {
        let magnet = FingerprintError::InvalidMagnet {
            uri: "magnet:?dn=x".to_string(),
        };
        assert_eq!(magnet.to_string(), "magnet link carries no info-hash");

        let torrent = FingerprintError::CorruptTorrent {
            reason: "missing info key",
        };
        assert_eq!(torrent.to_string(), "torrent metainfo is corrupt");
        assert!(torrent.source().is_none());

        let io = FingerprintError::Io {
            path: "artifact".into(),
            source: std::io::Error::other("io"),
        };
        assert!(io.source().is_some());
    }
}
