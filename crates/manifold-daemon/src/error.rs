//! Error primitives for daemon communication.

use thiserror::Error;

/// Result alias for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Errors raised while talking to the downloader daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The HTTP transport failed before a JSON-RPC response arrived.
    #[error("daemon transport failure")]
    Transport {
        /// RPC method being invoked.
        method: &'static str,
        /// Underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },
    /// The daemon answered with a JSON-RPC error object.
    #[error("daemon rejected the call")]
    Rpc {
        /// RPC method being invoked.
        method: &'static str,
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// The response body did not match the expected shape.
    #[error("daemon response malformed")]
    Decode {
        /// RPC method being invoked.
        method: &'static str,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The push channel failed.
    #[error("daemon notification channel failure")]
    Notification {
        /// Underlying WebSocket error.
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// The RPC endpoint URL could not be parsed.
    #[error("daemon endpoint url invalid")]
    Endpoint {
        /// The offending URL.
        url: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn rpc_error_renders_constant_message() {
        let err = DaemonError::Rpc {
            method: "aria2.addUri",
            code: 1,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "daemon rejected the call");
        assert!(err.source().is_none());
    }

    #[test]
    fn endpoint_error_carries_url() {
        let err = DaemonError::Endpoint {
            url: "not-a-url".to_string(),
        };
        assert_eq!(err.to_string(), "daemon endpoint url invalid");
    }
}
