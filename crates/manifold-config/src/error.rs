//! Configuration error primitives.

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable failed to parse.
    #[error("environment variable invalid")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
    /// A setting failed validation.
    #[error("configuration value invalid")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Static reason for the rejection.
        reason: &'static str,
    },
    /// The catalog overlay could not be read.
    #[error("configuration overlay unavailable")]
    Overlay {
        /// Underlying data layer error.
        #[source]
        source: manifold_data::DataError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_render_constant_messages() {
        let env = ConfigError::InvalidEnv {
            name: "MANIFOLD_POLL_INTERVAL",
            value: "abc".to_string(),
        };
        assert_eq!(env.to_string(), "environment variable invalid");

        let value = ConfigError::InvalidValue {
            field: "ws_reconnect_jitter",
            reason: "out_of_range",
        };
        assert_eq!(value.to_string(), "configuration value invalid");
    }
}
