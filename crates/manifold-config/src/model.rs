//! Static settings loaded from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

const ENV_PREFIX: &str = "MANIFOLD_";

/// Ten gibibytes, the default per-task size cap.
const DEFAULT_MAX_TASK_SIZE: i64 = 10 * 1024 * 1024 * 1024;

/// One gibibyte, the default free-disk floor.
const DEFAULT_MIN_FREE_DISK: i64 = 1024 * 1024 * 1024;

/// Baseline settings; every field can be overridden with a
/// `MANIFOLD_`-prefixed environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// SQLite database URL.
    pub database_url: String,
    /// Download root containing `store/` and `downloading/`.
    pub download_dir: String,
    /// Daemon JSON-RPC endpoint.
    pub aria2_rpc_url: String,
    /// Shared secret prepended to daemon calls.
    pub aria2_rpc_secret: String,
    /// Per-task size cap in bytes.
    pub max_task_size: i64,
    /// Free-disk floor in bytes.
    pub min_free_disk: i64,
    /// Poll loop interval.
    pub poll_interval: Duration,
    /// Reconnect backoff cap for the notification channel.
    pub ws_reconnect_max_delay: Duration,
    /// Reconnect backoff multiplier.
    pub ws_reconnect_factor: f64,
    /// Reconnect jitter fraction (0..1).
    pub ws_reconnect_jitter: f64,
    /// Lifetime of artifact download tokens handed to clients.
    pub download_token_expiry: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/manifold.db".to_string(),
            download_dir: "downloads".to_string(),
            aria2_rpc_url: "http://localhost:6800/jsonrpc".to_string(),
            aria2_rpc_secret: String::new(),
            max_task_size: DEFAULT_MAX_TASK_SIZE,
            min_free_disk: DEFAULT_MIN_FREE_DISK,
            poll_interval: Duration::from_secs(2),
            ws_reconnect_max_delay: Duration::from_secs(60),
            ws_reconnect_factor: 2.0,
            ws_reconnect_jitter: 0.2,
            download_token_expiry: Duration::from_secs(60 * 60 * 12),
        }
    }
}

impl Settings {
    /// Load settings from the process environment on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] when a variable is present but
    /// unparsable, and [`ConfigError::InvalidValue`] when the combination
    /// fails validation.
    pub fn from_env() -> ConfigResult<Self> {
        let mut settings = Self::default();

        if let Some(value) = read_env("DATABASE_URL") {
            settings.database_url = value;
        }
        if let Some(value) = read_env("DOWNLOAD_DIR") {
            settings.download_dir = value;
        }
        if let Some(value) = read_env("ARIA2_RPC_URL") {
            settings.aria2_rpc_url = value;
        }
        if let Some(value) = read_env("ARIA2_RPC_SECRET") {
            settings.aria2_rpc_secret = value;
        }
        if let Some(value) = read_env("MAX_TASK_SIZE") {
            settings.max_task_size = parse_env("MANIFOLD_MAX_TASK_SIZE", &value)?;
        }
        if let Some(value) = read_env("MIN_FREE_DISK") {
            settings.min_free_disk = parse_env("MANIFOLD_MIN_FREE_DISK", &value)?;
        }
        if let Some(value) = read_env("POLL_INTERVAL_SECS") {
            settings.poll_interval =
                Duration::from_secs_f64(parse_env("MANIFOLD_POLL_INTERVAL_SECS", &value)?);
        }
        if let Some(value) = read_env("WS_RECONNECT_MAX_DELAY_SECS") {
            settings.ws_reconnect_max_delay =
                Duration::from_secs(parse_env("MANIFOLD_WS_RECONNECT_MAX_DELAY_SECS", &value)?);
        }
        if let Some(value) = read_env("WS_RECONNECT_FACTOR") {
            settings.ws_reconnect_factor = parse_env("MANIFOLD_WS_RECONNECT_FACTOR", &value)?;
        }
        if let Some(value) = read_env("WS_RECONNECT_JITTER") {
            settings.ws_reconnect_jitter = parse_env("MANIFOLD_WS_RECONNECT_JITTER", &value)?;
        }
        if let Some(value) = read_env("DOWNLOAD_TOKEN_EXPIRY_SECS") {
            settings.download_token_expiry =
                Duration::from_secs(parse_env("MANIFOLD_DOWNLOAD_TOKEN_EXPIRY_SECS", &value)?);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validate field combinations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for out-of-range fields.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_task_size <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_task_size",
                reason: "must_be_positive",
            });
        }
        if self.min_free_disk < 0 {
            return Err(ConfigError::InvalidValue {
                field: "min_free_disk",
                reason: "must_be_non_negative",
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval",
                reason: "must_be_positive",
            });
        }
        if !(0.0..1.0).contains(&self.ws_reconnect_jitter) {
            return Err(ConfigError::InvalidValue {
                field: "ws_reconnect_jitter",
                reason: "must_be_a_fraction",
            });
        }
        if self.ws_reconnect_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "ws_reconnect_factor",
                reason: "must_not_shrink",
            });
        }
        Ok(())
    }
}

fn read_env(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.max_task_size, 10 * 1024 * 1024 * 1024);
        assert_eq!(settings.min_free_disk, 1024 * 1024 * 1024);
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn validation_rejects_out_of_range_fields() {
        let mut settings = Settings::default();
        settings.ws_reconnect_jitter = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.max_task_size = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.ws_reconnect_factor = 0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn parse_env_reports_the_offending_value() {
        let err = parse_env::<i64>("MANIFOLD_MAX_TASK_SIZE", "ten").unwrap_err();
        match err {
            ConfigError::InvalidEnv { name, value } => {
                assert_eq!(name, "MANIFOLD_MAX_TASK_SIZE");
                assert_eq!(value, "ten");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
