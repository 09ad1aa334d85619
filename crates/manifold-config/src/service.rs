//! Runtime configuration resolution.

use manifold_data::ConfigStore;

use crate::error::{ConfigError, ConfigResult};
use crate::model::Settings;

/// Resolves effective configuration: catalog overrides win over the
/// environment baseline.
#[derive(Clone)]
pub struct ConfigService {
    settings: Settings,
    store: ConfigStore,
}

impl ConfigService {
    /// Wire the service to its baseline and overlay.
    #[must_use]
    pub const fn new(settings: Settings, store: ConfigStore) -> Self {
        Self { settings, store }
    }

    /// The static baseline.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Effective daemon endpoint and secret.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Overlay`] when the catalog read fails.
    pub async fn daemon_endpoint(&self) -> ConfigResult<(String, String)> {
        let url = self
            .overlay("aria2_rpc_url")
            .await?
            .unwrap_or_else(|| self.settings.aria2_rpc_url.clone());
        let secret = self
            .overlay("aria2_rpc_secret")
            .await?
            .unwrap_or_else(|| self.settings.aria2_rpc_secret.clone());
        Ok((url, secret))
    }

    /// Effective per-task size cap in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Overlay`] when the catalog read fails.
    pub async fn max_task_size(&self) -> ConfigResult<i64> {
        self.store
            .get_i64_or("max_task_size", self.settings.max_task_size)
            .await
            .map_err(|source| ConfigError::Overlay { source })
    }

    /// Effective free-disk floor in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Overlay`] when the catalog read fails.
    pub async fn min_free_disk(&self) -> ConfigResult<i64> {
        self.store
            .get_i64_or("min_free_disk", self.settings.min_free_disk)
            .await
            .map_err(|source| ConfigError::Overlay { source })
    }

    async fn overlay(&self, key: &str) -> ConfigResult<Option<String>> {
        self.store
            .get(key)
            .await
            .map_err(|source| ConfigError::Overlay { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_data::Db;

    async fn service() -> ConfigService {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        ConfigService::new(Settings::default(), db.config())
    }

    #[tokio::test]
    async fn endpoint_prefers_catalog_overrides() {
        let service = service().await;

        let (url, secret) = service.daemon_endpoint().await.unwrap();
        assert_eq!(url, "http://localhost:6800/jsonrpc");
        assert!(secret.is_empty());

        service
            .store
            .set("aria2_rpc_url", "http://daemon:6800/jsonrpc")
            .await
            .unwrap();
        service.store.set("aria2_rpc_secret", "hunter2").await.unwrap();

        let (url, secret) = service.daemon_endpoint().await.unwrap();
        assert_eq!(url, "http://daemon:6800/jsonrpc");
        assert_eq!(secret, "hunter2");
    }

    #[tokio::test]
    async fn size_caps_fall_back_to_the_baseline() {
        let service = service().await;
        // The migration seeds the same default; override to prove the
        // overlay wins.
        service.store.set("max_task_size", "1024").await.unwrap();
        assert_eq!(service.max_task_size().await.unwrap(), 1024);
        assert_eq!(
            service.min_free_disk().await.unwrap(),
            1024 * 1024 * 1024
        );
    }
}
