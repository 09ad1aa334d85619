//! Shared context wiring the core services together.

use std::sync::Arc;

use manifold_config::ConfigService;
use manifold_daemon::{DaemonRpc, RpcClient};
use manifold_data::Db;
use manifold_events::PeerHub;
use manifold_probe::Prober;
use manifold_store::ContentStore;
use tracing::info;

use crate::error::CoreResult;
use crate::state::AppState;

/// Central orchestrator shared by the submission path, the reconciler,
/// the poll loop, and the push-event listener.
pub struct Orchestrator {
    pub(crate) db: Db,
    pub(crate) store: ContentStore,
    pub(crate) hub: PeerHub,
    pub(crate) config: ConfigService,
    pub(crate) prober: Prober,
    pub(crate) quotas: Arc<dyn crate::admission::QuotaProvider>,
    pub(crate) state: AppState,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        db: Db,
        store: ContentStore,
        hub: PeerHub,
        config: ConfigService,
        prober: Prober,
        quotas: Arc<dyn crate::admission::QuotaProvider>,
        daemon: Arc<dyn DaemonRpc>,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            store,
            hub,
            config,
            prober,
            quotas,
            state: AppState::new(daemon),
        })
    }

    /// The fan-out hub, for session registration at the boundary.
    #[must_use]
    pub const fn hub(&self) -> &PeerHub {
        &self.hub
    }

    /// The content store, for reference management at the boundary.
    #[must_use]
    pub const fn content_store(&self) -> &ContentStore {
        &self.store
    }

    /// The catalog handle.
    #[must_use]
    pub const fn db(&self) -> &Db {
        &self.db
    }

    /// Current daemon client.
    pub(crate) async fn daemon(&self) -> Arc<dyn DaemonRpc> {
        self.state.daemon().await
    }

    /// Rebuild the daemon client when the configured endpoint or secret
    /// changed since the current client was built. Injected clients (with
    /// no recorded endpoint) are replaced on the first refresh.
    ///
    /// # Errors
    ///
    /// Returns an error when the overlay read or the client rebuild fails.
    pub async fn refresh_daemon_client(&self) -> CoreResult<()> {
        let (url, secret) = self
            .config
            .daemon_endpoint()
            .await
            .map_err(|source| crate::error::CoreError::Config { source })?;

        if self.state.daemon_matches(&url, &secret).await {
            return Ok(());
        }

        let rebuilt = RpcClient::new(url.clone(), secret.clone())
            .map_err(|source| crate::error::CoreError::SubmitFailed { source })?;
        info!(%url, "daemon client rebuilt");
        self.state
            .replace_daemon(Arc::new(rebuilt), Some((url, secret)))
            .await;
        Ok(())
    }
}
