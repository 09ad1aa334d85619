//! Boot sequence: settings, catalog, store layout, daemon client, loops.

use std::sync::Arc;
use std::time::Duration;

use manifold_config::{ConfigService, Settings};
use manifold_core::{FlatQuota, Orchestrator, listen_daemon_events, poll_loop};
use manifold_daemon::RpcClient;
use manifold_data::Db;
use manifold_events::PeerHub;
use manifold_probe::Prober;
use manifold_store::{ContentStore, StoreLayout};
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::AppError;
use crate::telemetry;

/// Default quota handed to users when the session layer provides none:
/// one hundred gibibytes, matching the catalog seed.
const DEFAULT_USER_QUOTA: i64 = 100 * 1024 * 1024 * 1024;

/// Grace period for in-flight handlers after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Run the orchestrator until interrupted.
///
/// # Errors
///
/// Returns an error when any startup invariant fails: unparsable
/// settings, an unopenable or corrupt catalog, an uncreatable download
/// root, or an invalid daemon endpoint.
pub(crate) async fn run_app() -> Result<(), AppError> {
    telemetry::init_logging();
    info!("manifold starting");

    let settings = Settings::from_env().map_err(|source| AppError::Config { source })?;

    let db = Db::connect(&settings.database_url)
        .await
        .map_err(|source| AppError::Database { source })?;
    // A corrupt catalog is fatal; better to refuse service than to hand
    // out references into a broken store.
    db.integrity_check()
        .await
        .map_err(|source| AppError::Database { source })?;

    let layout = StoreLayout::new(settings.download_dir.clone());
    layout
        .ensure()
        .map_err(|source| AppError::DownloadRoot { source })?;

    let config = ConfigService::new(settings.clone(), db.config());
    let (rpc_url, rpc_secret) = config
        .daemon_endpoint()
        .await
        .map_err(|source| AppError::Config { source })?;
    let daemon =
        RpcClient::new(rpc_url, rpc_secret).map_err(|source| AppError::Daemon { source })?;
    match manifold_daemon::DaemonRpc::get_version(&daemon).await {
        Ok(version) => info!(version = %version.version, "daemon reachable"),
        Err(err) => error!(%err, "daemon unreachable at startup, continuing with reconnects"),
    }

    let prober = Prober::new(manifold_probe::DEFAULT_TIMEOUT)
        .map_err(|source| AppError::Probe { source })?;

    let hub = PeerHub::new();
    let orchestrator = Orchestrator::new(
        db.clone(),
        ContentStore::new(layout, db),
        hub.clone(),
        config,
        prober,
        Arc::new(FlatQuota {
            bytes: DEFAULT_USER_QUOTA,
        }),
        Arc::new(daemon),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = tokio::spawn(listen_daemon_events(
        Arc::clone(&orchestrator),
        shutdown_rx.clone(),
    ));
    let poller = tokio::spawn(poll_loop(Arc::clone(&orchestrator), shutdown_rx.clone()));
    let heartbeat = tokio::spawn(manifold_events::heartbeat_loop(hub, shutdown_rx));

    info!("manifold ready");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "signal handler failed, shutting down");
    }

    info!("shutdown requested, draining");
    let _ = shutdown_tx.send(true);
    let drain = async {
        let _ = listener.await;
        let _ = poller.await;
        let _ = heartbeat.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        error!("drain deadline exceeded, exiting with handlers in flight");
    }

    info!("manifold stopped");
    Ok(())
}
