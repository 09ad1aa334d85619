//! Push-stream listener: daemon notifications drive the reconciler.

use std::sync::Arc;

use manifold_daemon::{NotificationStream, reconnect_delay, ws_url_from_rpc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::orchestrator::Orchestrator;

/// Consume daemon notifications until shutdown, reconnecting with
/// exponential backoff and jitter. The attempt counter resets on every
/// successful connection.
pub async fn listen_daemon_events(
    orchestrator: Arc<Orchestrator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        if let Err(err) = orchestrator.refresh_daemon_client().await {
            warn!(%err, "daemon client refresh failed");
        }

        let ws_url = match orchestrator.config.daemon_endpoint().await {
            Ok((rpc_url, _secret)) => match ws_url_from_rpc(&rpc_url) {
                Ok(ws_url) => Some(ws_url),
                Err(err) => {
                    warn!(%err, "cannot derive notification url");
                    None
                }
            },
            Err(err) => {
                warn!(%err, "daemon endpoint unavailable");
                None
            }
        };

        if let Some(ws_url) = ws_url {
            match NotificationStream::connect(&ws_url).await {
                Ok(mut stream) => {
                    info!(%ws_url, "notification channel connected");
                    attempt = 0;
                    loop {
                        tokio::select! {
                            event = stream.next_event() => {
                                let Some(event) = event else {
                                    warn!("notification channel closed");
                                    break;
                                };
                                // Handlers run concurrently across tasks;
                                // the per-task lock serialises within one.
                                let orchestrator = Arc::clone(&orchestrator);
                                tokio::spawn(async move {
                                    orchestrator.handle_event(&event.gid, event.kind).await;
                                });
                            }
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    info!("event listener shutting down");
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "notification connect failed");
                }
            }
        }

        let settings = orchestrator.config.settings();
        let delay = reconnect_delay(
            attempt,
            settings.ws_reconnect_factor,
            settings.ws_reconnect_max_delay,
            settings.ws_reconnect_jitter,
        );
        attempt = attempt.saturating_add(1);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        info!(attempt, delay_ms, "reconnecting after delay");

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("event listener shutting down");
                    return;
                }
            }
        }
    }
}
