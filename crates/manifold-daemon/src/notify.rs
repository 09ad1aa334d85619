//! Push notification channel from the daemon.
//!
//! The daemon emits `{method, params: [{gid}]}` JSON frames over a
//! WebSocket at the same path as the HTTP RPC endpoint. Events are
//! treated purely as re-poll hints; the snapshot fetched afterwards is
//! the source of truth.

use futures_util::StreamExt as _;
use rand::Rng as _;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use url::Url;

use crate::error::{DaemonError, DaemonResult};

/// Base delay for the reconnect schedule.
pub(crate) const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Internal event names carried by daemon notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Transfer started.
    Start,
    /// Transfer paused.
    Pause,
    /// Transfer stopped out-of-band.
    Stop,
    /// Transfer completed (possibly a BT metadata phase).
    Complete,
    /// Transfer failed.
    Error,
    /// BT payload transfer completed.
    BtComplete,
}

impl NotificationKind {
    /// Map a daemon notification method to its internal kind.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "aria2.onDownloadStart" => Some(Self::Start),
            "aria2.onDownloadPause" => Some(Self::Pause),
            "aria2.onDownloadStop" => Some(Self::Stop),
            "aria2.onDownloadComplete" => Some(Self::Complete),
            "aria2.onDownloadError" => Some(Self::Error),
            "aria2.onBtDownloadComplete" => Some(Self::BtComplete),
            _ => None,
        }
    }
}

/// One push notification, already mapped to an internal kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonNotification {
    /// Event kind.
    pub kind: NotificationKind,
    /// Daemon handle the event refers to.
    pub gid: String,
}

#[derive(Debug, Deserialize)]
struct NotificationFrame {
    #[serde(default)]
    method: String,
    #[serde(default)]
    params: Vec<NotificationParam>,
}

#[derive(Debug, Deserialize)]
struct NotificationParam {
    #[serde(default)]
    gid: String,
}

/// Derive the notification WebSocket URL from the HTTP RPC endpoint.
///
/// # Errors
///
/// Returns [`DaemonError::Endpoint`] when the RPC URL cannot be parsed or
/// its scheme cannot be rewritten.
pub fn ws_url_from_rpc(rpc_url: &str) -> DaemonResult<String> {
    let endpoint = || DaemonError::Endpoint {
        url: rpc_url.to_string(),
    };
    let mut parsed = Url::parse(rpc_url).map_err(|_| endpoint())?;
    let scheme = match parsed.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return Err(endpoint()),
    };
    parsed.set_scheme(scheme).map_err(|()| endpoint())?;
    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed.to_string())
}

/// Exponential reconnect delay with jitter.
///
/// `base * factor^attempt` capped at `max_delay`, then skewed by a uniform
/// ±`jitter` fraction so reconnecting replicas do not stampede.
#[must_use]
pub fn reconnect_delay(attempt: u32, factor: f64, max_delay: Duration, jitter: f64) -> Duration {
    let base = RECONNECT_BASE_DELAY.as_secs_f64() * factor.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = base.min(max_delay.as_secs_f64());
    let skew = capped * jitter * rand::rng().random_range(-1.0..=1.0);
    Duration::from_secs_f64((capped + skew).max(0.0))
}

/// Live notification stream over a connected WebSocket.
pub struct NotificationStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl NotificationStream {
    /// Connect to the daemon's notification channel.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Notification`] when the handshake fails.
    pub async fn connect(ws_url: &str) -> DaemonResult<Self> {
        let (socket, _response) =
            connect_async(ws_url)
                .await
                .map_err(|source| DaemonError::Notification {
                    source: Box::new(source),
                })?;
        debug!(ws_url, "connected to daemon notification channel");
        Ok(Self { socket })
    }

    /// Receive the next recognised notification.
    ///
    /// Unknown methods, non-text frames, and unparsable payloads are
    /// skipped. Returns `None` once the connection is closed or errors,
    /// at which point the caller reconnects with backoff.
    pub async fn next_event(&mut self) -> Option<DaemonNotification> {
        loop {
            let message = match self.socket.next().await? {
                Ok(message) => message,
                Err(error) => {
                    warn!(%error, "notification channel read failed");
                    return None;
                }
            };
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(frame) = serde_json::from_str::<NotificationFrame>(&text) else {
                warn!("skipping unparsable notification frame");
                continue;
            };
            let Some(kind) = NotificationKind::from_method(&frame.method) else {
                continue;
            };
            let Some(param) = frame.params.first().filter(|param| !param.gid.is_empty()) else {
                continue;
            };
            return Some(DaemonNotification {
                kind,
                gid: param.gid.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_swap_covers_http_and_https() {
        assert_eq!(
            ws_url_from_rpc("http://localhost:6800/jsonrpc").unwrap(),
            "ws://localhost:6800/jsonrpc"
        );
        assert_eq!(
            ws_url_from_rpc("https://daemon.internal/jsonrpc").unwrap(),
            "wss://daemon.internal/jsonrpc"
        );
        assert!(ws_url_from_rpc("ftp://daemon/jsonrpc").is_err());
    }

    #[test]
    fn every_daemon_method_maps() {
        let cases = [
            ("aria2.onDownloadStart", NotificationKind::Start),
            ("aria2.onDownloadPause", NotificationKind::Pause),
            ("aria2.onDownloadStop", NotificationKind::Stop),
            ("aria2.onDownloadComplete", NotificationKind::Complete),
            ("aria2.onDownloadError", NotificationKind::Error),
            ("aria2.onBtDownloadComplete", NotificationKind::BtComplete),
        ];
        for (method, kind) in cases {
            assert_eq!(NotificationKind::from_method(method), Some(kind));
        }
        assert_eq!(NotificationKind::from_method("aria2.unknown"), None);
    }

    #[test]
    fn notification_frames_parse() {
        let frame: NotificationFrame = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"aria2.onDownloadComplete","params":[{"gid":"2089b05e"}]}"#,
        )
        .unwrap();
        assert_eq!(frame.method, "aria2.onDownloadComplete");
        assert_eq!(frame.params[0].gid, "2089b05e");
    }

    #[test]
    fn reconnect_delay_grows_and_caps() {
        let max = Duration::from_secs(60);
        // Zero jitter makes the schedule deterministic for assertions.
        assert_eq!(reconnect_delay(0, 2.0, max, 0.0), Duration::from_secs(1));
        assert_eq!(reconnect_delay(3, 2.0, max, 0.0), Duration::from_secs(8));
        assert_eq!(reconnect_delay(20, 2.0, max, 0.0), max);
    }

    #[test]
    fn jitter_stays_within_the_configured_band() {
        let max = Duration::from_secs(60);
        for _ in 0..64 {
            let delay = reconnect_delay(2, 2.0, max, 0.2).as_secs_f64();
            assert!((3.2..=4.8).contains(&delay), "delay {delay} out of band");
        }
    }
}
