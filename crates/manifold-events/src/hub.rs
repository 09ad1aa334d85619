//! Peer channel registry and throttled broadcast.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::payloads::{NotificationLevel, OutboundMessage};

/// Minimum spacing between non-terminal updates for one task.
pub const TASK_UPDATE_THROTTLE: Duration = Duration::from_millis(500);

/// Interval between liveness pings on every registered channel.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound queue depth per connected session.
const PEER_BUFFER: usize = 64;

/// Identifier for one registered peer channel.
pub type PeerId = Uuid;

struct HubInner {
    peers: HashMap<i64, HashMap<PeerId, mpsc::Sender<OutboundMessage>>>,
    last_broadcast: HashMap<i64, Instant>,
}

/// Registry of live outbound channels, keyed by user.
#[derive(Clone)]
pub struct PeerHub {
    inner: Arc<Mutex<HubInner>>,
}

impl PeerHub {
    /// Construct an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                peers: HashMap::new(),
                last_broadcast: HashMap::new(),
            })),
        }
    }

    /// Register a new session channel for a user.
    ///
    /// The returned receiver is owned by the session task; dropping it marks
    /// the channel dead and the next fan-out evicts it.
    #[must_use]
    pub fn register(&self, user_id: i64) -> (PeerId, mpsc::Receiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::channel(PEER_BUFFER);
        let peer_id = Uuid::new_v4();
        let mut inner = self.lock();
        inner.peers.entry(user_id).or_default().insert(peer_id, sender);
        debug!(user_id, %peer_id, "registered session channel");
        (peer_id, receiver)
    }

    /// Remove a session channel, if still present.
    pub fn unregister(&self, user_id: i64, peer_id: PeerId) {
        let mut inner = self.lock();
        if let Some(channels) = inner.peers.get_mut(&user_id) {
            channels.remove(&peer_id);
            if channels.is_empty() {
                inner.peers.remove(&user_id);
            }
        }
    }

    /// Number of live channels registered for a user.
    #[must_use]
    pub fn peer_count(&self, user_id: i64) -> usize {
        self.lock().peers.get(&user_id).map_or(0, HashMap::len)
    }

    /// Claim the broadcast slot for a task.
    ///
    /// Returns whether an update for this task should go out now:
    /// terminal transitions (`force`) always pass, intermediate progress
    /// ticks pass at most once per throttle window. One claim covers the
    /// whole fan-out, so every subscriber of a shared task sees the same
    /// tick.
    #[must_use]
    pub fn should_broadcast(&self, task_id: i64, force: bool) -> bool {
        force || self.claim_broadcast_slot(task_id)
    }

    /// Deliver a message to every channel of a user, bypassing the
    /// throttle. Callers gate on [`Self::should_broadcast`] first.
    pub fn send_task_update(&self, user_id: i64, message: OutboundMessage) {
        self.send_to_user(user_id, &message);
    }

    /// Deliver a task update to every channel of a user.
    ///
    /// Non-terminal updates for the same task are throttled; pass `force`
    /// for terminal transitions so they always go out.
    pub fn broadcast_task_update(
        &self,
        user_id: i64,
        task_id: i64,
        message: OutboundMessage,
        force: bool,
    ) {
        if message.is_throttleable() && !self.should_broadcast(task_id, force) {
            return;
        }
        self.send_to_user(user_id, &message);
    }

    /// Deliver an out-of-band notification to every channel of a user.
    pub fn notify(&self, user_id: i64, level: NotificationLevel, message: impl Into<String>) {
        self.send_to_user(
            user_id,
            &OutboundMessage::Notification {
                level,
                message: message.into(),
            },
        );
    }

    /// Send a liveness ping to every registered channel, evicting the dead.
    pub fn ping_all(&self) {
        let targets: Vec<(i64, PeerId, mpsc::Sender<OutboundMessage>)> = {
            let inner = self.lock();
            inner
                .peers
                .iter()
                .flat_map(|(user_id, channels)| {
                    channels
                        .iter()
                        .map(|(peer_id, sender)| (*user_id, *peer_id, sender.clone()))
                })
                .collect()
        };

        let mut dead = Vec::new();
        for (user_id, peer_id, sender) in targets {
            if matches!(
                sender.try_send(OutboundMessage::Ping),
                Err(mpsc::error::TrySendError::Closed(_))
            ) {
                dead.push((user_id, peer_id));
            }
        }
        for (user_id, peer_id) in dead {
            self.unregister(user_id, peer_id);
        }
    }

    /// Forget the throttle slot for a task that reached a terminal state.
    pub fn clear_throttle(&self, task_id: i64) {
        self.lock().last_broadcast.remove(&task_id);
    }

    fn claim_broadcast_slot(&self, task_id: i64) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.last_broadcast.get(&task_id) {
            Some(last) if now.duration_since(*last) < TASK_UPDATE_THROTTLE => false,
            _ => {
                inner.last_broadcast.insert(task_id, now);
                true
            }
        }
    }

    fn send_to_user(&self, user_id: i64, message: &OutboundMessage) {
        // Senders are cloned out of the lock so a slow peer cannot stall
        // registration, and eviction happens after iteration completes.
        let channels: Vec<(PeerId, mpsc::Sender<OutboundMessage>)> = {
            let inner = self.lock();
            inner.peers.get(&user_id).map_or_else(Vec::new, |channels| {
                channels
                    .iter()
                    .map(|(peer_id, sender)| (*peer_id, sender.clone()))
                    .collect()
            })
        };

        let mut dead = Vec::new();
        for (peer_id, sender) in channels {
            match sender.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow peer; drop this tick, the next update catches up.
                    debug!(user_id, %peer_id, "peer queue full, dropping update");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(peer_id);
                }
            }
        }
        for peer_id in dead {
            self.unregister(user_id, peer_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("peer hub mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for PeerHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic heartbeat over every registered channel.
///
/// Runs until the shutdown signal flips; a missing `pong` is not a
/// disconnect cause, the next failed send is.
pub async fn heartbeat_loop(hub: PeerHub, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => hub.ping_all(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
