//! In-memory process state: advisory locks and the hot-swappable daemon
//! client.
//!
//! One coarse mutex guards the lock maps; hold times are microseconds and
//! the database is the bottleneck, so contention here is acceptable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use manifold_daemon::DaemonRpc;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::error;

/// Advisory lock keyed by task: serialises event handling and submission
/// per task.
pub(crate) type TaskLock = Arc<AsyncMutex<()>>;

/// Advisory lock keyed by user: serialises "read available, decide, write
/// frozen" sequences.
pub(crate) type UserLock = Arc<AsyncMutex<()>>;

struct Locks {
    tasks: HashMap<i64, TaskLock>,
    users: HashMap<i64, UserLock>,
}

struct DaemonSlot {
    client: Arc<dyn DaemonRpc>,
    /// `(url, secret)` the client was built for; `None` for injected
    /// clients that are never hot-swapped.
    endpoint: Option<(String, String)>,
}

/// Shared mutable state for the orchestrator.
pub(crate) struct AppState {
    locks: Mutex<Locks>,
    daemon: RwLock<DaemonSlot>,
}

impl AppState {
    pub(crate) fn new(daemon: Arc<dyn DaemonRpc>) -> Self {
        Self {
            locks: Mutex::new(Locks {
                tasks: HashMap::new(),
                users: HashMap::new(),
            }),
            daemon: RwLock::new(DaemonSlot {
                client: daemon,
                endpoint: None,
            }),
        }
    }

    /// The advisory lock for a task, created on first use.
    pub(crate) fn task_lock(&self, task_id: i64) -> TaskLock {
        let mut locks = self.lock();
        Arc::clone(locks.tasks.entry(task_id).or_default())
    }

    /// The advisory lock for a user, created on first use.
    pub(crate) fn user_lock(&self, user_id: i64) -> UserLock {
        let mut locks = self.lock();
        Arc::clone(locks.users.entry(user_id).or_default())
    }

    /// Drop a task's lock entry once the task is terminal, bounding the
    /// map.
    pub(crate) fn forget_task_lock(&self, task_id: i64) {
        self.lock().tasks.remove(&task_id);
    }

    /// Current daemon client.
    pub(crate) async fn daemon(&self) -> Arc<dyn DaemonRpc> {
        Arc::clone(&self.daemon.read().await.client)
    }

    /// Whether the current client was built for this endpoint.
    pub(crate) async fn daemon_matches(&self, url: &str, secret: &str) -> bool {
        self.daemon
            .read()
            .await
            .endpoint
            .as_ref()
            .is_some_and(|(current_url, current_secret)| {
                current_url == url && current_secret == secret
            })
    }

    /// Swap in a rebuilt daemon client after a config change.
    pub(crate) async fn replace_daemon(
        &self,
        daemon: Arc<dyn DaemonRpc>,
        endpoint: Option<(String, String)>,
    ) {
        let mut slot = self.daemon.write().await;
        slot.client = daemon;
        slot.endpoint = endpoint;
    }

    fn lock(&self) -> MutexGuard<'_, Locks> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("state mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}
