//! Periodic reconciliation: the poll loop backs up the push stream.

use std::sync::Arc;

use manifold_daemon::DownloadState;
use manifold_data::{TaskRow, TaskStatus};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::CoreResult;
use crate::orchestrator::Orchestrator;
use crate::reconciler::RevealAction;

impl Orchestrator {
    /// One poll pass over every task with a live daemon handle.
    ///
    /// Never returns an error; per-task failures are recorded on the task
    /// row and the next tick retries.
    pub async fn poll_once(&self) {
        let tasks = match self.db.tasks().list_pollable().await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(%err, "poll listing failed");
                return;
            }
        };

        for task in tasks {
            if let Err(err) = self.poll_task(&task).await {
                warn!(task_id = task.id, %err, "poll pass failed for task");
            }
        }

        self.sweep_vanished_artifacts().await;
    }

    async fn poll_task(&self, task: &TaskRow) -> CoreResult<()> {
        let Some(gid) = task.gid.clone() else {
            return Ok(());
        };

        let daemon = self.daemon().await;
        let snapshot = match daemon.tell_status(&gid).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                // The raw message is kept for operators; a display string
                // is derived lazily by the boundary when first shown.
                self.db
                    .tasks()
                    .mark_error(task.id, Some(&err.to_string()), None)
                    .await?;
                self.broadcast_task(task.id, true).await;
                return Ok(());
            }
        };

        let lock = self.state.task_lock(task.id);
        let _guard = lock.lock().await;
        let Some(task) = self.db.tasks().get(task.id).await? else {
            return Ok(());
        };
        if task.task_status().is_terminal() {
            return Ok(());
        }

        self.db
            .tasks()
            .raise_peaks(
                task.id,
                i64::try_from(snapshot.download_speed).unwrap_or(i64::MAX),
                i64::try_from(snapshot.connections).unwrap_or(i64::MAX),
            )
            .await?;

        match snapshot.status {
            DownloadState::Active => {
                if let RevealAction::Canceled = self.check_size_reveal(&task, &snapshot).await? {
                    return Ok(());
                }
                self.apply_polled_state(&task, &snapshot, TaskStatus::Active).await
            }
            DownloadState::Waiting => {
                self.apply_polled_state(&task, &snapshot, TaskStatus::Queued).await
            }
            DownloadState::Paused => {
                self.apply_polled_state(&task, &snapshot, TaskStatus::Paused).await
            }
            DownloadState::Complete => {
                if snapshot.has_follow_up() {
                    let next = snapshot.followed_by[0].clone();
                    self.db.tasks().swap_gid(task.id, &next).await?;
                    return Ok(());
                }
                self.on_terminal_success(&task, Some(&snapshot)).await
            }
            DownloadState::Error => self.on_daemon_error(&task, Some(&snapshot)).await,
            DownloadState::Removed => self.on_external_stop(&task, Some(&snapshot)).await,
        }
    }

    async fn apply_polled_state(
        &self,
        task: &TaskRow,
        snapshot: &manifold_daemon::DownloadStatus,
        status: TaskStatus,
    ) -> CoreResult<()> {
        let update = self.snapshot_update(task, snapshot);
        self.db.tasks().apply_snapshot(task.id, Some(status), &update).await?;
        self.broadcast_task(task.id, false).await;
        Ok(())
    }

    /// Slow-cadence content store hygiene: zero-reference rows and
    /// on-disk trees no row points at.
    pub(crate) async fn run_store_sweeps(&self) {
        if let Err(err) = self.store.sweep_zero_refs().await {
            warn!(%err, "zero-reference sweep failed");
        }
        if let Err(err) = self.store.sweep_unindexed().await {
            warn!(%err, "unindexed store sweep failed");
        }
    }

    /// Flag completed tasks whose artifact no longer exists on disk.
    /// References are left alone; an independent janitor reconciles them.
    async fn sweep_vanished_artifacts(&self) {
        let completed = match self.db.tasks().list_completed_with_paths().await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(%err, "orphan sweep listing failed");
                return;
            }
        };

        for (task_id, real_path) in completed {
            if std::path::Path::new(&real_path).exists() {
                continue;
            }
            info!(task_id, path = %real_path, "completed artifact vanished, flagging task");
            if let Ok(Some(task)) = self.db.tasks().get(task_id).await {
                if let Some(gid) = task.gid.as_deref() {
                    let daemon = self.daemon().await;
                    if let Err(err) = daemon.remove_download_result(gid).await {
                        debug!(task_id, gid, %err, "remove download result failed");
                    }
                }
            }
            if let Err(err) = self.db.tasks().mark_removed(task_id).await {
                warn!(task_id, %err, "failed to flag removed task");
            } else {
                self.broadcast_task(task_id, true).await;
            }
        }
    }
}

/// Poll ticks between store sweeps (roughly five minutes at the default
/// two-second interval).
const SWEEP_EVERY_TICKS: u64 = 150;

/// Periodic poll until shutdown.
///
/// Each tick refreshes the daemon client (endpoint changes hot-swap) and
/// runs one pass; a tick in flight finishes before shutdown completes.
/// Store sweeps (zero-reference rows, unindexed trees) run on a slower
/// cadence layered on the same ticker.
pub async fn poll_loop(orchestrator: Arc<Orchestrator>, mut shutdown: watch::Receiver<bool>) {
    let interval = orchestrator.config.settings().poll_interval;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = orchestrator.refresh_daemon_client().await {
                    warn!(%err, "daemon client refresh failed");
                }
                orchestrator.poll_once().await;

                if tick % SWEEP_EVERY_TICKS == 0 {
                    orchestrator.run_store_sweeps().await;
                }
                tick = tick.wrapping_add(1);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("poll loop shutting down");
                    return;
                }
            }
        }
    }
}
