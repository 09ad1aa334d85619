//! Event reconciliation: idempotent transitions from daemon events.
//!
//! Events are hints to re-poll; the `tellStatus` snapshot fetched on
//! arrival is the only source of truth. Per-task state writes are
//! serialised by the task's advisory lock, and the terminal attach is a
//! database compare-and-swap, so duplicate events and concurrent handlers
//! collapse to a single effect.

use std::path::{Path, PathBuf};

use manifold_daemon::{DownloadStatus, NotificationKind, translate_error_message};
use manifold_data::{SubscriptionRow, TaskRow, TaskSnapshotUpdate, TaskStatus};
use tracing::{debug, error, info, warn};

use crate::error::CoreResult;
use crate::orchestrator::Orchestrator;

/// Display message for tasks stopped out-of-band (an admin or a
/// third-party client removed the transfer directly on the daemon).
pub(crate) const EXTERNALLY_CANCELED_DISPLAY: &str = "externally canceled";

/// Display message when every subscriber failed the size reveal.
pub(crate) const ALL_OUT_OF_SPACE_DISPLAY: &str = "all subscribers out of space";

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// What the size-reveal check decided.
pub(crate) enum RevealAction {
    /// Keep going; at least one subscriber fits.
    Proceed,
    /// The task was cancelled (over cap or nobody fits).
    Canceled,
}

impl Orchestrator {
    /// Metadata refresh derived from a snapshot. The display name is
    /// rewritten relative to the task's private download directory so
    /// nested payloads keep their subpath and absolute daemon paths stay
    /// inside the boundary.
    pub(crate) fn snapshot_update(
        &self,
        task: &TaskRow,
        snapshot: &DownloadStatus,
    ) -> TaskSnapshotUpdate {
        let task_dir = self.store.layout().task_download_dir(task.id);
        TaskSnapshotUpdate {
            name: snapshot
                .display_name(&task_dir)
                .or_else(|| task.name.clone()),
            total_length: clamp(snapshot.total_length),
            completed_length: clamp(snapshot.completed_length),
            download_speed: clamp(snapshot.download_speed),
            upload_speed: clamp(snapshot.upload_speed),
        }
    }

    /// Handle one daemon push event.
    ///
    /// Never returns an error: failures are logged and the next event or
    /// poll tick retries naturally.
    pub async fn handle_event(&self, gid: &str, kind: NotificationKind) {
        if let Err(err) = self.handle_event_inner(gid, kind).await {
            error!(gid, ?kind, %err, "event handling failed");
        }
    }

    async fn handle_event_inner(&self, gid: &str, kind: NotificationKind) -> CoreResult<()> {
        let daemon = self.daemon().await;
        let snapshot = match daemon.tell_status(gid).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(gid, %err, "status fetch failed for event");
                None
            }
        };

        // Locate the task: by the event's gid first, then through the
        // snapshot's followingGid (the BT metadata handoff), updating the
        // stored handle when the latter matches.
        let mut task = self.db.tasks().find_by_gid(gid).await?;
        if task.is_none() {
            if let Some(following) = snapshot
                .as_ref()
                .and_then(|snapshot| snapshot.following_gid.as_deref())
            {
                if let Some(predecessor) = self.db.tasks().find_by_gid(following).await? {
                    info!(
                        task_id = predecessor.id,
                        from = following,
                        to = gid,
                        "event gid unknown, adopting via followingGid"
                    );
                    self.db.tasks().swap_gid(predecessor.id, gid).await?;
                    task = self.db.tasks().get(predecessor.id).await?;
                }
            }
        }
        let Some(task) = task else {
            debug!(gid, ?kind, "event for unknown gid dropped");
            return Ok(());
        };

        let lock = self.state.task_lock(task.id);
        let _guard = lock.lock().await;
        // Re-read inside the lock; a concurrent handler may have moved
        // the task.
        let Some(task) = self.db.tasks().get(task.id).await? else {
            return Ok(());
        };

        match kind {
            NotificationKind::Start => self.on_start(&task, snapshot.as_ref()).await,
            NotificationKind::Pause => self.on_pause(&task, snapshot.as_ref()).await,
            NotificationKind::Stop => self.on_external_stop(&task, snapshot.as_ref()).await,
            NotificationKind::Complete => {
                if let Some(snapshot) = snapshot.as_ref().filter(|s| s.has_follow_up()) {
                    // A BT metadata phase: the real payload continues
                    // under a new gid. Not a terminal completion.
                    let next = snapshot.followed_by[0].clone();
                    info!(task_id = task.id, next_gid = %next, "metadata phase complete");
                    self.db.tasks().swap_gid(task.id, &next).await?;
                    return Ok(());
                }
                self.on_terminal_success(&task, snapshot.as_ref()).await
            }
            NotificationKind::BtComplete => self.on_terminal_success(&task, snapshot.as_ref()).await,
            NotificationKind::Error => self.on_daemon_error(&task, snapshot.as_ref()).await,
        }
    }

    async fn on_start(&self, task: &TaskRow, snapshot: Option<&DownloadStatus>) -> CoreResult<()> {
        if let Some(snapshot) = snapshot {
            if let RevealAction::Canceled = self.check_size_reveal(task, snapshot).await? {
                return Ok(());
            }
            self.db
                .tasks()
                .apply_snapshot(task.id, Some(TaskStatus::Active), &self.snapshot_update(task, snapshot))
                .await?;
        } else {
            self.db.tasks().set_status(task.id, TaskStatus::Active).await?;
        }
        self.broadcast_task(task.id, false).await;
        Ok(())
    }

    async fn on_pause(&self, task: &TaskRow, snapshot: Option<&DownloadStatus>) -> CoreResult<()> {
        if let Some(snapshot) = snapshot {
            self.db
                .tasks()
                .apply_snapshot(task.id, Some(TaskStatus::Paused), &self.snapshot_update(task, snapshot))
                .await?;
        } else {
            self.db.tasks().set_status(task.id, TaskStatus::Paused).await?;
        }
        self.broadcast_task(task.id, false).await;
        Ok(())
    }

    /// A stop the orchestrator did not initiate. The daemon side is
    /// already gone, so no removal RPC is issued.
    pub(crate) async fn on_external_stop(
        &self,
        task: &TaskRow,
        snapshot: Option<&DownloadStatus>,
    ) -> CoreResult<()> {
        if let Some(snapshot) = snapshot {
            self.db
                .tasks()
                .apply_snapshot(task.id, None, &self.snapshot_update(task, snapshot))
                .await?;
        }
        self.db
            .tasks()
            .mark_error(task.id, None, Some(EXTERNALLY_CANCELED_DISPLAY))
            .await?;
        self.settle_pending_as_failed(task, EXTERNALLY_CANCELED_DISPLAY).await?;
        self.broadcast_task(task.id, true).await;
        info!(task_id = task.id, "task externally canceled");
        Ok(())
    }

    pub(crate) async fn on_daemon_error(
        &self,
        task: &TaskRow,
        snapshot: Option<&DownloadStatus>,
    ) -> CoreResult<()> {
        let raw = snapshot.and_then(|snapshot| snapshot.error_message.clone());
        let display_message = translate_error_message(raw.as_deref());

        if let Some(snapshot) = snapshot {
            self.db
                .tasks()
                .apply_snapshot(task.id, None, &self.snapshot_update(task, snapshot))
                .await?;
        }
        self.db
            .tasks()
            .mark_error(task.id, raw.as_deref(), Some(&display_message))
            .await?;
        self.settle_pending_as_failed(task, &display_message).await?;
        self.broadcast_task(task.id, true).await;
        warn!(task_id = task.id, display = %display_message, "task failed");
        Ok(())
    }

    /// The terminal success path: promote the artifact, attach it through
    /// the compare-and-swap, and settle every pending subscriber.
    pub(crate) async fn on_terminal_success(
        &self,
        task: &TaskRow,
        snapshot: Option<&DownloadStatus>,
    ) -> CoreResult<()> {
        let Some(snapshot) = snapshot else {
            warn!(task_id = task.id, "completion without a snapshot, waiting for poll");
            return Ok(());
        };
        if task.stored_file_id.is_some() {
            debug!(task_id = task.id, "completion already handled");
            return Ok(());
        }

        self.db
            .tasks()
            .apply_snapshot(task.id, None, &self.snapshot_update(task, snapshot))
            .await?;

        let Some(first_file) = snapshot.first_file_path() else {
            error!(task_id = task.id, "completion carried no file entries");
            return Ok(());
        };
        let task_dir = self.store.layout().task_download_dir(task.id);
        let Some(source) = resolve_artifact_root(first_file, &task_dir) else {
            // The daemon wrote outside the task's private directory;
            // refuse to promote rather than walk an arbitrary path.
            error!(
                task_id = task.id,
                path = first_file,
                "completion file outside the task directory"
            );
            return Ok(());
        };
        if !source.exists() {
            error!(task_id = task.id, path = %source.display(), "completed artifact missing");
            return Ok(());
        }

        let original_name = task
            .name
            .clone()
            .or_else(|| snapshot.display_name(&task_dir))
            .or_else(|| {
                source
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| format!("task-{}", task.id));

        // A promotion failure leaves the task non-terminal on purpose:
        // the next poll retries once the filesystem recovers.
        let stored = match self.store.move_to_store(&source, &original_name).await {
            Ok(stored) => stored,
            Err(err) => {
                error!(task_id = task.id, %err, "artifact promotion failed");
                return Ok(());
            }
        };

        if !self.db.tasks().attach_stored_file(task.id, stored.id).await? {
            debug!(task_id = task.id, "completion lost the attach race, discarding");
            return Ok(());
        }

        // The CAS winner alone materialises references and settles
        // subscribers.
        let pending = self.db.subscriptions().list_pending_for_task(task.id).await?;
        for subscription in &pending {
            self.store
                .create_user_reference(subscription.owner_id, stored.id, Some(&original_name))
                .await?;
            self.db.subscriptions().mark_success(subscription.id).await?;
            self.append_history(subscription, task, "success", None).await;
        }
        info!(
            task_id = task.id,
            stored_file_id = stored.id,
            subscribers = pending.len(),
            "task complete"
        );

        self.store.cleanup_task_dir(task.id).await;
        self.broadcast_task(task.id, true).await;
        self.state.forget_task_lock(task.id);
        Ok(())
    }

    /// First non-zero `totalLength` for a task admitted without a size:
    /// re-admit everyone, or cancel when the cap or quotas say no.
    pub(crate) async fn check_size_reveal(
        &self,
        task: &TaskRow,
        snapshot: &DownloadStatus,
    ) -> CoreResult<RevealAction> {
        let total_length = clamp(snapshot.total_length);
        if total_length == 0 || task.total_length != 0 {
            return Ok(RevealAction::Proceed);
        }

        let limit = self.config.max_task_size().await?;
        if total_length > limit {
            warn!(task_id = task.id, total_length, limit, "task exceeds the size cap");
            self.cancel_task(task, snapshot, "canceled: size exceeds system limit")
                .await?;
            return Ok(RevealAction::Canceled);
        }

        let pending = self.db.subscriptions().list_pending_for_task(task.id).await?;
        let outcome = self.readmit_on_reveal(&pending, total_length).await?;
        if outcome.dropped > 0 {
            self.broadcast_task(task.id, true).await;
        }
        if outcome.survivors == 0 {
            warn!(task_id = task.id, "no subscriber fits the revealed size");
            self.cancel_task(task, snapshot, ALL_OUT_OF_SPACE_DISPLAY).await?;
            return Ok(RevealAction::Canceled);
        }
        Ok(RevealAction::Proceed)
    }

    /// Stop the daemon transfer and fail everyone; the orchestrator-side
    /// cancellation path.
    pub(crate) async fn cancel_task(
        &self,
        task: &TaskRow,
        snapshot: &DownloadStatus,
        display: &str,
    ) -> CoreResult<()> {
        if let Some(gid) = task.gid.as_deref() {
            let daemon = self.daemon().await;
            if let Err(err) = daemon.force_remove(gid).await {
                debug!(task_id = task.id, gid, %err, "force remove failed");
            }
            if let Err(err) = daemon.remove_download_result(gid).await {
                debug!(task_id = task.id, gid, %err, "remove download result failed");
            }
        }

        self.db
            .tasks()
            .apply_snapshot(task.id, None, &self.snapshot_update(task, snapshot))
            .await?;
        self.db.tasks().mark_canceled(task.id, display).await?;
        self.settle_pending_as_failed(task, display).await?;
        self.store.cleanup_task_dir(task.id).await;
        self.broadcast_task(task.id, true).await;
        self.state.forget_task_lock(task.id);
        Ok(())
    }

    /// Fail every pending subscription with one message, recording each in
    /// the audit history.
    async fn settle_pending_as_failed(&self, task: &TaskRow, display: &str) -> CoreResult<()> {
        let pending = self.db.subscriptions().list_pending_for_task(task.id).await?;
        self.db.subscriptions().fail_all_pending(task.id, display).await?;
        for subscription in &pending {
            self.append_history(subscription, task, "failed", Some(display)).await;
        }
        Ok(())
    }

    async fn append_history(
        &self,
        subscription: &SubscriptionRow,
        task: &TaskRow,
        final_status: &str,
        error_display: Option<&str>,
    ) {
        if let Err(err) = self
            .db
            .history()
            .append(
                subscription.owner_id,
                &task.uri,
                task.name.as_deref(),
                task.total_length,
                final_status,
                error_display,
            )
            .await
        {
            debug!(task_id = task.id, %err, "history append failed");
        }
    }
}

/// Normalise the daemon-reported first file to the top-level entry inside
/// the task's private directory: a multi-file payload promotes as one
/// tree. Paths outside the directory are refused.
fn resolve_artifact_root(first_file: &str, task_dir: &Path) -> Option<PathBuf> {
    let path = Path::new(first_file);
    let relative = path.strip_prefix(task_dir).ok()?;
    let top_level = relative.components().next()?;
    Some(task_dir.join(top_level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_root_is_the_top_level_entry() {
        let task_dir = PathBuf::from("/data/downloading/7");
        assert_eq!(
            resolve_artifact_root("/data/downloading/7/album/disc1/track.flac", &task_dir),
            Some(PathBuf::from("/data/downloading/7/album"))
        );
        assert_eq!(
            resolve_artifact_root("/data/downloading/7/file.iso", &task_dir),
            Some(PathBuf::from("/data/downloading/7/file.iso"))
        );
    }

    #[test]
    fn out_of_tree_paths_are_refused() {
        let task_dir = PathBuf::from("/data/downloading/7");
        assert_eq!(resolve_artifact_root("/etc/passwd", &task_dir), None);
        assert_eq!(
            resolve_artifact_root("/data/downloading/8/file.iso", &task_dir),
            None
        );
    }

    #[test]
    fn clamp_saturates_oversized_values() {
        assert_eq!(clamp(42), 42);
        assert_eq!(clamp(u64::MAX), i64::MAX);
    }
}
