//! Client-facing subscription views and lifecycle operations.

use manifold_data::{SubscriptionListing, SubscriptionRow, SubscriptionStatus, TaskRow, TaskStatus};
use manifold_events::{OutboundMessage, TaskUpdate};
use tracing::{debug, info, warn};

use crate::error::CoreResult;
use crate::orchestrator::Orchestrator;

/// Display message recorded when a user cancels their own subscription.
const CANCELED_DISPLAY: &str = "canceled by subscriber";

/// Listing filters offered to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    /// Transfers currently moving bytes.
    Active,
    /// Everything not yet terminal for this user.
    Current,
    /// Successfully completed subscriptions.
    Complete,
    /// Failed subscriptions.
    Error,
}

/// The per-user status override: a settled subscription keeps its own
/// outcome visible regardless of where the shared task moved afterwards.
fn effective_status(subscription: SubscriptionStatus, task: TaskStatus) -> &'static str {
    match subscription {
        SubscriptionStatus::Failed => "error",
        SubscriptionStatus::Success => "complete",
        SubscriptionStatus::Pending => match task {
            TaskStatus::Queued => "queued",
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Complete => "complete",
            TaskStatus::Error | TaskStatus::Removed => "error",
        },
    }
}

/// Build the outbound payload for one subscription and its task.
pub(crate) fn build_update(subscription: &SubscriptionRow, task: &TaskRow) -> TaskUpdate {
    let status = effective_status(subscription.subscription_status(), task.task_status());
    TaskUpdate {
        id: subscription.id,
        name: task.name.clone(),
        uri: task.uri.clone(),
        status: status.to_string(),
        total_length: task.total_length,
        completed_length: task.completed_length,
        download_speed: task.download_speed,
        upload_speed: task.upload_speed,
        frozen_space: subscription.frozen_space,
        error: subscription
            .error_display
            .clone()
            .or_else(|| task.error_display.clone()),
        created_at: subscription.created_at,
    }
}

fn listing_to_update(listing: &SubscriptionListing) -> TaskUpdate {
    let status = effective_status(
        SubscriptionStatus::parse(&listing.status),
        TaskStatus::parse(&listing.task_status),
    );
    TaskUpdate {
        id: listing.id,
        name: listing.name.clone(),
        uri: listing.uri.clone(),
        status: status.to_string(),
        total_length: listing.total_length,
        completed_length: listing.completed_length,
        download_speed: listing.download_speed,
        upload_speed: listing.upload_speed,
        frozen_space: listing.frozen_space,
        error: listing
            .error_display
            .clone()
            .or_else(|| listing.task_error_display.clone()),
        created_at: listing.created_at,
    }
}

fn matches_filter(update: &TaskUpdate, filter: ListFilter) -> bool {
    match filter {
        ListFilter::Active => update.status == "active",
        ListFilter::Current => matches!(update.status.as_str(), "queued" | "active" | "paused"),
        ListFilter::Complete => update.status == "complete",
        ListFilter::Error => update.status == "error",
    }
}

impl Orchestrator {
    /// List a user's subscriptions, newest first, optionally filtered.
    ///
    /// # Errors
    ///
    /// Returns an error when the catalog query fails.
    pub async fn list_subscriptions(
        &self,
        user_id: i64,
        filter: Option<ListFilter>,
    ) -> CoreResult<Vec<TaskUpdate>> {
        let listings = self.db.subscriptions().list_for_user(user_id).await?;
        Ok(listings
            .iter()
            .map(listing_to_update)
            .filter(|update| filter.is_none_or(|filter| matches_filter(update, filter)))
            .collect())
    }

    /// Cancel a subscription. Idempotent: cancelling an absent or settled
    /// row reports success without side effects.
    ///
    /// The transaction that deletes the last pending subscription counts
    /// the survivors; only the observer of zero stops the daemon, and it
    /// re-checks the count just before the call so a subscriber arriving
    /// in between is not stranded.
    ///
    /// # Errors
    ///
    /// Returns an error when the catalog transaction fails.
    pub async fn cancel_subscription(&self, user_id: i64, subscription_id: i64) -> CoreResult<bool> {
        let Some(subscription) = self.db.subscriptions().get(subscription_id).await? else {
            return Ok(true);
        };
        if subscription.owner_id != user_id {
            return Ok(false);
        }
        let task_id = subscription.task_id;
        let was_pending = subscription.subscription_status() == SubscriptionStatus::Pending;

        let Some(remaining) = self
            .db
            .subscriptions()
            .delete_and_count_pending(subscription_id, user_id)
            .await?
        else {
            // A concurrent cancel already removed the row.
            return Ok(true);
        };

        if was_pending {
            self.db
                .history()
                .append(
                    user_id,
                    &subscription_task_uri(self, task_id).await,
                    None,
                    0,
                    "failed",
                    Some(CANCELED_DISPLAY),
                )
                .await
                .unwrap_or_else(|error| debug!(%error, "history append failed"));
        }

        if was_pending && remaining == 0 {
            self.stop_abandoned_task(task_id).await?;
        }

        self.broadcast_task(task_id, true).await;
        Ok(true)
    }

    /// Stop a task whose last pending subscriber just cancelled.
    async fn stop_abandoned_task(&self, task_id: i64) -> CoreResult<()> {
        let lock = self.state.task_lock(task_id);
        let _guard = lock.lock().await;

        // Re-check under the lock: a new subscriber may have arrived
        // between the delete and this point.
        if self
            .db
            .subscriptions()
            .count_pending_for_task(task_id)
            .await?
            > 0
        {
            debug!(task_id, "new subscriber arrived, task survives cancellation");
            return Ok(());
        }

        let Some(task) = self.db.tasks().get(task_id).await? else {
            return Ok(());
        };
        if task.task_status().is_terminal() {
            return Ok(());
        }

        if let Some(gid) = task.gid.as_deref() {
            let daemon = self.daemon().await;
            // Both calls are attempted; either may fail harmlessly when
            // the daemon already dropped the transfer.
            if let Err(error) = daemon.force_remove(gid).await {
                debug!(task_id, gid, %error, "force remove failed");
            }
            if let Err(error) = daemon.remove_download_result(gid).await {
                debug!(task_id, gid, %error, "remove download result failed");
            }
        }

        self.db.tasks().mark_canceled(task_id, CANCELED_DISPLAY).await?;
        self.store.cleanup_task_dir(task_id).await;
        self.state.forget_task_lock(task_id);
        info!(task_id, "task stopped after last subscriber cancelled");
        Ok(())
    }

    /// Remove a user's settled subscriptions.
    ///
    /// # Errors
    ///
    /// Returns an error when the catalog delete fails.
    pub async fn clear_terminated(&self, user_id: i64) -> CoreResult<u64> {
        Ok(self.db.subscriptions().clear_terminated(user_id).await?)
    }

    /// Push the current view of a task to every subscriber's live
    /// channels. `force` bypasses the progress throttle for terminal
    /// transitions.
    ///
    /// The throttle slot is claimed once per task so every subscriber of
    /// a shared task sees the same ticks.
    pub(crate) async fn broadcast_task(&self, task_id: i64, force: bool) {
        if !self.hub.should_broadcast(task_id, force) {
            return;
        }
        let Ok(Some(task)) = self.db.tasks().get(task_id).await else {
            warn!(task_id, "broadcast skipped, task missing");
            return;
        };
        let Ok(subscriptions) = self.db.subscriptions().list_for_task(task_id).await else {
            return;
        };

        for subscription in subscriptions {
            let update = build_update(&subscription, &task);
            self.hub.send_task_update(
                subscription.owner_id,
                OutboundMessage::TaskUpdate { task: update },
            );
        }
        if force {
            self.hub.clear_throttle(task_id);
        }
    }
}

async fn subscription_task_uri(orchestrator: &Orchestrator, task_id: i64) -> String {
    orchestrator
        .db
        .tasks()
        .get(task_id)
        .await
        .ok()
        .flatten()
        .map_or_else(String::new, |task| task.uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_subscriptions_override_the_task_status() {
        assert_eq!(
            effective_status(SubscriptionStatus::Failed, TaskStatus::Complete),
            "error"
        );
        assert_eq!(
            effective_status(SubscriptionStatus::Success, TaskStatus::Error),
            "complete"
        );
    }

    #[test]
    fn pending_subscriptions_mirror_the_task() {
        assert_eq!(
            effective_status(SubscriptionStatus::Pending, TaskStatus::Queued),
            "queued"
        );
        assert_eq!(
            effective_status(SubscriptionStatus::Pending, TaskStatus::Active),
            "active"
        );
        assert_eq!(
            effective_status(SubscriptionStatus::Pending, TaskStatus::Removed),
            "error"
        );
    }

    #[test]
    fn filters_partition_by_effective_status() {
        let update = |status: &str| TaskUpdate {
            id: 1,
            name: None,
            uri: String::new(),
            status: status.to_string(),
            total_length: 0,
            completed_length: 0,
            download_speed: 0,
            upload_speed: 0,
            frozen_space: 0,
            error: None,
            created_at: chrono::Utc::now(),
        };

        assert!(matches_filter(&update("active"), ListFilter::Active));
        assert!(matches_filter(&update("queued"), ListFilter::Current));
        assert!(matches_filter(&update("paused"), ListFilter::Current));
        assert!(!matches_filter(&update("complete"), ListFilter::Current));
        assert!(matches_filter(&update("complete"), ListFilter::Complete));
        assert!(matches_filter(&update("error"), ListFilter::Error));
    }
}
