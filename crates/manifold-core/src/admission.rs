//! Quota and disk admission.
//!
//! `available = min(quota - used - frozen, machine_free)`. Known sizes are
//! gated at submission; unknown sizes (magnets, torrents, HTTP without a
//! length) are admitted with a small floor and re-admitted at the late
//! size reveal, when the daemon first reports a non-zero total.

use std::collections::HashMap;

use async_trait::async_trait;
use manifold_data::SubscriptionRow;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::orchestrator::Orchestrator;

/// Floor required to admit a submission whose size is still unknown.
pub const MAGNET_MIN_SPACE: i64 = 1024 * 1024;

/// Source of per-user quotas, supplied by the session layer.
///
/// Submission carries the caller's quota inline; the reconciler needs the
/// same number later, at the size reveal, when no session is on the stack.
#[async_trait]
pub trait QuotaProvider: Send + Sync {
    /// The configured quota for a user, in bytes.
    async fn quota_for(&self, user_id: i64) -> i64;
}

/// Fixed quota for every user; the default when no per-user source is
/// wired in.
#[derive(Debug, Clone, Copy)]
pub struct FlatQuota {
    /// Quota applied to every user.
    pub bytes: i64,
}

#[async_trait]
impl QuotaProvider for FlatQuota {
    async fn quota_for(&self, _user_id: i64) -> i64 {
        self.bytes
    }
}

/// Display message for a subscriber dropped at the late size reveal.
pub(crate) const SPACE_INSUFFICIENT_DISPLAY: &str = "user quota space insufficient";

/// Per-user space accounting snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceInfo {
    /// Configured quota in bytes.
    pub quota: i64,
    /// Bytes referenced through the user's stored files.
    pub used: i64,
    /// Bytes reserved by pending subscriptions.
    pub frozen: i64,
    /// Bytes the user may still commit.
    pub available: i64,
}

/// Outcome of re-admitting one task's subscribers after a size reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RevealOutcome {
    /// Subscribers that fit and keep the task alive.
    pub(crate) survivors: usize,
    /// Subscribers failed for lack of space.
    pub(crate) dropped: usize,
}

impl Orchestrator {
    /// Compute the space snapshot for a user.
    ///
    /// # Errors
    ///
    /// Returns an error when the catalog sums fail.
    pub async fn space_info(&self, user_id: i64, quota: i64) -> CoreResult<SpaceInfo> {
        let used = self.db.files().used_space(user_id).await?;
        let frozen = self.db.subscriptions().frozen_space(user_id).await?;
        // The configured floor stays off-limits: admission sees only the
        // disk above it.
        let reserve = self.config.min_free_disk().await?;
        let machine_free = i64::try_from(self.store.layout().machine_free())
            .unwrap_or(i64::MAX)
            .saturating_sub(reserve)
            .max(0);

        let quota_available = (quota - used - frozen).max(0);
        Ok(SpaceInfo {
            quota,
            used,
            frozen,
            available: quota_available.min(machine_free),
        })
    }

    /// Gate a known-size submission against the cap and the user's space.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TooLarge`] or [`CoreError::SpaceDenied`] on
    /// rejection.
    pub(crate) async fn admit_known_size(&self, space: SpaceInfo, size: i64) -> CoreResult<()> {
        let limit = self.config.max_task_size().await?;
        if size > limit {
            return Err(CoreError::TooLarge { size, limit });
        }
        if size > space.available {
            return Err(CoreError::SpaceDenied {
                needed: size,
                available: space.available,
            });
        }
        Ok(())
    }

    /// Gate an unknown-size submission: a small floor keeps obviously full
    /// users out; the real check happens at the late reveal.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SpaceDenied`] when even the floor is missing.
    pub(crate) fn admit_unknown_size(space: SpaceInfo) -> CoreResult<()> {
        if space.available >= MAGNET_MIN_SPACE {
            Ok(())
        } else {
            Err(CoreError::SpaceDenied {
                needed: MAGNET_MIN_SPACE,
                available: space.available,
            })
        }
    }

    /// Re-admit every pending subscriber of a task once its size is known.
    ///
    /// Survivors get their reservation written through a compare-and-swap
    /// guarded on `frozen_space = 0`, so a duplicate reveal cannot freeze
    /// twice. Within one pass, each admitted reservation is subtracted
    /// from that user's running availability before the next decision.
    ///
    /// # Errors
    ///
    /// Returns an error when a catalog operation fails.
    pub(crate) async fn readmit_on_reveal(
        &self,
        pending: &[SubscriptionRow],
        total_length: i64,
    ) -> CoreResult<RevealOutcome> {
        let mut survivors = 0_usize;
        let mut dropped = 0_usize;
        let mut running: HashMap<i64, i64> = HashMap::new();

        for subscription in pending {
            let owner_id = subscription.owner_id;

            // An earlier delivery of the same reveal already froze this
            // subscriber; re-admitting would double-count its own freeze.
            if subscription.frozen_space > 0 {
                survivors += 1;
                continue;
            }

            let lock = self.state.user_lock(owner_id);
            let _guard = lock.lock().await;

            let available = match running.entry(owner_id) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    let quota = self.quotas.quota_for(owner_id).await;
                    let info = self.space_info(owner_id, quota).await?;
                    entry.insert(info.available)
                }
            };

            if total_length <= *available {
                if self
                    .db
                    .subscriptions()
                    .freeze_space(subscription.id, total_length)
                    .await?
                {
                    *available -= total_length;
                }
                survivors += 1;
                info!(
                    subscription_id = subscription.id,
                    owner_id, total_length, "subscriber admitted at size reveal"
                );
            } else {
                self.db
                    .subscriptions()
                    .mark_failed(subscription.id, SPACE_INSUFFICIENT_DISPLAY)
                    .await?;
                dropped += 1;
                warn!(
                    subscription_id = subscription.id,
                    owner_id, total_length, "subscriber dropped at size reveal"
                );
            }
        }

        Ok(RevealOutcome { survivors, dropped })
    }
}
