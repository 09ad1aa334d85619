//! Submission path: fingerprint, admit, subscribe, submit.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use manifold_daemon::{TransferOptions, mask_url_credentials};
use manifold_data::{SubscriptionRow, TaskRow, TaskStatus};
use manifold_events::TaskUpdate;
use manifold_hash::SubmissionKind;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::orchestrator::Orchestrator;

/// Placeholder URI stored for raw torrent submissions.
const TORRENT_URI: &str = "[torrent]";

/// Display message written when the daemon rejects a submission.
const SUBMIT_FAILED_DISPLAY: &str = "submit failed";

/// Authenticated caller identity, supplied by the session layer.
#[derive(Debug, Clone, Copy)]
pub struct UserContext {
    /// Stable user identifier.
    pub user_id: i64,
    /// Configured quota in bytes.
    pub quota: i64,
}

/// What the user submitted.
#[derive(Debug, Clone)]
pub enum SubmissionSource {
    /// A magnet link or HTTP(S)/FTP URL.
    Uri(String),
    /// Base64-encoded torrent metainfo.
    TorrentBlob(String),
}

/// One submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Caller identity.
    pub user: UserContext,
    /// Submitted source.
    pub source: SubmissionSource,
}

/// Fingerprinted, probed form of a submission, ready for admission.
struct PreparedSubmission {
    uri_hash: String,
    display_uri: String,
    name: Option<String>,
    known_size: Option<i64>,
    daemon_uri: Option<String>,
    torrent_blob: Option<String>,
}

impl Orchestrator {
    /// Submit a download on behalf of a user.
    ///
    /// Deduplicates by fingerprint: the first subscriber creates the
    /// shared task and submits it to the daemon; later subscribers join
    /// the running transfer. Returns the caller's subscription view.
    ///
    /// # Errors
    ///
    /// Rejections (`is_rejection`) map to client errors: bad fingerprints,
    /// blocked targets, size or quota denials, and duplicate ownership of
    /// a completed artifact. Daemon and catalog failures surface as
    /// internal errors.
    pub async fn submit(&self, request: SubmitRequest) -> CoreResult<TaskUpdate> {
        let user = request.user;
        let prepared = self.prepare(&request).await?;

        // Freeze decisions run under the user's advisory lock so a burst
        // of submissions cannot all admit against the same availability.
        let user_lock = self.state.user_lock(user.user_id);
        let guard = user_lock.lock().await;

        let space = self.space_info(user.user_id, user.quota).await?;
        let frozen_space = match prepared.known_size {
            Some(size) => {
                self.admit_known_size(space, size).await?;
                size
            }
            None => {
                Self::admit_unknown_size(space)?;
                0
            }
        };

        let (task, mut is_new) = self
            .db
            .tasks()
            .find_or_create(
                &prepared.uri_hash,
                &prepared.display_uri,
                prepared.name.as_deref(),
                prepared.known_size.unwrap_or(0),
            )
            .await?;

        match task.task_status() {
            TaskStatus::Complete => {
                drop(guard);
                return self.join_completed_task(user, &task, &prepared).await;
            }
            TaskStatus::Error => {
                // A failed task is retried by its next subscriber, but only
                // once every previous participant has reached a terminal
                // state.
                let pending = self
                    .db
                    .subscriptions()
                    .count_pending_for_task(task.id)
                    .await?;
                if pending == 0 && self.db.tasks().reset_for_retry(task.id).await? {
                    info!(task_id = task.id, "errored task reset for retry");
                    is_new = true;
                }
            }
            _ => {}
        }

        let (subscription, _created) = self
            .db
            .subscriptions()
            .create(user.user_id, task.id, frozen_space)
            .await?;
        drop(guard);

        if is_new {
            self.submit_to_daemon(&task, &prepared).await?;
        }

        self.broadcast_task(task.id, false).await;
        self.subscription_view(&subscription).await
    }

    /// Fingerprint and probe a submission.
    async fn prepare(&self, request: &SubmitRequest) -> CoreResult<PreparedSubmission> {
        match &request.source {
            SubmissionSource::TorrentBlob(blob_b64) => {
                let raw = BASE64
                    .decode(blob_b64.as_bytes())
                    .map_err(|_| CoreError::InvalidTorrentEncoding)?;
                let uri_hash = manifold_hash::info_hash_from_torrent(&raw)?;
                Ok(PreparedSubmission {
                    uri_hash,
                    display_uri: TORRENT_URI.to_string(),
                    name: None,
                    known_size: None,
                    daemon_uri: None,
                    torrent_blob: Some(blob_b64.clone()),
                })
            }
            SubmissionSource::Uri(uri) => self.prepare_uri(uri).await,
        }
    }

    async fn prepare_uri(&self, uri: &str) -> CoreResult<PreparedSubmission> {
        let kind = SubmissionKind::classify(uri)?;
        match kind {
            SubmissionKind::Magnet => {
                let uri_hash = manifold_hash::info_hash_from_magnet(uri)?;
                Ok(PreparedSubmission {
                    uri_hash,
                    display_uri: uri.to_string(),
                    name: None,
                    known_size: None,
                    daemon_uri: Some(uri.to_string()),
                    torrent_blob: None,
                })
            }
            SubmissionKind::Http => {
                manifold_probe::check_submission_target(uri).await?;
                let probe = self.prober.probe(uri).await;

                // A failed probe is not a rejection: the size stays
                // unknown and the late reveal re-admits.
                let final_url = probe
                    .final_url
                    .clone()
                    .filter(|_| probe.ok)
                    .unwrap_or_else(|| uri.to_string());
                let known_size = probe
                    .content_length
                    .filter(|_| probe.ok)
                    .and_then(|length| i64::try_from(length).ok())
                    .filter(|length| *length > 0);

                Ok(PreparedSubmission {
                    uri_hash: manifold_hash::url_hash(&final_url),
                    display_uri: mask_url_credentials(&final_url),
                    name: probe.filename,
                    known_size,
                    daemon_uri: Some(final_url),
                    torrent_blob: None,
                })
            }
            SubmissionKind::Ftp | SubmissionKind::Torrent => {
                manifold_probe::check_submission_target(uri).await?;
                Ok(PreparedSubmission {
                    uri_hash: manifold_hash::url_hash(uri),
                    display_uri: mask_url_credentials(uri),
                    name: None,
                    known_size: None,
                    daemon_uri: Some(uri.to_string()),
                    torrent_blob: None,
                })
            }
        }
    }

    /// Join a task that already finished: hand the caller a reference to
    /// the stored artifact without another daemon run.
    async fn join_completed_task(
        &self,
        user: UserContext,
        task: &TaskRow,
        prepared: &PreparedSubmission,
    ) -> CoreResult<TaskUpdate> {
        let Some(stored_file_id) = task.stored_file_id else {
            // Completion handler still in flight; a plain subscription
            // settles when it lands.
            let (subscription, _created) = self
                .db
                .subscriptions()
                .create(user.user_id, task.id, 0)
                .await?;
            return self.subscription_view(&subscription).await;
        };

        if self
            .db
            .files()
            .user_has_reference(user.user_id, stored_file_id)
            .await?
        {
            return Err(CoreError::AlreadyOwned);
        }

        if let Some(stored) = self.db.files().get(stored_file_id).await? {
            let space = self.space_info(user.user_id, user.quota).await?;
            self.admit_known_size(space, stored.size).await?;
        }

        let (subscription, _created) = self
            .db
            .subscriptions()
            .create(user.user_id, task.id, 0)
            .await?;
        let display = task.name.as_deref().or(prepared.name.as_deref());
        self.store
            .create_user_reference(user.user_id, stored_file_id, display)
            .await?;
        self.db.subscriptions().mark_success(subscription.id).await?;
        info!(
            user_id = user.user_id,
            task_id = task.id,
            "joined completed task via stored artifact"
        );

        let settled = self
            .db
            .subscriptions()
            .get(subscription.id)
            .await?
            .unwrap_or(subscription);
        self.subscription_view(&settled).await
    }

    /// Hand a new task to the daemon, writing back the assigned handle.
    ///
    /// The per-task advisory lock serialises submission; the re-check
    /// under the lock keeps a racing resetter or canceller from causing a
    /// duplicate daemon transfer.
    async fn submit_to_daemon(
        &self,
        task: &TaskRow,
        prepared: &PreparedSubmission,
    ) -> CoreResult<()> {
        let lock = self.state.task_lock(task.id);
        let _guard = lock.lock().await;

        let Some(current) = self.db.tasks().get(task.id).await? else {
            return Ok(());
        };
        if current.task_status() != TaskStatus::Queued || current.gid.is_some() {
            return Ok(());
        }
        if self
            .db
            .subscriptions()
            .count_pending_for_task(task.id)
            .await?
            == 0
        {
            return Ok(());
        }

        let options = TransferOptions {
            dir: self
                .store
                .layout()
                .task_download_dir(task.id)
                .to_string_lossy()
                .into_owned(),
            out: None,
        };

        let daemon = self.daemon().await;
        let submitted = match (&prepared.torrent_blob, &prepared.daemon_uri) {
            (Some(blob), _) => daemon.add_torrent(blob, options).await,
            (None, Some(uri)) => daemon.add_uri(&[uri.clone()], options).await,
            (None, None) => return Ok(()),
        };

        match submitted {
            Ok(gid) => {
                self.db.tasks().assign_gid(task.id, &gid).await?;
                info!(task_id = task.id, %gid, "task submitted to daemon");
                Ok(())
            }
            Err(source) => {
                warn!(task_id = task.id, error = %source, "daemon submission failed");
                self.db
                    .tasks()
                    .mark_error(task.id, Some(&source.to_string()), Some(SUBMIT_FAILED_DISPLAY))
                    .await?;
                Err(CoreError::SubmitFailed { source })
            }
        }
    }

    /// Build the caller-facing view for one subscription row.
    pub(crate) async fn subscription_view(
        &self,
        subscription: &SubscriptionRow,
    ) -> CoreResult<TaskUpdate> {
        let task = self
            .db
            .tasks()
            .get(subscription.task_id)
            .await?
            .ok_or(CoreError::Inconsistent {
                detail: "subscription references a missing task",
            })?;
        Ok(crate::view::build_update(subscription, &task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrent_placeholder_is_stable() {
        assert_eq!(TORRENT_URI, "[torrent]");
    }

    #[test]
    fn submission_source_carries_payloads() {
        let uri = SubmissionSource::Uri("magnet:?xt=urn:btih:abc".to_string());
        assert!(matches!(uri, SubmissionSource::Uri(_)));
        let blob = SubmissionSource::TorrentBlob("ZA==".to_string());
        assert!(matches!(blob, SubmissionSource::TorrentBlob(_)));
    }
}
