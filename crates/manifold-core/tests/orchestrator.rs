//! End-to-end orchestration scenarios against a scripted daemon stub.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use manifold_config::{ConfigService, Settings};
use manifold_core::{
    MAGNET_MIN_SPACE, Orchestrator, QuotaProvider, SubmissionSource, SubmitRequest, UserContext,
};
use manifold_daemon::{
    DaemonError, DaemonResult, DaemonRpc, DownloadState, DownloadStatus, NotificationKind,
    StatusFile, TransferOptions, VersionInfo,
};
use manifold_data::{Db, SubscriptionStatus, TaskStatus};
use manifold_events::PeerHub;
use manifold_probe::Prober;
use manifold_store::{ContentStore, StoreLayout};

const GIB: i64 = 1024 * 1024 * 1024;
const MIB: i64 = 1024 * 1024;

/// Scripted daemon: canned statuses per gid, recorded calls, sequential
/// gid assignment.
#[derive(Default)]
struct ScriptedDaemon {
    statuses: Mutex<HashMap<String, DownloadStatus>>,
    calls: Mutex<Vec<String>>,
    next_gid: Mutex<u32>,
}

impl ScriptedDaemon {
    fn set_status(&self, gid: &str, status: DownloadStatus) {
        self.statuses.lock().unwrap().insert(gid.to_string(), status);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl DaemonRpc for ScriptedDaemon {
    async fn add_uri(&self, uris: &[String], _options: TransferOptions) -> DaemonResult<String> {
        let mut next = self.next_gid.lock().unwrap();
        *next += 1;
        let gid = format!("gid-{next}");
        self.record(format!("add_uri:{}:{gid}", uris[0]));
        Ok(gid)
    }

    async fn add_torrent(&self, _blob: &str, _options: TransferOptions) -> DaemonResult<String> {
        let mut next = self.next_gid.lock().unwrap();
        *next += 1;
        let gid = format!("gid-{next}");
        self.record(format!("add_torrent:{gid}"));
        Ok(gid)
    }

    async fn tell_status(&self, gid: &str) -> DaemonResult<DownloadStatus> {
        self.record(format!("tell_status:{gid}"));
        self.statuses
            .lock()
            .unwrap()
            .get(gid)
            .cloned()
            .ok_or_else(|| DaemonError::Rpc {
                method: "aria2.tellStatus",
                code: 1,
                message: format!("{gid} is not found"),
            })
    }

    async fn force_remove(&self, gid: &str) -> DaemonResult<()> {
        self.record(format!("force_remove:{gid}"));
        Ok(())
    }

    async fn remove_download_result(&self, gid: &str) -> DaemonResult<()> {
        self.record(format!("remove_download_result:{gid}"));
        Ok(())
    }

    async fn get_version(&self) -> DaemonResult<VersionInfo> {
        Ok(VersionInfo {
            version: "1.37.0".to_string(),
            enabled_features: vec!["BitTorrent".to_string()],
        })
    }
}

struct MappedQuota {
    quotas: HashMap<i64, i64>,
}

#[async_trait]
impl QuotaProvider for MappedQuota {
    async fn quota_for(&self, user_id: i64) -> i64 {
        self.quotas.get(&user_id).copied().unwrap_or(0)
    }
}

struct Fixture {
    orchestrator: Arc<Orchestrator>,
    daemon: Arc<ScriptedDaemon>,
    db: Db,
    layout: StoreLayout,
    _root: tempfile::TempDir,
}

async fn fixture(quotas: &[(i64, i64)]) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(root.path().join("downloads"));
    layout.ensure().unwrap();

    let db = Db::connect("sqlite::memory:").await.unwrap();
    // Admission math in these scenarios is quota-driven; zero the disk
    // reserve so the test host's free space never participates.
    db.config().set("min_free_disk", "0").await.unwrap();
    let daemon = Arc::new(ScriptedDaemon::default());
    let orchestrator = Orchestrator::new(
        db.clone(),
        ContentStore::new(layout.clone(), db.clone()),
        PeerHub::new(),
        ConfigService::new(Settings::default(), db.config()),
        Prober::new(Duration::from_secs(5)).unwrap(),
        Arc::new(MappedQuota {
            quotas: quotas.iter().copied().collect(),
        }),
        daemon.clone(),
    );

    Fixture {
        orchestrator,
        daemon,
        db,
        layout,
        _root: root,
    }
}

fn magnet(seed: u8) -> String {
    let hash: String = (0..20).map(|i| format!("{:02x}", seed.wrapping_add(i))).collect();
    format!("magnet:?xt=urn:btih:{hash}")
}

fn user(user_id: i64, quota: i64) -> UserContext {
    UserContext { user_id, quota }
}

fn submit(user: UserContext, uri: &str) -> SubmitRequest {
    SubmitRequest {
        user,
        source: SubmissionSource::Uri(uri.to_string()),
    }
}

fn active_status(gid: &str, total: u64) -> DownloadStatus {
    let mut status = DownloadStatus::default();
    status.gid = gid.to_string();
    status.status = DownloadState::Active;
    status.total_length = total;
    status
}

#[tokio::test]
async fn shared_download_two_subscribers_one_task() {
    let fx = fixture(&[(1, 100 * GIB), (2, 100 * GIB)]).await;
    let magnet_uri = magnet(0x10);

    let view_a = fx
        .orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let view_b = fx
        .orchestrator
        .submit(submit(user(2, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    assert_eq!(view_a.status, "queued");
    assert_eq!(view_b.status, "queued");

    // One task, one daemon submission.
    let adds = fx
        .daemon
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("add_uri"))
        .count();
    assert_eq!(adds, 1);

    let task = fx
        .db
        .tasks()
        .find_by_gid("gid-1")
        .await
        .unwrap()
        .expect("task submitted with first gid");
    assert_eq!(
        fx.db
            .subscriptions()
            .count_pending_for_task(task.id)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn completion_settles_both_subscribers_with_one_stored_file() {
    let fx = fixture(&[(1, 100 * GIB), (2, 100 * GIB)]).await;
    let magnet_uri = magnet(0x20);

    fx.orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    fx.orchestrator
        .submit(submit(user(2, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    // The daemon finished writing the payload into the task directory.
    let task_dir = fx.layout.task_download_dir(task.id);
    std::fs::create_dir_all(&task_dir).unwrap();
    let payload = task_dir.join("x.zip");
    std::fs::write(&payload, b"shared-payload").unwrap();

    let mut status = active_status("gid-1", 14);
    status.status = DownloadState::Complete;
    status.completed_length = 14;
    status.files = vec![StatusFile {
        path: payload.to_string_lossy().into_owned(),
        length: 14,
    }];
    fx.daemon.set_status("gid-1", status);

    fx.orchestrator
        .handle_event("gid-1", NotificationKind::Complete)
        .await;

    let task = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), TaskStatus::Complete);
    let stored_file_id = task.stored_file_id.expect("artifact attached");

    let stored = fx.db.files().get(stored_file_id).await.unwrap().unwrap();
    assert_eq!(stored.ref_count, 2, "one reference per subscriber");

    for owner in [1, 2] {
        let sub = fx.db.subscriptions().find(owner, task.id).await.unwrap().unwrap();
        assert_eq!(sub.subscription_status(), SubscriptionStatus::Success);
        assert_eq!(sub.frozen_space, 0);
        assert!(fx.db.files().user_has_reference(owner, stored_file_id).await.unwrap());
    }

    assert!(!task_dir.exists(), "task download directory removed");
}

#[tokio::test]
async fn duplicate_complete_events_have_one_effect() {
    let fx = fixture(&[(1, 100 * GIB)]).await;
    let magnet_uri = magnet(0x30);

    fx.orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    let task_dir = fx.layout.task_download_dir(task.id);
    std::fs::create_dir_all(&task_dir).unwrap();
    let payload = task_dir.join("dup.bin");
    std::fs::write(&payload, b"dup-payload").unwrap();

    let mut status = active_status("gid-1", 11);
    status.status = DownloadState::Complete;
    status.files = vec![StatusFile {
        path: payload.to_string_lossy().into_owned(),
        length: 11,
    }];
    fx.daemon.set_status("gid-1", status);

    let mut handles = Vec::new();
    for _ in 0..3 {
        let orchestrator = Arc::clone(&fx.orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator.handle_event("gid-1", NotificationKind::Complete).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let task = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    let stored_file_id = task.stored_file_id.unwrap();
    let stored = fx.db.files().get(stored_file_id).await.unwrap().unwrap();
    assert_eq!(stored.ref_count, 1);
    assert_eq!(
        fx.db.files().list_zero_ref().await.unwrap().len(),
        0,
        "exactly one stored file, exactly one reference"
    );
    assert!(!task_dir.exists());
}

#[tokio::test]
async fn late_size_reveal_splits_subscribers_by_quota() {
    // A has plenty; B has a 50 MiB quota with 45 MiB already frozen
    // elsewhere, so a 30 MiB reveal drops B. (MiB-scale so the test host's
    // actual free disk never gates admission.)
    let fx = fixture(&[(1, 100 * MIB), (2, 50 * MIB)]).await;
    let magnet_uri = magnet(0x40);

    fx.orchestrator
        .submit(submit(user(1, 100 * MIB), &magnet_uri))
        .await
        .unwrap();
    fx.orchestrator
        .submit(submit(user(2, 50 * MIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    // Freeze 45 MiB of B's quota on an unrelated task.
    let (other, _) = fx
        .db
        .tasks()
        .find_or_create("other-hash", "magnet:?xt=urn:btih:other", None, 0)
        .await
        .unwrap();
    let (other_sub, _) = fx.db.subscriptions().create(2, other.id, 0).await.unwrap();
    assert!(fx.db.subscriptions().freeze_space(other_sub.id, 45 * MIB).await.unwrap());

    fx.daemon.set_status("gid-1", active_status("gid-1", u64::try_from(30 * MIB).unwrap()));
    fx.orchestrator.handle_event("gid-1", NotificationKind::Start).await;

    let sub_a = fx.db.subscriptions().find(1, task.id).await.unwrap().unwrap();
    assert_eq!(sub_a.subscription_status(), SubscriptionStatus::Pending);
    assert_eq!(sub_a.frozen_space, 30 * MIB);

    let sub_b = fx.db.subscriptions().find(2, task.id).await.unwrap().unwrap();
    assert_eq!(sub_b.subscription_status(), SubscriptionStatus::Failed);
    assert_eq!(sub_b.frozen_space, 0);
    assert_eq!(
        sub_b.error_display.as_deref(),
        Some("user quota space insufficient")
    );

    let task = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), TaskStatus::Active, "task survives");
}

#[tokio::test]
async fn reveal_with_no_survivors_cancels_the_task() {
    let fx = fixture(&[(1, 5 * MIB), (2, 5 * MIB)]).await;
    let magnet_uri = magnet(0x50);

    fx.orchestrator
        .submit(submit(user(1, 5 * MIB), &magnet_uri))
        .await
        .unwrap();
    fx.orchestrator
        .submit(submit(user(2, 5 * MIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    fx.daemon.set_status("gid-1", active_status("gid-1", u64::try_from(30 * MIB).unwrap()));
    fx.orchestrator.handle_event("gid-1", NotificationKind::Start).await;

    let task = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), TaskStatus::Error);
    assert_eq!(
        task.error_display.as_deref(),
        Some("all subscribers out of space")
    );
    assert!(task.gid.is_none());

    let calls = fx.daemon.calls();
    assert!(calls.iter().any(|call| call == "force_remove:gid-1"));
    assert!(calls.iter().any(|call| call == "remove_download_result:gid-1"));

    for owner in [1, 2] {
        let sub = fx.db.subscriptions().find(owner, task.id).await.unwrap().unwrap();
        assert_eq!(sub.subscription_status(), SubscriptionStatus::Failed);
    }
}

#[tokio::test]
async fn external_stop_fails_subscribers_without_daemon_calls() {
    let fx = fixture(&[(1, 100 * GIB)]).await;
    let magnet_uri = magnet(0x60);

    fx.orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    let mut status = active_status("gid-1", 0);
    status.status = DownloadState::Removed;
    fx.daemon.set_status("gid-1", status);

    fx.orchestrator.handle_event("gid-1", NotificationKind::Stop).await;

    let task = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), TaskStatus::Error);
    assert_eq!(task.error_display.as_deref(), Some("externally canceled"));

    let sub = fx.db.subscriptions().find(1, task.id).await.unwrap().unwrap();
    assert_eq!(sub.subscription_status(), SubscriptionStatus::Failed);
    assert_eq!(sub.error_display.as_deref(), Some("externally canceled"));

    let calls = fx.daemon.calls();
    assert!(
        !calls.iter().any(|call| call.starts_with("force_remove")),
        "external cancel must not issue removal RPCs"
    );
}

#[tokio::test]
async fn bt_metadata_completion_swaps_the_gid_without_completing() {
    let fx = fixture(&[(1, 100 * GIB)]).await;
    let magnet_uri = magnet(0x70);

    fx.orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    let mut metadata = active_status("gid-1", 0);
    metadata.status = DownloadState::Complete;
    metadata.followed_by = vec!["gid-real".to_string()];
    fx.daemon.set_status("gid-1", metadata);

    fx.orchestrator.handle_event("gid-1", NotificationKind::Complete).await;

    let task = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task.gid.as_deref(), Some("gid-real"));
    assert_ne!(task.task_status(), TaskStatus::Complete);
    assert!(task.stored_file_id.is_none());
}

#[tokio::test]
async fn unknown_gid_is_adopted_through_following_gid() {
    let fx = fixture(&[(1, 100 * GIB)]).await;
    let magnet_uri = magnet(0x80);

    fx.orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    // An event arrives for the successor gid before any swap happened.
    let mut status = active_status("gid-real", 1024);
    status.following_gid = Some("gid-1".to_string());
    fx.daemon.set_status("gid-real", status);

    fx.orchestrator.handle_event("gid-real", NotificationKind::Start).await;

    let task = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task.gid.as_deref(), Some("gid-real"));
    assert_eq!(task.task_status(), TaskStatus::Active);
}

#[tokio::test]
async fn magnet_admission_boundary_is_one_mebibyte() {
    let fx = fixture(&[(1, MAGNET_MIN_SPACE + 1), (2, MAGNET_MIN_SPACE - 1)]).await;

    let accepted = fx
        .orchestrator
        .submit(submit(user(1, MAGNET_MIN_SPACE + 1), &magnet(0x90)))
        .await;
    assert!(accepted.is_ok());

    let rejected = fx
        .orchestrator
        .submit(submit(user(2, MAGNET_MIN_SPACE - 1), &magnet(0x91)))
        .await
        .unwrap_err();
    assert!(rejected.is_rejection());
}

#[tokio::test]
async fn errored_task_resets_for_a_new_subscriber() {
    let fx = fixture(&[(1, 100 * GIB), (3, 100 * GIB)]).await;
    let magnet_uri = magnet(0xa0);

    fx.orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    // The transfer fails; the lone subscription settles as failed.
    let mut status = active_status("gid-1", 0);
    status.status = DownloadState::Error;
    status.error_message = Some("errorCode=2 timeout".to_string());
    fx.daemon.set_status("gid-1", status);
    fx.orchestrator.handle_event("gid-1", NotificationKind::Error).await;

    let task_after = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task_after.task_status(), TaskStatus::Error);
    assert_eq!(task_after.error_display.as_deref(), Some("network timeout"));

    // A new subscriber arrives: zero pending, so the task resets and is
    // resubmitted with a fresh handle.
    fx.orchestrator
        .submit(submit(user(3, 100 * GIB), &magnet_uri))
        .await
        .unwrap();

    let task_retried = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task_retried.gid.as_deref(), Some("gid-2"));
    assert!(task_retried.error.is_none());
    assert!(task_retried.error_display.is_none());

    let adds = fx
        .daemon
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("add_uri"))
        .count();
    assert_eq!(adds, 2);
}

#[tokio::test]
async fn last_subscriber_cancel_stops_the_daemon_task() {
    let fx = fixture(&[(1, 100 * GIB), (2, 100 * GIB)]).await;
    let magnet_uri = magnet(0xb0);

    let view_a = fx
        .orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let view_b = fx
        .orchestrator
        .submit(submit(user(2, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    assert!(fx.orchestrator.cancel_subscription(1, view_a.id).await.unwrap());
    let calls = fx.daemon.calls();
    assert!(
        !calls.iter().any(|call| call.starts_with("force_remove")),
        "task still has a pending subscriber"
    );

    assert!(fx.orchestrator.cancel_subscription(2, view_b.id).await.unwrap());
    let calls = fx.daemon.calls();
    assert!(calls.iter().any(|call| call == "force_remove:gid-1"));

    let task = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), TaskStatus::Error);

    // Cancelling again is an idempotent success.
    assert!(fx.orchestrator.cancel_subscription(2, view_b.id).await.unwrap());
}

#[tokio::test]
async fn poll_failure_marks_the_task_with_raw_error_only() {
    let fx = fixture(&[(1, 100 * GIB)]).await;
    let magnet_uri = magnet(0xc0);

    fx.orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    // No scripted status for the gid: tell_status errors.
    fx.orchestrator.poll_once().await;

    let task = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), TaskStatus::Error);
    assert!(task.error.is_some());
    assert!(task.error_display.is_none(), "display is derived lazily");
}

#[tokio::test]
async fn poll_tracks_peaks_monotonically() {
    let fx = fixture(&[(1, 100 * GIB)]).await;
    let magnet_uri = magnet(0xd0);

    fx.orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    let mut fast = active_status("gid-1", 1024);
    fast.download_speed = 900;
    fast.connections = 12;
    fx.daemon.set_status("gid-1", fast);
    fx.orchestrator.poll_once().await;

    let mut slow = active_status("gid-1", 1024);
    slow.download_speed = 100;
    slow.connections = 2;
    fx.daemon.set_status("gid-1", slow);
    fx.orchestrator.poll_once().await;

    let task = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task.peak_download_speed, 900);
    assert_eq!(task.peak_connections, 12);
    assert_eq!(task.download_speed, 100, "current speed still tracks");
}

#[tokio::test]
async fn orphan_sweep_flags_vanished_artifacts() {
    let fx = fixture(&[(1, 100 * GIB)]).await;
    let magnet_uri = magnet(0xe0);

    fx.orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    let task_dir = fx.layout.task_download_dir(task.id);
    std::fs::create_dir_all(&task_dir).unwrap();
    let payload = task_dir.join("gone.bin");
    std::fs::write(&payload, b"soon-gone").unwrap();

    let mut status = active_status("gid-1", 9);
    status.status = DownloadState::Complete;
    status.files = vec![StatusFile {
        path: payload.to_string_lossy().into_owned(),
        length: 9,
    }];
    fx.daemon.set_status("gid-1", status);
    fx.orchestrator.handle_event("gid-1", NotificationKind::Complete).await;

    let task_row = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    let stored = fx
        .db
        .files()
        .get(task_row.stored_file_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    std::fs::remove_file(&stored.real_path).unwrap();

    fx.orchestrator.poll_once().await;

    let task_row = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(task_row.task_status(), TaskStatus::Removed);
}

#[tokio::test]
async fn subscribing_to_a_completed_task_hands_over_a_reference() {
    let fx = fixture(&[(1, 100 * GIB), (2, 100 * GIB)]).await;
    let magnet_uri = magnet(0xf0);

    fx.orchestrator
        .submit(submit(user(1, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    let task = fx.db.tasks().find_by_gid("gid-1").await.unwrap().unwrap();

    let task_dir = fx.layout.task_download_dir(task.id);
    std::fs::create_dir_all(&task_dir).unwrap();
    let payload = task_dir.join("late.bin");
    std::fs::write(&payload, b"late-join").unwrap();

    let mut status = active_status("gid-1", 9);
    status.status = DownloadState::Complete;
    status.files = vec![StatusFile {
        path: payload.to_string_lossy().into_owned(),
        length: 9,
    }];
    fx.daemon.set_status("gid-1", status);
    fx.orchestrator.handle_event("gid-1", NotificationKind::Complete).await;

    // A second user submits the same fingerprint after completion.
    let view = fx
        .orchestrator
        .submit(submit(user(2, 100 * GIB), &magnet_uri))
        .await
        .unwrap();
    assert_eq!(view.status, "complete");

    let task_row = fx.db.tasks().get(task.id).await.unwrap().unwrap();
    let stored = fx
        .db
        .files()
        .get(task_row.stored_file_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.ref_count, 2);

    // And a third attempt by the same user is a duplicate-ownership
    // rejection.
    let err = fx
        .orchestrator
        .submit(submit(user(2, 100 * GIB), &magnet_uri))
        .await
        .unwrap_err();
    assert!(err.is_rejection());
}
