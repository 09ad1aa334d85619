//! Row types and status enums for the shared download catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a shared download task. The task reflects the daemon; the
/// per-user view is derived from the subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet submitted or waiting in the daemon queue.
    Queued,
    /// Transfer running.
    Active,
    /// Transfer paused.
    Paused,
    /// Terminal success; `stored_file_id` is set.
    Complete,
    /// Terminal failure or cancellation.
    Error,
    /// Completed artifact vanished from disk; kept for audit.
    Removed,
}

impl TaskStatus {
    /// Stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Removed => "removed",
        }
    }

    /// Parse a storage label, tolerating unknown values as `Error`.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label {
            "queued" => Self::Queued,
            "active" => Self::Active,
            "paused" => Self::Paused,
            "complete" => Self::Complete,
            "removed" => Self::Removed,
            "error" => Self::Error,
            other => {
                tracing::warn!(status = %other, "unknown task status in catalog");
                Self::Error
            }
        }
    }

    /// Whether no further daemon transitions are expected.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Removed)
    }
}

/// Lifecycle of one user's participation in a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Waiting on the shared task.
    Pending,
    /// The user holds a reference to the completed artifact.
    Success,
    /// The subscription failed or was cancelled.
    Failed,
}

impl SubscriptionStatus {
    /// Stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Parse a storage label, tolerating unknown values as `Failed`.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label {
            "pending" => Self::Pending,
            "success" => Self::Success,
            "failed" => Self::Failed,
            other => {
                tracing::warn!(status = %other, "unknown subscription status in catalog");
                Self::Failed
            }
        }
    }
}

/// One shared download task row.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Surrogate key.
    pub id: i64,
    /// Deduplication fingerprint, unique.
    pub uri_hash: String,
    /// Credential-masked submission URI.
    pub uri: String,
    /// Daemon handle; null before submission and after cancellation.
    pub gid: Option<String>,
    /// Storage label for [`TaskStatus`].
    pub status: String,
    /// Display name.
    pub name: Option<String>,
    /// Total payload size, zero while unknown.
    pub total_length: i64,
    /// Bytes completed.
    pub completed_length: i64,
    /// Current download rate.
    pub download_speed: i64,
    /// Current upload rate.
    pub upload_speed: i64,
    /// Highest observed download rate; never decreases.
    pub peak_download_speed: i64,
    /// Highest observed connection count; never decreases.
    pub peak_connections: i64,
    /// Raw daemon error, for operators.
    pub error: Option<String>,
    /// Translated user-facing error.
    pub error_display: Option<String>,
    /// Attached artifact; set at most once.
    pub stored_file_id: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    /// Typed status.
    #[must_use]
    pub fn task_status(&self) -> TaskStatus {
        TaskStatus::parse(&self.status)
    }
}

/// One user subscription row.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    /// Surrogate key.
    pub id: i64,
    /// Owning user.
    pub owner_id: i64,
    /// Task being shared.
    pub task_id: i64,
    /// Bytes reserved against the user's quota while pending.
    pub frozen_space: i64,
    /// Storage label for [`SubscriptionStatus`].
    pub status: String,
    /// User-facing failure description.
    pub error_display: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRow {
    /// Typed status.
    #[must_use]
    pub fn subscription_status(&self) -> SubscriptionStatus {
        SubscriptionStatus::parse(&self.status)
    }
}

/// A subscription joined with its task, for client-facing listings.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionListing {
    /// Subscription surrogate key.
    pub id: i64,
    /// Owning user.
    pub owner_id: i64,
    /// Task surrogate key.
    pub task_id: i64,
    /// Subscription status label.
    pub status: String,
    /// Bytes reserved while pending.
    pub frozen_space: i64,
    /// Subscription failure description.
    pub error_display: Option<String>,
    /// Subscription creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Task status label.
    pub task_status: String,
    /// Credential-masked URI.
    pub uri: String,
    /// Display name.
    pub name: Option<String>,
    /// Total payload size.
    pub total_length: i64,
    /// Bytes completed.
    pub completed_length: i64,
    /// Current download rate.
    pub download_speed: i64,
    /// Current upload rate.
    pub upload_speed: i64,
    /// Task-level user-facing error.
    pub task_error_display: Option<String>,
}

/// One content-addressed artifact row.
#[derive(Debug, Clone, FromRow)]
pub struct StoredFileRow {
    /// Surrogate key.
    pub id: i64,
    /// Content digest, unique.
    pub content_hash: String,
    /// Absolute path of the stored artifact.
    pub real_path: String,
    /// Artifact size in bytes.
    pub size: i64,
    /// Whether the artifact is a directory tree.
    pub is_directory: bool,
    /// Name the artifact arrived under.
    pub original_name: String,
    /// Live reference count; the row dies when it reaches zero.
    pub ref_count: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// One user reference to a stored artifact.
#[derive(Debug, Clone, FromRow)]
pub struct UserFileRow {
    /// Surrogate key.
    pub id: i64,
    /// Owning user.
    pub owner_id: i64,
    /// Referenced artifact.
    pub stored_file_id: i64,
    /// Display name chosen for this user.
    pub display_name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// One audit record of a terminated subscription.
#[derive(Debug, Clone, FromRow)]
pub struct TaskHistoryRow {
    /// Surrogate key.
    pub id: i64,
    /// Owning user.
    pub owner_id: i64,
    /// Credential-masked URI, retained for retry.
    pub uri: String,
    /// Display name at termination.
    pub name: Option<String>,
    /// Total payload size at termination.
    pub total_length: i64,
    /// Final subscription status label.
    pub final_status: String,
    /// Failure description, when failed.
    pub error_display: Option<String>,
    /// Record timestamp.
    pub created_at: DateTime<Utc>,
}

/// Metadata fields refreshed from a daemon snapshot.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshotUpdate {
    /// Display name, when known.
    pub name: Option<String>,
    /// Total payload size.
    pub total_length: i64,
    /// Bytes completed.
    pub completed_length: i64,
    /// Current download rate.
    pub download_speed: i64,
    /// Current upload rate.
    pub upload_speed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_round_trips() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Active,
            TaskStatus::Paused,
            TaskStatus::Complete,
            TaskStatus::Error,
            TaskStatus::Removed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), status);
        }
        assert_eq!(TaskStatus::parse("mystery"), TaskStatus::Error);
    }

    #[test]
    fn terminal_statuses_are_exactly_three() {
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(TaskStatus::Removed.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Active.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
    }

    #[test]
    fn subscription_status_round_trips() {
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Success,
            SubscriptionStatus::Failed,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), status);
        }
        assert_eq!(
            SubscriptionStatus::parse("mystery"),
            SubscriptionStatus::Failed
        );
    }
}
