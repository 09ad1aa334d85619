//! Wire payloads delivered to connected sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-subscription snapshot pushed after every reconciler state change.
///
/// `status` carries the per-user override: a failed subscription reads
/// `error` and a successful one reads `complete`, regardless of where the
/// shared task has moved since.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskUpdate {
    /// Subscription identifier the client acts on.
    pub id: i64,
    /// Display name for the transfer.
    pub name: Option<String>,
    /// Credential-masked submission URI.
    pub uri: String,
    /// Client-facing status string.
    pub status: String,
    /// Total payload size in bytes, zero while unknown.
    pub total_length: i64,
    /// Bytes completed so far.
    pub completed_length: i64,
    /// Current download rate in bytes per second.
    pub download_speed: i64,
    /// Current upload rate in bytes per second.
    pub upload_speed: i64,
    /// Bytes reserved against the user's quota while pending.
    pub frozen_space: i64,
    /// User-facing error description, when terminal with failure.
    pub error: Option<String>,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
}

/// Severity attached to an out-of-band notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Informational notice.
    Info,
    /// Something the user should look at.
    Warning,
    /// A failure the user must act on.
    Error,
}

/// Messages written to a client session channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A subscription state or progress change.
    TaskUpdate {
        /// Snapshot for the subscription that changed.
        task: TaskUpdate,
    },
    /// A free-form notice outside the task stream.
    Notification {
        /// Severity of the notice.
        level: NotificationLevel,
        /// Human-readable message.
        message: String,
    },
    /// Liveness heartbeat; clients may answer with `pong`.
    Ping,
}

impl OutboundMessage {
    /// Whether this message may be dropped under throttling.
    #[must_use]
    pub const fn is_throttleable(&self) -> bool {
        matches!(self, Self::TaskUpdate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update() -> TaskUpdate {
        TaskUpdate {
            id: 7,
            name: Some("demo.iso".to_string()),
            uri: "https://ex.com/demo.iso".to_string(),
            status: "active".to_string(),
            total_length: 1024,
            completed_length: 512,
            download_speed: 100,
            upload_speed: 0,
            frozen_space: 1024,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn messages_serialise_with_snake_case_tags() {
        let ping = serde_json::to_value(OutboundMessage::Ping).unwrap();
        assert_eq!(ping["type"], "ping");

        let update = serde_json::to_value(OutboundMessage::TaskUpdate {
            task: sample_update(),
        })
        .unwrap();
        assert_eq!(update["type"], "task_update");
        assert_eq!(update["task"]["status"], "active");

        let notice = serde_json::to_value(OutboundMessage::Notification {
            level: NotificationLevel::Error,
            message: "out of space".to_string(),
        })
        .unwrap();
        assert_eq!(notice["type"], "notification");
        assert_eq!(notice["level"], "error");
    }

    #[test]
    fn only_task_updates_are_throttleable() {
        assert!(
            OutboundMessage::TaskUpdate {
                task: sample_update(),
            }
            .is_throttleable()
        );
        assert!(!OutboundMessage::Ping.is_throttleable());
        assert!(
            !OutboundMessage::Notification {
                level: NotificationLevel::Info,
                message: String::new(),
            }
            .is_throttleable()
        );
    }
}
