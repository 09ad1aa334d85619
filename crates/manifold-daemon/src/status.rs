//! Normalized daemon status payloads.
//!
//! The daemon serialises every numeric field as a JSON string
//! (`"totalLength": "1048576"`); deserialization parses them into integers
//! up front so the rest of the system never sees the wire quirk.

use std::path::Path;

use serde::{Deserialize, Deserializer};

/// Lifecycle state reported by the daemon for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    /// Transfer is running.
    Active,
    /// Transfer is waiting in the daemon queue.
    #[default]
    Waiting,
    /// Transfer is paused.
    Paused,
    /// Transfer stopped with an error.
    Error,
    /// Transfer finished successfully.
    Complete,
    /// Transfer was removed.
    Removed,
}

/// One file entry inside a status payload.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StatusFile {
    /// Absolute path as the daemon sees it.
    #[serde(default)]
    pub path: String,
    /// File size in bytes.
    #[serde(default, deserialize_with = "flexible_u64")]
    pub length: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct BitTorrentInfo {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct BitTorrentSection {
    #[serde(default)]
    info: BitTorrentInfo,
}

/// Snapshot of one transfer, as returned by `tellStatus`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    /// Daemon handle for the transfer.
    #[serde(default)]
    pub gid: String,
    /// Lifecycle state.
    #[serde(default)]
    pub status: DownloadState,
    /// Total payload size, zero while unknown.
    #[serde(default, deserialize_with = "flexible_u64")]
    pub total_length: u64,
    /// Bytes completed so far.
    #[serde(default, deserialize_with = "flexible_u64")]
    pub completed_length: u64,
    /// Current download rate in bytes per second.
    #[serde(default, deserialize_with = "flexible_u64")]
    pub download_speed: u64,
    /// Current upload rate in bytes per second.
    #[serde(default, deserialize_with = "flexible_u64")]
    pub upload_speed: u64,
    /// Connected peers/servers.
    #[serde(default, deserialize_with = "flexible_u64")]
    pub connections: u64,
    /// Numeric error code as a string, when the transfer failed.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Raw error message, when the transfer failed.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Gid of the metadata transfer this one continues, when applicable.
    #[serde(default)]
    pub following_gid: Option<String>,
    /// Gids of the transfers spawned by this one (BT metadata handoff).
    #[serde(default)]
    pub followed_by: Vec<String>,
    /// Download directory assigned to the transfer.
    #[serde(default)]
    pub dir: String,
    /// File entries in the payload.
    #[serde(default)]
    pub files: Vec<StatusFile>,
    #[serde(default)]
    bittorrent: Option<BitTorrentSection>,
}

impl DownloadStatus {
    /// Best display name for the transfer: the BT metadata name when
    /// present, otherwise the first file path rewritten relative to
    /// `root` (the directory the daemon was told to write into), so a
    /// nested payload keeps its subpath and absolute server paths never
    /// become names.
    #[must_use]
    pub fn display_name(&self, root: &Path) -> Option<String> {
        if let Some(name) = self
            .bittorrent
            .as_ref()
            .and_then(|section| section.info.name.as_deref())
            .filter(|name| !name.is_empty())
        {
            return Some(crate::paths::sanitize_display_string(name));
        }
        self.files
            .first()
            .and_then(|file| crate::paths::sanitize_path(&file.path, root))
            .map(|path| crate::paths::sanitize_display_string(&path))
    }

    /// Absolute path of the first file entry, when present.
    #[must_use]
    pub fn first_file_path(&self) -> Option<&str> {
        self.files
            .first()
            .map(|file| file.path.as_str())
            .filter(|path| !path.is_empty())
    }

    /// Whether the snapshot marks a BT metadata phase that has handed off
    /// to a follow-up transfer.
    #[must_use]
    pub fn has_follow_up(&self) -> bool {
        !self.followed_by.is_empty()
    }
}

/// Accept integers encoded as JSON strings or native numbers; anything
/// unparsable collapses to zero, matching how absent fields are treated.
fn flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(value) => value,
        Raw::Text(text) => text.trim().parse().unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringly_numbers_are_parsed() {
        let status: DownloadStatus = serde_json::from_value(serde_json::json!({
            "gid": "2089b05ecca3d829",
            "status": "active",
            "totalLength": "34896138",
            "completedLength": "34896138",
            "downloadSpeed": "1024",
            "uploadSpeed": "0",
            "connections": "4",
            "files": [{"path": "/data/downloading/7/demo.iso", "length": "34896138"}]
        }))
        .unwrap();

        assert_eq!(status.status, DownloadState::Active);
        assert_eq!(status.total_length, 34_896_138);
        assert_eq!(status.download_speed, 1024);
        assert_eq!(status.connections, 4);
        assert_eq!(status.files[0].length, 34_896_138);
    }

    #[test]
    fn unparsable_numbers_collapse_to_zero() {
        let status: DownloadStatus = serde_json::from_value(serde_json::json!({
            "gid": "x",
            "status": "waiting",
            "totalLength": "not-a-number"
        }))
        .unwrap();
        assert_eq!(status.total_length, 0);
    }

    #[test]
    fn display_name_prefers_bt_metadata() {
        let status: DownloadStatus = serde_json::from_value(serde_json::json!({
            "gid": "x",
            "status": "active",
            "bittorrent": {"info": {"name": "Linux ISO"}},
            "files": [{"path": "/data/downloading/7/other.bin"}]
        }))
        .unwrap();
        let root = Path::new("/data/downloading/7");
        assert_eq!(status.display_name(root).as_deref(), Some("Linux ISO"));
    }

    #[test]
    fn display_name_keeps_the_subpath_inside_the_root() {
        let status: DownloadStatus = serde_json::from_value(serde_json::json!({
            "gid": "x",
            "status": "active",
            "files": [{"path": "/data/downloading/7/Show S01/ep1.mkv"}]
        }))
        .unwrap();
        let root = Path::new("/data/downloading/7");
        assert_eq!(
            status.display_name(root).as_deref(),
            Some("Show S01/ep1.mkv")
        );
    }

    #[test]
    fn display_name_collapses_out_of_tree_paths_to_basename() {
        let status: DownloadStatus = serde_json::from_value(serde_json::json!({
            "gid": "x",
            "status": "active",
            "files": [{"path": "/elsewhere/demo.iso"}]
        }))
        .unwrap();
        let root = Path::new("/data/downloading/7");
        assert_eq!(status.display_name(root).as_deref(), Some("demo.iso"));
    }

    #[test]
    fn follow_up_detection_reads_followed_by() {
        let status: DownloadStatus = serde_json::from_value(serde_json::json!({
            "gid": "meta",
            "status": "complete",
            "followedBy": ["real1"]
        }))
        .unwrap();
        assert!(status.has_follow_up());
        assert_eq!(status.followed_by[0], "real1");
    }

    #[test]
    fn empty_payload_deserialises_to_defaults() {
        let status: DownloadStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(status.status, DownloadState::Waiting);
        assert!(status.first_file_path().is_none());
        assert!(status.display_name(Path::new("/data/downloading/7")).is_none());
    }
}
