#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Adapter around the external downloader daemon.
//!
//! The daemon speaks aria2-flavoured JSON-RPC over HTTP and pushes
//! `{method, gid}` notifications over a WebSocket derived from the same
//! endpoint. This crate wraps both transports, normalizes the stringly
//! typed status payloads, translates daemon error codes into user-facing
//! messages, and keeps absolute server paths from leaking past the
//! boundary.

mod client;
mod error;
mod errors;
mod notify;
mod paths;
mod status;

pub use client::{DaemonRpc, RpcClient, TransferOptions, VersionInfo};
pub use error::{DaemonError, DaemonResult};
pub use errors::translate_error_message;
pub use notify::{
    DaemonNotification, NotificationKind, NotificationStream, reconnect_delay, ws_url_from_rpc,
};
pub use paths::{mask_url_credentials, sanitize_display_string, sanitize_path};
pub use status::{DownloadState, DownloadStatus, StatusFile};
