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

//! Submission fingerprinting and artifact content hashing.
//!
//! Every download submission maps to a stable `uri_hash` used for
//! deduplication: the BitTorrent info-hash for magnets and torrent blobs,
//! and the SHA-256 of the post-redirect URL for plain HTTP(S)/FTP
//! transfers. Completed artifacts are keyed by a content hash so identical
//! payloads are stored once regardless of where they came from.

mod bencode;
mod content;
mod error;
mod magnet;

pub use content::{content_hash, directory_hash, file_hash};
pub use error::{FingerprintError, FingerprintResult};
pub use magnet::info_hash_from_magnet;

use sha1::{Digest as _, Sha1};
use sha2::Sha256;

/// Classification of an inbound submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    /// A `magnet:?xt=urn:btih:…` link.
    Magnet,
    /// Raw `.torrent` metainfo bytes.
    Torrent,
    /// A plain `http://` or `https://` URL.
    Http,
    /// An `ftp://` URL.
    Ftp,
}

impl SubmissionKind {
    /// Classify a submission URI by scheme.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::UnsupportedScheme`] when the URI does not
    /// use a recognised scheme.
    pub fn classify(uri: &str) -> FingerprintResult<Self> {
        let lower = uri.trim_start().to_ascii_lowercase();
        if lower.starts_with("magnet:") {
            Ok(Self::Magnet)
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(Self::Http)
        } else if lower.starts_with("ftp://") {
            Ok(Self::Ftp)
        } else {
            Err(FingerprintError::UnsupportedScheme {
                uri: uri.to_string(),
            })
        }
    }

    /// Whether the submission rides plain HTTP(S).
    #[must_use]
    pub const fn is_http(self) -> bool {
        matches!(self, Self::Http)
    }
}

/// Fingerprint a URL by hashing its textual form.
///
/// Callers must pass the post-redirect URL so that mirrors behind the same
/// final location collide to one task.
#[must_use]
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(digest)
}

/// Fingerprint raw torrent metainfo bytes.
///
/// The fingerprint is the BitTorrent info-hash: the SHA-1 digest of the raw
/// bencoded `info` value.
///
/// # Errors
///
/// Returns [`FingerprintError::CorruptTorrent`] when the payload is not
/// valid bencode or carries no top-level `info` key.
pub fn info_hash_from_torrent(data: &[u8]) -> FingerprintResult<String> {
    let info = bencode::info_value_slice(data)?;
    let digest = Sha1::digest(info);
    Ok(hex::encode(digest))
}
