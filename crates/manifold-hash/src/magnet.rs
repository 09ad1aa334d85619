//! Magnet link info-hash extraction.

use std::sync::OnceLock;

use data_encoding::BASE32;
use regex::Regex;
use url::Url;

use crate::error::{FingerprintError, FingerprintResult};

fn btih_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)urn:btih:([a-fA-F0-9]{40}|[a-zA-Z2-7]{32})")
            .unwrap_or_else(|_| unreachable!("btih pattern is valid"))
    })
}

/// Extract the info-hash from a magnet link as 40 lowercase hex characters.
///
/// Both encodings in the wild are accepted: 40 hex characters, and 32
/// base32 characters which are decoded to the same 20-byte digest so the
/// two forms collide to one fingerprint.
///
/// # Errors
///
/// Returns [`FingerprintError::InvalidMagnet`] when no `urn:btih` topic is
/// present in any `xt` parameter.
pub fn info_hash_from_magnet(magnet_uri: &str) -> FingerprintResult<String> {
    let invalid = || FingerprintError::InvalidMagnet {
        uri: magnet_uri.to_string(),
    };

    if !magnet_uri.to_ascii_lowercase().starts_with("magnet:") {
        return Err(invalid());
    }
    let parsed = Url::parse(magnet_uri).map_err(|_| invalid())?;

    for (key, value) in parsed.query_pairs() {
        if key != "xt" {
            continue;
        }
        let Some(captures) = btih_pattern().captures(&value) else {
            continue;
        };
        let raw = &captures[1];
        if raw.len() == 40 {
            return Ok(raw.to_ascii_lowercase());
        }
        // 32-character topics are base32; decode failures fall through to
        // the next xt parameter.
        if let Ok(bytes) = BASE32.decode(raw.to_ascii_uppercase().as_bytes()) {
            return Ok(hex::encode(bytes));
        }
    }

    Err(invalid())
}
