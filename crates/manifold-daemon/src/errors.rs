//! Daemon error code translation.
//!
//! The daemon reports failures either as an `errorCode=N` prefix inside
//! `errorMessage` or as free text. Known codes map to fixed user-facing
//! messages; free text goes through a phrase-matching pass. The raw
//! message is always persisted separately for operators.

use std::sync::OnceLock;

use regex::Regex;

/// Fallback shown when nothing in the message could be recognised.
pub(crate) const GENERIC_ERROR: &str = "backend error";

/// Fixed translation table for daemon exit codes.
const ERROR_CODE_TABLE: [&str; 33] = [
    "download succeeded",
    "unknown error",
    "network timeout",
    "resource not found (404)",
    "resource not found after maximum retries",
    "download speed too slow, aborted",
    "network problem",
    "unfinished download remains",
    "remote server does not support resume",
    "not enough disk space",
    "piece length mismatch with control file",
    "duplicate download in progress",
    "duplicate torrent download in progress",
    "file already exists",
    "file renaming failed",
    "could not open existing file",
    "could not create or truncate file",
    "file i/o error",
    "could not create directory",
    "name resolution failed (DNS)",
    "could not parse metalink document",
    "ftp command failed",
    "bad http response header",
    "too many redirects",
    "http authorization failed",
    "could not parse bencoded data (torrent corrupt)",
    "torrent file corrupt or missing",
    "bad magnet link",
    "bad or unrecognised option",
    "remote server overloaded, try again later",
    "could not parse json-rpc request",
    "reserved",
    "checksum validation failed",
];

struct PhraseRule {
    pattern: &'static str,
    message: &'static str,
}

const PHRASE_RULES: &[PhraseRule] = &[
    PhraseRule {
        pattern: r"timeout",
        message: "network timeout",
    },
    PhraseRule {
        pattern: r"404|not found",
        message: "resource not found (404)",
    },
    PhraseRule {
        pattern: r"403|forbidden",
        message: "access denied (403)",
    },
    PhraseRule {
        pattern: r"401|unauthorized",
        message: "authentication required (401)",
    },
    PhraseRule {
        pattern: r"500|internal server error",
        message: "remote server error (500)",
    },
    PhraseRule {
        pattern: r"502|bad gateway",
        message: "bad gateway (502)",
    },
    PhraseRule {
        pattern: r"503|service unavailable",
        message: "service unavailable (503)",
    },
    PhraseRule {
        pattern: r"dns|name.*resolution",
        message: "name resolution failed (DNS)",
    },
    PhraseRule {
        pattern: r"connection refused",
        message: "connection refused",
    },
    PhraseRule {
        pattern: r"connection reset",
        message: "connection reset",
    },
    PhraseRule {
        pattern: r"no space",
        message: "not enough disk space",
    },
    PhraseRule {
        pattern: r"permission denied",
        message: "permission denied",
    },
    PhraseRule {
        pattern: r"ssl|certificate",
        message: "tls certificate error",
    },
    PhraseRule {
        pattern: r"too many redirect",
        message: "too many redirects",
    },
];

fn code_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r"(?i)errorCode[=:\s]*(\d+)")
            .unwrap_or_else(|_| unreachable!("code pattern is valid"))
    })
}

fn phrase_patterns() -> &'static Vec<(Regex, &'static str)> {
    static CELL: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    CELL.get_or_init(|| {
        PHRASE_RULES
            .iter()
            .map(|rule| {
                (
                    Regex::new(rule.pattern)
                        .unwrap_or_else(|_| unreachable!("phrase pattern is valid")),
                    rule.message,
                )
            })
            .collect()
    })
}

/// Translate a raw daemon error message into a user-facing one.
///
/// Order of attempts: embedded `errorCode=N` against the fixed table, then
/// phrase matching over the lowercased message, then the generic fallback.
#[must_use]
pub fn translate_error_message(raw: Option<&str>) -> String {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return GENERIC_ERROR.to_string();
    };

    if let Some(captures) = code_pattern().captures(raw) {
        if let Ok(code) = captures[1].parse::<usize>() {
            if let Some(message) = ERROR_CODE_TABLE.get(code) {
                return (*message).to_string();
            }
        }
    }

    let lower = raw.to_ascii_lowercase();
    for (pattern, message) in phrase_patterns() {
        if pattern.is_match(&lower) {
            return (*message).to_string();
        }
    }

    GENERIC_ERROR.to_string()
}
