//! Filename extraction from probe responses.

use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

fn pattern(cell: &'static OnceLock<Regex>, source: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).unwrap_or_else(|_| unreachable!("pattern is valid")))
}

fn extended_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"(?i)filename\*\s*=\s*([^;]+)")
}

fn quoted_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r#"(?i)filename\s*=\s*"([^"]+)""#)
}

fn bare_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"(?i)filename\s*=\s*([^;\s]+)")
}

/// Parse a filename out of a `Content-Disposition` header value.
///
/// Precedence follows RFC 6266: the RFC 5987 `filename*=` form wins over a
/// quoted `filename="…"`, which wins over a bare `filename=`.
pub(crate) fn filename_from_disposition(header: &str) -> Option<String> {
    if let Some(captures) = extended_pattern().captures(header) {
        let value = captures[1].trim();
        // charset'language'percent-encoded-value
        let mut parts = value.splitn(3, '\'');
        if let (Some(_charset), Some(_lang), Some(encoded)) =
            (parts.next(), parts.next(), parts.next())
        {
            let decoded = percent_decode_str(encoded).decode_utf8().ok()?;
            if !decoded.is_empty() {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(captures) = quoted_pattern().captures(header) {
        return Some(captures[1].to_string());
    }

    bare_pattern()
        .captures(header)
        .map(|captures| captures[1].trim().to_string())
}

/// Fall back to the last path segment of the final URL, accepted only when
/// it looks like a filename (contains a dot).
pub(crate) fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    let decoded = percent_decode_str(segment).decode_utf8().ok()?;
    if decoded.contains('.') {
        Some(decoded.into_owned())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_form_wins_over_quoted() {
        let header = "attachment; filename=\"plain.zip\"; filename*=UTF-8''na%C3%AFve%20file.zip";
        assert_eq!(
            filename_from_disposition(header).as_deref(),
            Some("naïve file.zip")
        );
    }

    #[test]
    fn quoted_form_wins_over_bare() {
        let header = "attachment; filename=\"with space.iso\"";
        assert_eq!(
            filename_from_disposition(header).as_deref(),
            Some("with space.iso")
        );
    }

    #[test]
    fn bare_form_is_trimmed() {
        assert_eq!(
            filename_from_disposition("inline; filename=report.pdf").as_deref(),
            Some("report.pdf")
        );
    }

    #[test]
    fn malformed_extended_form_falls_back() {
        let header = "attachment; filename*=not-rfc5987; filename=\"ok.bin\"";
        assert_eq!(filename_from_disposition(header).as_deref(), Some("ok.bin"));
    }

    #[test]
    fn url_segment_requires_a_dot() {
        assert_eq!(
            filename_from_url("https://ex.com/downloads/image.iso?x=1").as_deref(),
            Some("image.iso")
        );
        assert_eq!(filename_from_url("https://ex.com/downloads/latest"), None);
        assert_eq!(
            filename_from_url("https://ex.com/a%20b.zip").as_deref(),
            Some("a b.zip")
        );
    }
}
