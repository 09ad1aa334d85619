//! Minimal structural bencode walker.
//!
//! Fingerprinting only needs the raw byte slice of the top-level `info`
//! value, so this walker skips values by length instead of decoding them
//! into a schema-aware form.

use crate::error::{FingerprintError, FingerprintResult};

/// Locate the raw bencoded `info` value inside a torrent payload.
pub(crate) fn info_value_slice(data: &[u8]) -> FingerprintResult<&[u8]> {
    let mut pos = expect(data, 0, b'd')?;
    while pos < data.len() && data[pos] != b'e' {
        let (key, after_key) = read_string(data, pos)?;
        let value_end = skip_value(data, after_key)?;
        if key == b"info" {
            return Ok(&data[after_key..value_end]);
        }
        pos = value_end;
    }
    Err(FingerprintError::CorruptTorrent {
        reason: "no top-level info key",
    })
}

fn expect(data: &[u8], pos: usize, byte: u8) -> FingerprintResult<usize> {
    if data.get(pos) == Some(&byte) {
        Ok(pos + 1)
    } else {
        Err(FingerprintError::CorruptTorrent {
            reason: "payload is not a bencoded dictionary",
        })
    }
}

/// Read a `<len>:<bytes>` string starting at `pos`, returning the bytes and
/// the position just past them.
fn read_string(data: &[u8], pos: usize) -> FingerprintResult<(&[u8], usize)> {
    let colon = find_from(data, pos, b':').ok_or(FingerprintError::CorruptTorrent {
        reason: "unterminated string length",
    })?;
    let len = parse_len(&data[pos..colon])?;
    let start = colon + 1;
    let end = start.checked_add(len).filter(|end| *end <= data.len()).ok_or(
        FingerprintError::CorruptTorrent {
            reason: "string length exceeds payload",
        },
    )?;
    Ok((&data[start..end], end))
}

/// Skip one bencoded value starting at `pos`, returning the position just
/// past its final byte.
fn skip_value(data: &[u8], pos: usize) -> FingerprintResult<usize> {
    match data.get(pos) {
        Some(b'i') => {
            let end = find_from(data, pos + 1, b'e').ok_or(FingerprintError::CorruptTorrent {
                reason: "unterminated integer",
            })?;
            Ok(end + 1)
        }
        Some(b'l') => {
            let mut cursor = pos + 1;
            while data.get(cursor).is_some_and(|byte| *byte != b'e') {
                cursor = skip_value(data, cursor)?;
            }
            close_container(data, cursor)
        }
        Some(b'd') => {
            let mut cursor = pos + 1;
            while data.get(cursor).is_some_and(|byte| *byte != b'e') {
                let (_, after_key) = read_string(data, cursor)?;
                cursor = skip_value(data, after_key)?;
            }
            close_container(data, cursor)
        }
        Some(byte) if byte.is_ascii_digit() => read_string(data, pos).map(|(_, end)| end),
        _ => Err(FingerprintError::CorruptTorrent {
            reason: "unexpected byte in value position",
        }),
    }
}

fn close_container(data: &[u8], cursor: usize) -> FingerprintResult<usize> {
    if cursor < data.len() {
        Ok(cursor + 1)
    } else {
        Err(FingerprintError::CorruptTorrent {
            reason: "unterminated container",
        })
    }
}

fn parse_len(digits: &[u8]) -> FingerprintResult<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(FingerprintError::CorruptTorrent {
            reason: "invalid string length",
        });
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or(FingerprintError::CorruptTorrent {
            reason: "invalid string length",
        })
}

fn find_from(data: &[u8], start: usize, byte: u8) -> Option<usize> {
    data.get(start..)?
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| start + offset)
}
