//! Legacy sensor CSV formats.
//!
//! Two incompatible encodings exist in the wild. Format 1 is the early
//! firmware's semicolon stream (newlines transported as `$`), format 2 is the
//! later one-row-per-line layout announced by an `OBSDataFormat=2` metadata
//! line. [`detect_format`] must run before picking a parser; neither parser
//! terminates sensibly on the other's input.

pub mod format1;
pub mod format2;

use crate::models::Point;
use std::borrow::Cow;
use thiserror::Error;

pub use format1::Format1Points;
pub use format2::Format2Points;

const NEWLINE_SENTINEL: char = '$';
const FORMAT_MARKER_KEY: &str = "OBSDataFormat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    V1,
    V2,
    Invalid,
}

#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("track file is empty")]
    Empty,
    #[error("track format cannot be detected")]
    Unrecognized,
    #[error("unsupported track data format version {0}")]
    UnsupportedVersion(String),
}

/// Classifies a raw upload body. Pure and total.
pub fn detect_format(raw: &str) -> Format {
    match validate_format(raw) {
        Ok(format) => format,
        Err(_) => Format::Invalid,
    }
}

/// Like [`detect_format`], but says why a body was rejected.
pub fn validate_format(raw: &str) -> Result<Format, FormatError> {
    if raw.trim().is_empty() {
        return Err(FormatError::Empty);
    }

    let first_line = raw
        .split(['\n', NEWLINE_SENTINEL])
        .next()
        .unwrap_or("")
        .trim_end_matches('\r');

    if let Some(version) = format_marker(first_line) {
        return if version == "2" {
            Ok(Format::V2)
        } else {
            Err(FormatError::UnsupportedVersion(version.to_string()))
        };
    }

    let first_token = first_line.split(';').next().unwrap_or("").trim();
    if raw.contains(NEWLINE_SENTINEL) || first_token == "Date" || is_legacy_date(first_token) {
        return Ok(Format::V1);
    }

    Err(FormatError::Unrecognized)
}

/// Value of `OBSDataFormat=<n>` when the line carries it as an `&`-separated pair.
fn format_marker(line: &str) -> Option<&str> {
    line.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        let value = value.trim();
        (key.trim() == FORMAT_MARKER_KEY
            && !value.is_empty()
            && value.bytes().all(|b| b.is_ascii_digit()))
        .then_some(value)
    })
}

fn is_legacy_date(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() == 10
        && bytes[2] == b'.'
        && bytes[5] == b'.'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 2 || i == 5 || b.is_ascii_digit())
}

/// Turns the `$` transport sentinel back into real newlines.
pub fn normalize_newlines(raw: &str) -> Cow<'_, str> {
    if raw.contains(NEWLINE_SENTINEL) {
        Cow::Owned(raw.replace(NEWLINE_SENTINEL, "\n"))
    } else {
        Cow::Borrowed(raw)
    }
}

/// A lazy, single-pass point sequence over either format.
pub enum Points<'a> {
    V1(Format1Points<'a>),
    V2(Format2Points<'a>),
}

impl Iterator for Points<'_> {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        match self {
            Points::V1(points) => points.next(),
            Points::V2(points) => points.next(),
        }
    }
}

/// Detects the format and hands back a fresh iterator over the body's points.
pub fn parse_points(raw: &str) -> Result<Points<'_>, FormatError> {
    match validate_format(raw)? {
        Format::V1 => Ok(Points::V1(Format1Points::new(normalize_newlines(raw)))),
        Format::V2 => Ok(Points::V2(Format2Points::new(raw))),
        Format::Invalid => Err(FormatError::Unrecognized),
    }
}

/// Leading numeric prefix of `token` (optional sign, digits, fraction, exponent),
/// after leading whitespace. `None` when no digit is found.
pub(crate) fn parse_float_prefix(token: &str) -> Option<f64> {
    let s = token.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if digits > 0 || frac_end > frac_start {
            digits += frac_end - frac_start;
            end = frac_end;
        }
    }

    if digits == 0 {
        return None;
    }

    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse().ok()
}
