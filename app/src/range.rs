// ==============================================================================
// range.rs - Content-Range Header Parser
// ==============================================================================
// Description: Parses `[bytes ]start-end/total` headers for chunked uploads
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================
// Format:
//   bytes 0-1048575/5242880
//   0-1048575/5242880
// Both forms are equivalent. A missing header means the request body is the
// whole file.
// ==============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validated byte range of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRange {
    /// First byte offset (inclusive)
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
    /// Declared length of the complete file
    pub total: u64,
}

/// Errors raised for a present but unusable Content-Range header
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeParseError {
    #[error("Invalid range format: {0}")]
    InvalidFormat(String),

    #[error("Invalid range value: {0}")]
    InvalidValue(String),

    #[error("Invalid range boundaries: start={start}, end={end}, total={total}")]
    InvalidBoundaries { start: u64, end: u64, total: u64 },
}

impl ContentRange {
    /// Number of bytes covered by this range
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Offset the client should send next
    pub fn next_start(&self) -> u64 {
        self.end + 1
    }

    /// True when this chunk ends at the last byte of the file
    pub fn is_terminal(&self) -> bool {
        self.end + 1 == self.total
    }
}

/// Parse an optional Content-Range header.
///
/// Returns `Ok(None)` when the header is absent (or blank), which means the
/// body carries the entire file. A header that is present but malformed is
/// always an error, never "no range".
pub fn parse_content_range(header: Option<&str>) -> Result<Option<ContentRange>, RangeParseError> {
    let raw = match header.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };

    let rest = match raw.strip_prefix("bytes") {
        Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start(),
        Some(_) => return Err(RangeParseError::InvalidFormat(raw.to_string())),
        None => raw,
    };

    let (span, total) = rest
        .split_once('/')
        .ok_or_else(|| RangeParseError::InvalidFormat(raw.to_string()))?;
    let (start, end) = span
        .split_once('-')
        .ok_or_else(|| RangeParseError::InvalidFormat(raw.to_string()))?;

    let start = parse_offset(start)?;
    let end = parse_offset(end)?;
    let total = parse_offset(total)?;

    if start > end || end >= total {
        return Err(RangeParseError::InvalidBoundaries { start, end, total });
    }

    Ok(Some(ContentRange { start, end, total }))
}

fn parse_offset(field: &str) -> Result<u64, RangeParseError> {
    // u64::from_str would accept a leading '+'
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeParseError::InvalidValue(field.to_string()));
    }
    field
        .parse()
        .map_err(|_| RangeParseError::InvalidValue(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_bytes_prefix() {
        let range = parse_content_range(Some("bytes 0-1048575/5242880")).unwrap().unwrap();
        assert_eq!(range, ContentRange { start: 0, end: 1048575, total: 5242880 });
        assert_eq!(range.len(), 1048576);
        assert_eq!(range.next_start(), 1048576);
        assert!(!range.is_terminal());
    }

    #[test]
    fn test_both_forms_parse_identically() {
        let prefixed = parse_content_range(Some("bytes 10-19/20")).unwrap();
        let bare = parse_content_range(Some("10-19/20")).unwrap();
        assert_eq!(prefixed, bare);
        assert!(bare.unwrap().is_terminal());
    }

    #[test]
    fn test_absent_header_means_whole_file() {
        assert_eq!(parse_content_range(None).unwrap(), None);
        assert_eq!(parse_content_range(Some("   ")).unwrap(), None);
    }

    #[test]
    fn test_single_byte_file() {
        let range = parse_content_range(Some("bytes 0-0/1")).unwrap().unwrap();
        assert_eq!(range.len(), 1);
        assert!(range.is_terminal());
    }

    #[test]
    fn test_rejects_start_after_end() {
        let err = parse_content_range(Some("bytes 20-10/100")).unwrap_err();
        assert_eq!(err, RangeParseError::InvalidBoundaries { start: 20, end: 10, total: 100 });
    }

    #[test]
    fn test_rejects_end_at_or_past_total() {
        assert!(parse_content_range(Some("bytes 0-100/100")).is_err());
        assert!(parse_content_range(Some("bytes 0-150/100")).is_err());
    }

    #[test]
    fn test_rejects_garbled_headers() {
        for header in [
            "bytes */100",
            "bytes a-b/c",
            "bytes 0-10",
            "bytes=0-10/100",
            "bytes -5-10/100",
            "bytes +0-10/100",
            "0-10/",
            "garbage",
            "bytes0-10/100",
        ] {
            assert!(
                parse_content_range(Some(header)).is_err(),
                "header {:?} should be rejected",
                header
            );
        }
    }

    #[test]
    fn test_rejects_overflowing_values() {
        let err = parse_content_range(Some("bytes 0-1/99999999999999999999999")).unwrap_err();
        assert!(matches!(err, RangeParseError::InvalidValue(_)));
    }
}
