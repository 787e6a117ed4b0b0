//! Delimiter-based frame extraction.
//!
//! Splitting policy:
//! - every non-overlapping occurrence of the delimiter is a split point
//! - empty segments (delimiter runs, leading/trailing delimiters) are dropped
//! - the first segment is the frame
//! - the remaining segments, rejoined with the delimiter, stay buffered
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use sockwire::reader::split_frame;
//!
//! let mut buf = BytesMut::from(&b"Hello Baby#With a Separator"[..]);
//! let frame = split_frame(&mut buf, b"#").unwrap();
//! assert_eq!(&frame[..], b"Hello Baby");
//! assert_eq!(&buf[..], b"With a Separator");
//! ```

use bytes::{Bytes, BytesMut};

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find_delimiter(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Non-empty segments of `data` between occurrences of `delimiter`.
pub fn segments<'a>(data: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut chunks = Vec::new();
    let mut pos = 0;

    while let Some(offset) = find_delimiter(&data[pos..], delimiter) {
        if offset > 0 {
            chunks.push(&data[pos..pos + offset]);
        }
        pos += offset + delimiter.len();
    }
    if pos < data.len() {
        chunks.push(&data[pos..]);
    }

    chunks
}

/// Extract the first frame from `buf`.
///
/// Returns `None` (leaving `buf` untouched) when the delimiter is empty or
/// not present yet.
pub fn split_frame(buf: &mut BytesMut, delimiter: &[u8]) -> Option<Bytes> {
    find_delimiter(buf, delimiter)?;

    let (frame, rest) = {
        let parts = segments(buf, delimiter);
        let frame = parts
            .first()
            .map(|s| Bytes::copy_from_slice(s))
            .unwrap_or_default();

        let mut rest = BytesMut::new();
        if parts.len() > 1 {
            for (i, part) in parts[1..].iter().enumerate() {
                if i > 0 {
                    rest.extend_from_slice(delimiter);
                }
                rest.extend_from_slice(part);
            }
        }
        (frame, rest)
    };

    *buf = rest;
    Some(frame)
}
