//! Receive buffer for accumulating inbound bytes.
//!
//! Uses `bytes::BytesMut` behind a short-held lock. The receive loop only
//! appends; readers copy out, clear, or cut a frame off the front. Every
//! read-side operation is a single critical section, so a reader never sees
//! a half-applied append and an append never lands between a reader's
//! check and its consume.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::reader::split_frame;

/// Default initial capacity: 64KB.
const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Ordered, unbounded byte accumulator owned by one connection.
#[derive(Debug)]
pub struct ReceiveBuffer {
    inner: Mutex<BytesMut>,
}

impl ReceiveBuffer {
    /// Create an empty buffer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty buffer with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BytesMut::with_capacity(capacity)),
        }
    }

    /// Append bytes at the end.
    pub fn append(&self, data: &[u8]) {
        self.inner.lock().extend_from_slice(data);
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.lock())
    }

    /// Take everything, leaving the buffer empty.
    pub fn take(&self) -> Bytes {
        self.inner.lock().split().freeze()
    }

    /// Discard everything.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Cut the first delimited frame off the front.
    ///
    /// See [`split_frame`] for the splitting policy. Returns `None` without
    /// touching the buffer if the delimiter is not present.
    pub fn split_frame(&self, delimiter: &[u8]) -> Option<Bytes> {
        split_frame(&mut self.inner.lock(), delimiter)
    }

    /// Run `decode` over the whole buffer; on success, clear it.
    pub fn decode_with<T>(&self, decode: impl FnOnce(&[u8]) -> Option<T>) -> Option<T> {
        let mut guard = self.inner.lock();
        let value = decode(&guard)?;
        guard.clear();
        Some(value)
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let buffer = ReceiveBuffer::new();
        buffer.append(b"Hel");
        buffer.append(b"");
        buffer.append(b"lo");

        assert_eq!(buffer.len(), 5);
        assert_eq!(&buffer.snapshot()[..], b"Hello");
    }

    #[test]
    fn test_snapshot_does_not_consume() {
        let buffer = ReceiveBuffer::new();
        buffer.append(b"data");

        let first = buffer.snapshot();
        let second = buffer.snapshot();
        assert_eq!(first, second);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_take_empties_buffer() {
        let buffer = ReceiveBuffer::new();
        buffer.append(b"data");

        assert_eq!(&buffer.take()[..], b"data");
        assert!(buffer.is_empty());
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn test_taken_bytes_survive_later_appends() {
        let buffer = ReceiveBuffer::new();
        buffer.append(b"first");
        let taken = buffer.take();
        buffer.append(b"second");

        assert_eq!(&taken[..], b"first");
        assert_eq!(&buffer.snapshot()[..], b"second");
    }

    #[test]
    fn test_clear() {
        let buffer = ReceiveBuffer::new();
        buffer.append(b"data");
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_split_frame_retains_leftover() {
        let buffer = ReceiveBuffer::new();
        buffer.append(b"A#B");

        assert_eq!(buffer.split_frame(b"#").as_deref(), Some(&b"A"[..]));
        assert_eq!(&buffer.snapshot()[..], b"B");
        assert!(buffer.split_frame(b"#").is_none());
        assert_eq!(&buffer.snapshot()[..], b"B");
    }

    #[test]
    fn test_decode_with_clears_only_on_success() {
        let buffer = ReceiveBuffer::new();
        buffer.append(b"12");

        let miss: Option<u32> = buffer.decode_with(|_| None);
        assert!(miss.is_none());
        assert_eq!(buffer.len(), 2);

        let hit = buffer.decode_with(|bytes| std::str::from_utf8(bytes).ok()?.parse::<u32>().ok());
        assert_eq!(hit, Some(12));
        assert!(buffer.is_empty());
    }
}
