//! Owned growable byte buffer used for per-connection I/O.

use std::collections::TryReserveError;

/// Contiguous byte queue: bytes are appended at the back and drained from
/// the front.
#[derive(Debug, Default, Clone)]
pub struct ByteBuffer {
    bytes: Vec<u8>,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// All buffered bytes, front first.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// The first `n` bytes, or `None` if fewer are buffered.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        self.bytes.get(..n)
    }

    /// Reserve room for `additional` bytes without aborting on failure.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        self.bytes.try_reserve(additional)
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), TryReserveError> {
        self.bytes.try_reserve(bytes.len())?;
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    /// Drop up to `n` bytes from the front; returns how many were dropped.
    pub fn drain(&mut self, n: usize) -> usize {
        let n = n.min(self.bytes.len());
        self.bytes.drain(..n);
        n
    }

    /// Drop everything and release the allocation.
    pub fn clear(&mut self) {
        self.bytes = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_peek_drain() {
        let mut buf = ByteBuffer::new();
        assert!(buf.is_empty());
        buf.append(b"hello").unwrap();
        buf.append(b" world").unwrap();
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.peek(5), Some(&b"hello"[..]));
        assert_eq!(buf.peek(12), None);

        assert_eq!(buf.drain(6), 6);
        assert_eq!(buf.as_slice(), b"world");
    }

    #[test]
    fn test_drain_clamps_to_length() {
        let mut buf = ByteBuffer::new();
        buf.append(&[1, 2, 3]).unwrap();
        assert_eq!(buf.drain(10), 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_clear_releases_bytes() {
        let mut buf = ByteBuffer::new();
        buf.append(&[0; 64]).unwrap();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.peek(0), Some(&[][..]));
    }
}
