//! Receive buffer for the ESL parser

use bytes::{Buf, BytesMut};

use crate::constants::BUF_CHUNK;

/// Append-only byte buffer fed by the receive loop.
///
/// Consumed bytes are split off the front, so the unread tail never moves
/// more than once per message.
#[derive(Debug)]
pub(crate) struct EslBuffer {
    data: BytesMut,
}

impl EslBuffer {
    pub(crate) fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(BUF_CHUNK),
        }
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data
            .extend_from_slice(bytes);
    }

    pub(crate) fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Remove and return everything before `pattern`, discarding the pattern.
    pub(crate) fn extract_until_pattern(&mut self, pattern: &[u8]) -> Option<Vec<u8>> {
        let pos = self
            .data
            .windows(pattern.len())
            .position(|w| w == pattern)?;
        let head = self
            .data
            .split_to(pos);
        self.data
            .advance(pattern.len());
        Some(head.to_vec())
    }

    /// Remove and return exactly `len` bytes, or nothing if fewer are buffered.
    pub(crate) fn extract_bytes(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.data.len() < len {
            return None;
        }
        Some(
            self.data
                .split_to(len)
                .to_vec(),
        )
    }

    /// True when the buffer holds only line terminators and whitespace.
    pub(crate) fn is_blank(&self) -> bool {
        self.data
            .iter()
            .all(|b| b.is_ascii_whitespace())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_until_pattern() {
        let mut buf = EslBuffer::new();
        buf.extend_from_slice(b"Content-Type: auth/request\n\nrest");
        let head = buf
            .extract_until_pattern(b"\n\n")
            .unwrap();
        assert_eq!(head, b"Content-Type: auth/request");
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_extract_until_pattern_missing() {
        let mut buf = EslBuffer::new();
        buf.extend_from_slice(b"Content-Type: auth/request\n");
        assert!(buf
            .extract_until_pattern(b"\n\n")
            .is_none());
        assert_eq!(buf.len(), 27);
    }

    #[test]
    fn test_extract_bytes_waits_for_enough_data() {
        let mut buf = EslBuffer::new();
        buf.extend_from_slice(b"abc");
        assert!(buf
            .extract_bytes(5)
            .is_none());
        buf.extend_from_slice(b"de");
        assert_eq!(buf.extract_bytes(5), Some(b"abcde".to_vec()));
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_is_blank() {
        let mut buf = EslBuffer::new();
        assert!(buf.is_blank());
        buf.extend_from_slice(b"\n\r\n");
        assert!(buf.is_blank());
        buf.extend_from_slice(b"X");
        assert!(!buf.is_blank());
    }
}
