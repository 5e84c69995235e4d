//! Inbound message buffer
//!
//! A stream delivers bytes in arbitrary chunks. The buffer accumulates them until a
//! terminator arrives and hands back each complete message. It never grows past its
//! capacity: excess bytes of an oversized message are dropped and the message is
//! marked truncated.

use bytes::{Bytes, BytesMut};

use super::constants::{MAX_MESSAGE_LEN, TERMINATOR};

/// One assembled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message bytes without terminator
    pub data: Bytes,
    /// Whether bytes were dropped because the message exceeded capacity
    pub truncated: bool,
}

/// Per-stream accumulation buffer with a fixed capacity
#[derive(Debug)]
pub struct InboundBuffer {
    buf: BytesMut,
    capacity: usize,
    truncated: bool,
    /// A trailing `\r` not yet known to be part of a `\r\n` terminator
    pending_cr: bool,
}

impl InboundBuffer {
    /// Create a buffer with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(MAX_MESSAGE_LEN)
    }

    /// Create a buffer holding at most `capacity` bytes per message
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            truncated: false,
            pending_cr: false,
        }
    }

    /// Append a received chunk, returning every message it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == TERMINATOR) {
            self.append(&rest[..pos]);
            frames.push(self.take());
            rest = &rest[pos + 1..];
        }
        self.append(rest);

        frames
    }

    /// Take whatever is buffered as a final message (peer finished sending)
    pub fn flush(&mut self) -> Option<Frame> {
        if self.buf.is_empty() && !self.truncated {
            return None;
        }
        Some(self.take())
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard any partial message
    pub fn reset(&mut self) {
        self.buf.clear();
        self.truncated = false;
        self.pending_cr = false;
    }

    fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if std::mem::take(&mut self.pending_cr) {
            self.extend(b"\r");
        }

        match bytes.strip_suffix(b"\r") {
            Some(head) => {
                self.pending_cr = true;
                self.extend(head);
            }
            None => self.extend(bytes),
        }
    }

    fn extend(&mut self, bytes: &[u8]) {
        let room = self.capacity - self.buf.len();
        let take = bytes.len().min(room);
        self.buf.extend_from_slice(&bytes[..take]);
        if take < bytes.len() {
            self.truncated = true;
        }
    }

    fn take(&mut self) -> Frame {
        self.pending_cr = false;
        let frame = Frame {
            data: self.buf.split().freeze(),
            truncated: self.truncated,
        };
        self.truncated = false;
        frame
    }
}

impl Default for InboundBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_message() {
        let mut buffer = InboundBuffer::new();
        let frames = buffer.push(b"SUBSCRIBER|liga\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].data[..], b"SUBSCRIBER|liga");
        assert!(!frames[0].truncated);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_chunks() {
        let mut buffer = InboundBuffer::new();

        assert!(buffer.push(b"PUBLISHER|li").is_empty());
        assert!(buffer.push(b"ga|10:15:00|Gol").is_empty());
        let frames = buffer.push(b" de equipo A\r\nSUBSCRIBER|x");

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].data[..], b"PUBLISHER|liga|10:15:00|Gol de equipo A");
        assert_eq!(buffer.len(), b"SUBSCRIBER|x".len());
    }

    #[test]
    fn test_multiple_messages_in_one_chunk() {
        let mut buffer = InboundBuffer::new();
        let frames = buffer.push(b"a\nb\n\nc\n");

        let data: Vec<&[u8]> = frames.iter().map(|f| &f.data[..]).collect();
        assert_eq!(data, vec![&b"a"[..], b"b", b"", b"c"]);
    }

    #[test]
    fn test_truncation() {
        let mut buffer = InboundBuffer::with_capacity(8);

        assert!(buffer.push(b"0123456789abcdef").is_empty());
        assert_eq!(buffer.len(), 8);

        let frames = buffer.push(b"ghij\nok\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].data[..], b"01234567");
        assert!(frames[0].truncated);

        // Truncation flag does not leak into the next message
        assert_eq!(&frames[1].data[..], b"ok");
        assert!(!frames[1].truncated);
    }

    #[test]
    fn test_full_message_with_crlf_is_not_truncated() {
        let mut buffer = InboundBuffer::with_capacity(8);

        let frames = buffer.push(b"01234567\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].data[..], b"01234567");
        assert!(!frames[0].truncated);

        // Same with the terminator split between chunks
        assert!(buffer.push(b"abcdefgh\r").is_empty());
        let frames = buffer.push(b"\n");
        assert_eq!(&frames[0].data[..], b"abcdefgh");
        assert!(!frames[0].truncated);
    }

    #[test]
    fn test_inner_carriage_return_is_kept() {
        let mut buffer = InboundBuffer::new();

        assert!(buffer.push(b"a\r").is_empty());
        let frames = buffer.push(b"b\r\n");
        assert_eq!(&frames[0].data[..], b"a\rb");
    }

    #[test]
    fn test_flush() {
        let mut buffer = InboundBuffer::new();
        assert!(buffer.flush().is_none());

        buffer.push(b"SUBSCRIBER|liga");
        let frame = buffer.flush().unwrap();
        assert_eq!(&frame.data[..], b"SUBSCRIBER|liga");
        assert!(buffer.flush().is_none());
    }

    #[test]
    fn test_reset() {
        let mut buffer = InboundBuffer::with_capacity(4);
        buffer.push(b"abcdefg");
        buffer.reset();

        assert!(buffer.is_empty());
        assert!(buffer.flush().is_none());
        assert_eq!(buffer.capacity(), 4);
    }
}
