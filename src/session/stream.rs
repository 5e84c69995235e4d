//! Per-stream state management
//!
//! Each peer-opened stream carries its own inbound buffer and the handle used to
//! write back to it.

use std::time::Instant;

use crate::protocol::{Frame, InboundBuffer};
use crate::transport::{OutboundStream, StreamId};

/// Stream lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Opened by the peer, nothing received yet
    Open,
    /// At least one chunk received
    Receiving,
    /// Shut down; kept only until the machine drops it
    Closed,
}

/// Per-stream state
#[derive(Debug)]
pub struct StreamState {
    /// Current phase
    pub phase: StreamPhase,

    /// Partial inbound message
    pub buffer: InboundBuffer,

    /// Write handle for this stream
    pub outbound: OutboundStream,

    /// Whether the peer finished its sending half
    pub peer_finished: bool,

    /// Time the stream was opened
    pub opened_at: Instant,

    /// Total bytes received on this stream
    pub bytes_received: u64,

    /// Complete messages handed to the codec
    pub messages: u64,
}

impl StreamState {
    /// Create a new stream state
    pub fn new(outbound: OutboundStream, max_message_len: usize) -> Self {
        Self {
            phase: StreamPhase::Open,
            buffer: InboundBuffer::with_capacity(max_message_len),
            outbound,
            peer_finished: false,
            opened_at: Instant::now(),
            bytes_received: 0,
            messages: 0,
        }
    }

    pub fn id(&self) -> StreamId {
        self.outbound.id()
    }

    /// Feed a received chunk, returning the messages it completed
    pub fn on_data(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if self.phase == StreamPhase::Open {
            self.phase = StreamPhase::Receiving;
        }
        self.bytes_received += chunk.len() as u64;

        let frames = self.buffer.push(chunk);
        self.messages += frames.len() as u64;
        frames
    }

    /// The peer finished sending: whatever is buffered is the last message
    pub fn on_peer_finished(&mut self) -> Option<Frame> {
        self.peer_finished = true;
        let frame = self.buffer.flush();
        if frame.is_some() {
            self.messages += 1;
        }
        frame
    }

    /// Close the stream and discard any partial message
    pub fn close(&mut self) {
        self.phase = StreamPhase::Closed;
        self.buffer.reset();
    }

    pub fn is_closed(&self) -> bool {
        self.phase == StreamPhase::Closed
    }
}
