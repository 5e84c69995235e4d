//! Connection/stream identifiers and the outbound send path
//!
//! Every open stream gets an [`OutboundStream`]: a cheap handle that queues
//! [`SendRequest`]s for the stream's writer task. The writer reports each request back
//! through `TransportEvent::SendCompleted`, where it is dropped, so every payload is
//! released exactly once whether the write succeeded or not.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Process-unique stream identifier
///
/// Zero is never allocated, so it can stand for "no stream" in atomics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    pub fn next() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Why a payload is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    /// Subscription acknowledgement
    Ack,
    /// Event fanned out to a subscriber
    Broadcast,
}

/// An owned outbound payload travelling through the writer task
#[derive(Debug)]
pub struct SendRequest {
    pub stream: StreamId,
    pub kind: SendKind,
    pub payload: Bytes,
}

impl SendRequest {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Synchronous send failure: the stream's writer is gone
#[derive(Debug)]
pub struct SendError(pub SendRequest);

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is closed", self.0.stream)
    }
}

impl std::error::Error for SendError {}

/// Handle used to queue payloads on one stream
#[derive(Debug, Clone)]
pub struct OutboundStream {
    id: StreamId,
    tx: mpsc::UnboundedSender<SendRequest>,
}

impl OutboundStream {
    /// Create a handle and the receiving end for its writer task
    pub fn channel(id: StreamId) -> (Self, mpsc::UnboundedReceiver<SendRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Queue a payload without waiting for it to be written
    pub fn send(&self, kind: SendKind, payload: Bytes) -> Result<(), SendError> {
        let request = SendRequest {
            stream: self.id,
            kind,
            payload,
        };
        self.tx.send(request).map_err(|e| SendError(e.0))
    }

    /// Whether the writer task has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
