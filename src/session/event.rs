//! Transport lifecycle events
//!
//! Transport adapters translate whatever their library reports into these values and
//! feed them, in order, to the connection's [`ConnectionMachine`](super::ConnectionMachine).

use std::net::SocketAddr;

use bytes::Bytes;

use crate::transport::{OutboundStream, SendRequest, StreamId};

/// Who started tearing a connection down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownInitiator {
    /// The peer closed the connection
    Peer,
    /// The transport gave up (timeout, protocol violation, reset)
    Transport(String),
    /// The broker closed it
    Local,
}

impl std::fmt::Display for ShutdownInitiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownInitiator::Peer => write!(f, "peer"),
            ShutdownInitiator::Transport(reason) => write!(f, "transport ({})", reason),
            ShutdownInitiator::Local => write!(f, "local"),
        }
    }
}

/// Input to the connection state machine
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake complete
    Connected { peer_addr: SocketAddr },

    /// The peer opened a stream; `stream` queues payloads for its writer
    PeerStreamStarted { stream: OutboundStream },

    /// One or more chunks arrived on a stream
    DataReceived { stream: StreamId, chunks: Vec<Bytes> },

    /// The peer finished its sending half of a stream
    PeerSendShutdown { stream: StreamId },

    /// The writer finished with a send request, successfully or not
    SendCompleted {
        request: SendRequest,
        result: Result<(), String>,
    },

    /// Both halves of a stream are done
    StreamShutdownComplete { stream: StreamId },

    /// The connection is going away
    ShutdownInitiated { by: ShutdownInitiator },

    /// The connection is gone
    ShutdownComplete,
}

/// What the adapter must do after an event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Keep going
    Continue,
    /// Reset both halves of this stream; the connection is unaffected
    AbortStream(StreamId),
    /// The connection is closed, stop driving it
    Closed,
}
