//! Connection state machine phases
//!
//! Tracks the overall state of a connection from accept to teardown.

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Accepted, handshake not complete
    Idle,
    /// Handshake complete, streams may be opened
    Connected,
    /// Shutdown started by the peer, the transport or the broker
    ShuttingDown,
    /// Shutdown complete, all state released
    Closed,
}

impl ConnectionPhase {
    /// Move to `next` if the transition is allowed
    ///
    /// Phases only move forward; a late or duplicated event never revives a
    /// connection. Returns whether the phase changed.
    pub fn advance(&mut self, next: ConnectionPhase) -> bool {
        if next.rank() > self.rank() {
            *self = next;
            true
        } else {
            false
        }
    }

    /// Whether new streams and messages are still served
    pub fn accepts_traffic(&self) -> bool {
        matches!(self, ConnectionPhase::Idle | ConnectionPhase::Connected)
    }

    fn rank(&self) -> u8 {
        match self {
            ConnectionPhase::Idle => 0,
            ConnectionPhase::Connected => 1,
            ConnectionPhase::ShuttingDown => 2,
            ConnectionPhase::Closed => 3,
        }
    }
}
