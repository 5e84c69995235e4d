//! Shared session context
//!
//! Everything a connection machine needs from the broker, bundled so adapters can
//! hand one clone to every connection they accept.

use std::sync::Arc;

use crate::protocol::constants::{MAX_MESSAGE_LEN, MAX_STREAMS_PER_CONNECTION};
use crate::registry::SubscriberRegistry;
use crate::stats::BrokerStats;

/// Per-connection resource limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Largest inbound message kept, in bytes
    pub max_message_len: usize,

    /// Streams a single connection may hold open at once
    pub max_streams_per_connection: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_message_len: MAX_MESSAGE_LEN,
            max_streams_per_connection: MAX_STREAMS_PER_CONNECTION,
        }
    }
}

/// Broker state shared by all connections
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<SubscriberRegistry>,
    pub stats: Arc<BrokerStats>,
    pub limits: SessionLimits,
}

impl SessionContext {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        stats: Arc<BrokerStats>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            registry,
            stats,
            limits,
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(
            Arc::new(SubscriberRegistry::new()),
            Arc::new(BrokerStats::new()),
            SessionLimits::default(),
        )
    }
}
