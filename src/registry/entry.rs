//! Subscriber entries
//!
//! The registry is a fixed table of slots. An occupied slot binds a topic to one
//! client and the stream events are pushed on.

use std::sync::Arc;
use std::time::Instant;

use crate::session::ClientLink;
use crate::transport::{ConnectionId, OutboundStream, StreamId};

/// An occupied registry slot
#[derive(Debug)]
pub struct SubscriberEntry {
    /// Subscribed topic
    pub topic: String,

    /// Owning client (referenced, not owned)
    pub client: Arc<ClientLink>,

    /// Stream events are sent on
    pub stream: OutboundStream,

    /// When the entry was created or last re-subscribed
    pub updated_at: Instant,
}

impl SubscriberEntry {
    pub fn new(topic: &str, client: Arc<ClientLink>, stream: OutboundStream) -> Self {
        Self {
            topic: topic.to_string(),
            client,
            stream,
            updated_at: Instant::now(),
        }
    }

    pub fn owner(&self) -> ConnectionId {
        self.client.id()
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream.id()
    }

    /// Exact topic match
    pub fn matches(&self, topic: &str) -> bool {
        self.topic == topic
    }

    /// Rebind to a new topic and stream (re-subscription)
    pub(super) fn rebind(&mut self, topic: &str, stream: OutboundStream) {
        self.topic.clear();
        self.topic.push_str(topic);
        self.stream = stream;
        self.updated_at = Instant::now();
    }
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A free slot was occupied
    Inserted { slot: usize },
    /// The client's existing entry was rebound
    Updated { slot: usize },
}

impl Upsert {
    pub fn slot(&self) -> usize {
        match *self {
            Upsert::Inserted { slot } | Upsert::Updated { slot } => slot,
        }
    }
}

/// What a `for_each_matching` visitor wants done with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Keep,
    Evict,
}

/// Snapshot of registry occupancy
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub occupied: usize,
    pub capacity: usize,
    pub topics: usize,
}
