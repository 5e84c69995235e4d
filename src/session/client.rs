//! Per-connection client state
//!
//! A [`Client`] is owned by its connection's state machine. The part of it that the
//! subscriber registry must be able to touch (the "actively subscribed" flag and the
//! active stream) lives in a shared [`ClientLink`], so an eviction performed by another
//! connection's broadcast is visible to the owning machine.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::transport::{ConnectionId, StreamId};

/// Role a client takes once its first valid message arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Unknown,
    Publisher,
    Subscriber,
}

/// Subscription flags shared between a client and its registry entry
#[derive(Debug)]
pub struct ClientLink {
    id: ConnectionId,
    subscribed: AtomicBool,
    /// Raw `StreamId`, 0 when none
    active_stream: AtomicU64,
}

impl ClientLink {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            subscribed: AtomicBool::new(false),
            active_stream: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    pub fn active_stream(&self) -> Option<StreamId> {
        match self.active_stream.load(Ordering::Acquire) {
            0 => None,
            id => Some(StreamId(id)),
        }
    }

    pub(crate) fn mark_subscribed(&self, stream: StreamId) {
        self.active_stream.store(stream.0, Ordering::Release);
        self.subscribed.store(true, Ordering::Release);
    }

    pub(crate) fn clear_subscription(&self) {
        self.subscribed.store(false, Ordering::Release);
        self.active_stream.store(0, Ordering::Release);
    }
}

/// One peer connection
#[derive(Debug)]
pub struct Client {
    link: Arc<ClientLink>,
    pub peer_addr: Option<SocketAddr>,
    pub role: ClientRole,
    /// Last topic subscribed to (subscriber only); kept after an eviction
    pub topic: Option<String>,
    pub connected_at: Instant,
}

impl Client {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            link: Arc::new(ClientLink::new(id)),
            peer_addr: None,
            role: ClientRole::Unknown,
            topic: None,
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.link.id()
    }

    /// Shared flags handed to the registry
    pub fn link(&self) -> &Arc<ClientLink> {
        &self.link
    }

    pub fn is_subscribed(&self) -> bool {
        self.link.is_subscribed()
    }

    pub fn active_stream(&self) -> Option<StreamId> {
        self.link.active_stream()
    }

    /// Topic of the live subscription, `None` once the registry dropped it
    pub fn subscribed_topic(&self) -> Option<&str> {
        self.topic.as_deref().filter(|_| self.is_subscribed())
    }

    pub fn mark_publisher(&mut self) {
        self.role = ClientRole::Publisher;
    }

    pub fn mark_subscriber(&mut self, topic: &str) {
        self.role = ClientRole::Subscriber;
        self.topic = Some(topic.to_string());
    }
}
