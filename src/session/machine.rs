//! Connection/stream state machine
//!
//! One [`ConnectionMachine`] exists per peer connection. The transport adapter feeds
//! it [`TransportEvent`]s in order from a single task, so the machine itself is never
//! shared; the subscriber registry is the only state it touches that other
//! connections see.
//!
//! ```text
//!  Idle ──Connected──► Connected ──ShutdownInitiated──► ShuttingDown ──ShutdownComplete──► Closed
//!                          │
//!                  PeerStreamStarted
//!                          ▼
//!                        Open ──DataReceived──► Receiving ──StreamShutdownComplete──► Closed
//! ```
//!
//! Errors from one client's traffic (malformed messages, a full registry, a dead
//! subscriber) are logged here and go no further.

use std::collections::HashMap;
use std::time::Instant;

use crate::protocol::{Frame, Request, Response};
use crate::session::context::SessionContext;
use crate::session::event::{Directive, ShutdownInitiator, TransportEvent};
use crate::session::state::ConnectionPhase;
use crate::session::stream::StreamState;
use crate::session::Client;
use crate::transport::{ConnectionId, SendKind, SendRequest, StreamId};

/// State machine for one connection and its streams
pub struct ConnectionMachine {
    client: Client,
    phase: ConnectionPhase,
    streams: HashMap<StreamId, StreamState>,
    connected_at: Option<Instant>,
    ctx: SessionContext,
}

impl ConnectionMachine {
    /// Create the machine for a freshly accepted connection
    pub fn new(id: ConnectionId, ctx: SessionContext) -> Self {
        Self {
            client: Client::new(id),
            phase: ConnectionPhase::Idle,
            streams: HashMap::new(),
            connected_at: None,
            ctx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.client.id()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn has_stream(&self, stream: StreamId) -> bool {
        self.streams.contains_key(&stream)
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ConnectionPhase::Closed
    }

    /// Apply one transport event
    pub async fn handle(&mut self, event: TransportEvent) -> Directive {
        if self.is_closed() {
            tracing::debug!(connection_id = %self.id(), event = ?event, "Event after close ignored");
            return Directive::Closed;
        }

        match event {
            TransportEvent::Connected { peer_addr } => {
                self.client.peer_addr = Some(peer_addr);
                if self.phase.advance(ConnectionPhase::Connected) {
                    self.connected_at = Some(Instant::now());
                    self.ctx.stats.connection_opened();
                    tracing::info!(
                        connection_id = %self.id(),
                        peer = %peer_addr,
                        "Connection established"
                    );
                }
                Directive::Continue
            }

            TransportEvent::PeerStreamStarted { stream } => {
                let id = stream.id();

                if !self.phase.accepts_traffic() {
                    tracing::debug!(connection_id = %self.id(), stream_id = %id, "Stream opened during shutdown");
                    return Directive::AbortStream(id);
                }

                if self.streams.len() >= self.ctx.limits.max_streams_per_connection {
                    self.ctx.stats.stream_aborted();
                    tracing::warn!(
                        connection_id = %self.id(),
                        stream_id = %id,
                        limit = self.ctx.limits.max_streams_per_connection,
                        "Stream rejected: limit reached"
                    );
                    return Directive::AbortStream(id);
                }

                self.streams
                    .insert(id, StreamState::new(stream, self.ctx.limits.max_message_len));
                tracing::debug!(connection_id = %self.id(), stream_id = %id, "Peer stream started");
                Directive::Continue
            }

            TransportEvent::DataReceived { stream, chunks } => {
                let Some(state) = self
                    .streams
                    .get_mut(&stream)
                    .filter(|state| !state.is_closed())
                else {
                    tracing::debug!(connection_id = %self.id(), stream_id = %stream, "Data for unknown stream");
                    return Directive::Continue;
                };

                let mut frames = Vec::new();
                for chunk in &chunks {
                    self.ctx.stats.add_bytes_received(chunk.len());
                    frames.extend(state.on_data(chunk));
                }

                tracing::trace!(
                    connection_id = %self.id(),
                    stream_id = %stream,
                    chunks = chunks.len(),
                    messages = frames.len(),
                    "Data received"
                );

                for frame in frames {
                    self.dispatch(stream, frame).await;
                }
                Directive::Continue
            }

            TransportEvent::PeerSendShutdown { stream } => {
                let last = self
                    .streams
                    .get_mut(&stream)
                    .and_then(|state| state.on_peer_finished());

                tracing::debug!(connection_id = %self.id(), stream_id = %stream, "Peer finished sending");

                if let Some(frame) = last {
                    self.dispatch(stream, frame).await;
                }

                // Nothing will ever be written to a stream that carries no
                // subscription; dropping its handle lets the writer finish our half.
                if self.client.active_stream() != Some(stream) {
                    self.release_if_finished(stream);
                }
                Directive::Continue
            }

            TransportEvent::SendCompleted { request, result } => {
                self.on_send_completed(request, result).await;
                Directive::Continue
            }

            TransportEvent::StreamShutdownComplete { stream } => {
                let evicted = self.ctx.registry.remove_by_stream(stream).await;
                if evicted > 0 {
                    self.ctx.stats.evicted(evicted);
                }

                if let Some(mut state) = self.streams.remove(&stream) {
                    state.close();
                    tracing::debug!(
                        connection_id = %self.id(),
                        stream_id = %stream,
                        bytes_received = state.bytes_received,
                        messages = state.messages,
                        "Stream shutdown complete"
                    );
                }
                Directive::Continue
            }

            TransportEvent::ShutdownInitiated { by } => {
                if self.phase.advance(ConnectionPhase::ShuttingDown) {
                    match &by {
                        ShutdownInitiator::Transport(reason) => tracing::warn!(
                            connection_id = %self.id(),
                            reason = %reason,
                            "Transport closed connection"
                        ),
                        other => tracing::info!(
                            connection_id = %self.id(),
                            by = %other,
                            "Connection shutting down"
                        ),
                    }
                }
                Directive::Continue
            }

            TransportEvent::ShutdownComplete => {
                self.close().await;
                Directive::Closed
            }
        }
    }

    async fn dispatch(&mut self, stream: StreamId, frame: Frame) {
        if frame.truncated {
            self.ctx.stats.message_truncated();
            tracing::warn!(
                connection_id = %self.id(),
                stream_id = %stream,
                limit = self.ctx.limits.max_message_len,
                "Message truncated"
            );
        }

        if frame.data.is_empty() {
            return;
        }

        match Request::parse_bytes(&frame.data) {
            Ok(Request::Publish(publication)) => {
                self.client.mark_publisher();

                tracing::info!(
                    connection_id = %self.id(),
                    topic = %publication.topic,
                    timestamp = %publication.timestamp,
                    text = %publication.text,
                    "Event received"
                );

                let payload = Response::Event(publication.to_event()).encode();
                let report = self.ctx.registry.broadcast(&publication.topic, payload).await;
                self.ctx.stats.published(report.delivered, report.evicted);
            }
            Ok(Request::Subscribe { topic }) => {
                self.subscribe(stream, &topic).await;
            }
            Err(e) => {
                self.ctx.stats.message_malformed();
                tracing::warn!(
                    connection_id = %self.id(),
                    stream_id = %stream,
                    error = %e,
                    "Message discarded"
                );
            }
        }
    }

    async fn subscribe(&mut self, stream: StreamId, topic: &str) {
        let Some(outbound) = self.streams.get(&stream).map(|s| s.outbound.clone()) else {
            return;
        };
        let previous = self.client.active_stream().filter(|id| *id != stream);

        match self
            .ctx
            .registry
            .upsert(topic, self.client.link(), &outbound)
            .await
        {
            Ok(outcome) => {
                self.client.mark_subscriber(topic);
                self.ctx.stats.subscribed();

                // The entry moved away from a stream the peer already finished
                if let Some(previous) = previous {
                    self.release_if_finished(previous);
                }

                tracing::info!(
                    connection_id = %self.id(),
                    stream_id = %stream,
                    topic = topic,
                    outcome = ?outcome,
                    "Subscriber registered"
                );

                let ack = Response::Subscribed {
                    topic: topic.to_string(),
                }
                .encode();

                if let Err(e) = outbound.send(SendKind::Ack, ack) {
                    self.ctx.stats.send_failed();
                    tracing::warn!(connection_id = %self.id(), error = %e, "Acknowledgement not sent");
                    let evicted = self.ctx.registry.remove_by_stream(stream).await;
                    self.ctx.stats.evicted(evicted);
                }
            }
            Err(e) => {
                self.ctx.stats.subscription_rejected();
                tracing::warn!(
                    connection_id = %self.id(),
                    stream_id = %stream,
                    error = %e,
                    "Subscription rejected"
                );
            }
        }
    }

    fn release_if_finished(&mut self, stream: StreamId) {
        if !self.streams.get(&stream).is_some_and(|state| state.peer_finished) {
            return;
        }
        if let Some(mut state) = self.streams.remove(&stream) {
            state.close();
            tracing::debug!(connection_id = %self.id(), stream_id = %stream, "Stream released");
        }
    }

    async fn on_send_completed(&mut self, request: SendRequest, result: Result<(), String>) {
        match result {
            Ok(()) => {
                tracing::trace!(
                    connection_id = %self.id(),
                    stream_id = %request.stream,
                    bytes = request.len(),
                    "Send complete"
                );
            }
            Err(reason) => {
                self.ctx.stats.send_failed();
                tracing::warn!(
                    connection_id = %self.id(),
                    stream_id = %request.stream,
                    kind = ?request.kind,
                    error = %reason,
                    "Send failed"
                );

                if request.kind == SendKind::Broadcast {
                    let evicted = self.ctx.registry.remove_by_stream(request.stream).await;
                    self.ctx.stats.evicted(evicted);
                }
            }
        }
        // `request` is released here, exactly once
    }

    async fn close(&mut self) {
        let removed = self.ctx.registry.remove_by_client(self.id()).await;

        for (_, mut state) in self.streams.drain() {
            state.close();
        }

        self.phase.advance(ConnectionPhase::Closed);

        let duration = self.connected_at.map(|t| t.elapsed());
        if duration.is_some() {
            self.ctx.stats.connection_closed();
        }

        tracing::info!(
            connection_id = %self.id(),
            role = ?self.client.role,
            subscriptions_removed = removed,
            duration = ?duration,
            "Connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::{RegistryConfig, SubscriberRegistry};
    use crate::session::context::SessionLimits;
    use crate::session::ClientRole;
    use crate::stats::BrokerStats;
    use crate::transport::OutboundStream;

    fn context(capacity: usize) -> SessionContext {
        SessionContext::new(
            Arc::new(SubscriberRegistry::with_config(
                RegistryConfig::default().capacity(capacity),
            )),
            Arc::new(BrokerStats::new()),
            SessionLimits::default(),
        )
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    async fn connected(ctx: &SessionContext) -> ConnectionMachine {
        let mut machine = ConnectionMachine::new(ConnectionId::next(), ctx.clone());
        let directive = machine
            .handle(TransportEvent::Connected { peer_addr: peer() })
            .await;
        assert_eq!(directive, Directive::Continue);
        machine
    }

    async fn open_stream(
        machine: &mut ConnectionMachine,
    ) -> (StreamId, mpsc::UnboundedReceiver<SendRequest>) {
        let (stream, rx) = OutboundStream::channel(StreamId::next());
        let id = stream.id();
        let directive = machine
            .handle(TransportEvent::PeerStreamStarted { stream })
            .await;
        assert_eq!(directive, Directive::Continue);
        (id, rx)
    }

    async fn send(machine: &mut ConnectionMachine, stream: StreamId, data: &'static [u8]) {
        machine
            .handle(TransportEvent::DataReceived {
                stream,
                chunks: vec![Bytes::from_static(data)],
            })
            .await;
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SendRequest>) -> Vec<(SendKind, Bytes)> {
        let mut out = Vec::new();
        while let Ok(request) = rx.try_recv() {
            out.push((request.kind, request.payload));
        }
        out
    }

    #[tokio::test]
    async fn test_subscribe_then_publish() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;
        let mut b = connected(&ctx).await;
        let (a_stream, mut a_rx) = open_stream(&mut a).await;
        let (b_stream, mut b_rx) = open_stream(&mut b).await;

        send(&mut a, a_stream, b"SUBSCRIBER|liga-final\n").await;
        assert_eq!(
            drain(&mut a_rx),
            vec![(SendKind::Ack, Bytes::from_static(b"SUBSCRIBED|liga-final"))]
        );
        assert_eq!(a.client().role, ClientRole::Subscriber);
        assert!(a.client().is_subscribed());
        assert_eq!(a.client().active_stream(), Some(a_stream));

        send(&mut b, b_stream, b"PUBLISHER|liga-final|10:15:00|Gol de equipo A\n").await;
        assert_eq!(b.client().role, ClientRole::Publisher);

        assert_eq!(
            drain(&mut a_rx),
            vec![(
                SendKind::Broadcast,
                Bytes::from_static(b"10:15:00|Gol de equipo A")
            )]
        );
        // Publishers get nothing back
        assert!(drain(&mut b_rx).is_empty());

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.publications, 1);
        assert_eq!(stats.deliveries, 1);
        assert_eq!(stats.subscriptions, 1);
    }

    #[tokio::test]
    async fn test_message_split_across_chunks() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;
        let (stream, mut rx) = open_stream(&mut a).await;

        a.handle(TransportEvent::DataReceived {
            stream,
            chunks: vec![
                Bytes::from_static(b"SUBSCR"),
                Bytes::from_static(b"IBER|co"),
            ],
        })
        .await;
        assert!(drain(&mut rx).is_empty());

        send(&mut a, stream, b"pa\r\n").await;
        assert_eq!(
            drain(&mut rx),
            vec![(SendKind::Ack, Bytes::from_static(b"SUBSCRIBED|copa"))]
        );
    }

    #[tokio::test]
    async fn test_unterminated_message_flushed_on_peer_finish() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;
        let (stream, mut rx) = open_stream(&mut a).await;

        send(&mut a, stream, b"SUBSCRIBER|liga").await;
        assert!(drain(&mut rx).is_empty());

        a.handle(TransportEvent::PeerSendShutdown { stream }).await;
        assert_eq!(drain(&mut rx).len(), 1);
        // Stream stays usable for events after the peer's FIN
        assert!(a.has_stream(stream));
        assert!(a.client().is_subscribed());
    }

    #[tokio::test]
    async fn test_finished_publisher_stream_is_released() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;
        let (stream, mut rx) = open_stream(&mut a).await;

        send(&mut a, stream, b"PUBLISHER|liga|10:00:00|Inicio\n").await;
        a.handle(TransportEvent::PeerSendShutdown { stream }).await;

        assert!(!a.has_stream(stream));
        // The writer sees its channel close
        assert!(rx.recv().await.is_none());
        assert_eq!(a.phase(), ConnectionPhase::Connected);
    }

    #[tokio::test]
    async fn test_resubscribe_keeps_single_entry() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;
        let (stream, mut rx) = open_stream(&mut a).await;

        send(&mut a, stream, b"SUBSCRIBER|liga\n").await;
        send(&mut a, stream, b"SUBSCRIBER|copa\n").await;

        assert_eq!(ctx.registry.len().await, 1);
        assert_eq!(ctx.registry.topic_of(a.id()).await.as_deref(), Some("copa"));
        assert_eq!(a.client().topic.as_deref(), Some("copa"));
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_resubscribe_on_new_stream_releases_finished_stream() {
        let mut ctx = context(8);
        ctx.limits.max_streams_per_connection = 2;
        let mut a = connected(&ctx).await;

        let (first, mut first_rx) = open_stream(&mut a).await;
        send(&mut a, first, b"SUBSCRIBER|liga\n").await;
        a.handle(TransportEvent::PeerSendShutdown { stream: first }).await;
        // Still the active subscription stream, so it is kept
        assert!(a.has_stream(first));
        assert_eq!(drain(&mut first_rx).len(), 1);

        let (second, mut second_rx) = open_stream(&mut a).await;
        send(&mut a, second, b"SUBSCRIBER|copa\n").await;
        assert_eq!(drain(&mut second_rx).len(), 1);
        assert_eq!(a.client().active_stream(), Some(second));

        assert!(!a.has_stream(first));
        assert_eq!(a.stream_count(), 1);
        assert!(first_rx.recv().await.is_none());

        // The freed slot accepts another stream
        let (_third, _third_rx) = open_stream(&mut a).await;
        assert_eq!(a.stream_count(), 2);
        assert_eq!(ctx.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_resubscribe_on_new_stream_keeps_open_stream() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;

        let (first, _first_rx) = open_stream(&mut a).await;
        send(&mut a, first, b"SUBSCRIBER|liga\n").await;
        let (second, _second_rx) = open_stream(&mut a).await;
        send(&mut a, second, b"SUBSCRIBER|copa\n").await;

        // The peer may still send on the first stream
        assert!(a.has_stream(first));

        // Once it finishes, it no longer carries the subscription and is released
        a.handle(TransportEvent::PeerSendShutdown { stream: first }).await;
        assert!(!a.has_stream(first));
        assert!(a.has_stream(second));
    }

    #[tokio::test]
    async fn test_publication_with_reserved_timestamp_is_dropped() {
        let ctx = context(8);
        let mut sub = connected(&ctx).await;
        let (s_stream, mut s_rx) = open_stream(&mut sub).await;
        send(&mut sub, s_stream, b"SUBSCRIBER|t\n").await;
        drain(&mut s_rx);

        let mut publisher = connected(&ctx).await;
        let (p_stream, _p_rx) = open_stream(&mut publisher).await;
        send(&mut publisher, p_stream, b"PUBLISHER|t|SUBSCRIBED|x\n").await;

        assert!(drain(&mut s_rx).is_empty());
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.messages_malformed, 1);
        assert_eq!(stats.publications, 0);
    }

    #[tokio::test]
    async fn test_full_registry_sends_no_ack() {
        let ctx = context(2);
        let mut subs = Vec::new();
        for _ in 0..2 {
            let mut machine = connected(&ctx).await;
            let (stream, mut rx) = open_stream(&mut machine).await;
            send(&mut machine, stream, b"SUBSCRIBER|liga\n").await;
            assert_eq!(drain(&mut rx).len(), 1);
            subs.push((machine, rx));
        }

        let mut late = connected(&ctx).await;
        let (late_stream, mut late_rx) = open_stream(&mut late).await;
        send(&mut late, late_stream, b"SUBSCRIBER|liga\n").await;

        assert!(drain(&mut late_rx).is_empty());
        assert!(!late.client().is_subscribed());
        assert_eq!(ctx.stats.snapshot().subscriptions_rejected, 1);

        // Existing subscribers still receive events
        let mut publisher = connected(&ctx).await;
        let (p_stream, _p_rx) = open_stream(&mut publisher).await;
        send(&mut publisher, p_stream, b"PUBLISHER|liga|12:00:00|Fin\n").await;

        for (_, rx) in subs.iter_mut() {
            assert_eq!(
                drain(rx),
                vec![(SendKind::Broadcast, Bytes::from_static(b"12:00:00|Fin"))]
            );
        }
        assert!(drain(&mut late_rx).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages_are_dropped() {
        let ctx = context(8);
        let mut sub = connected(&ctx).await;
        let (s_stream, mut s_rx) = open_stream(&mut sub).await;
        send(&mut sub, s_stream, b"SUBSCRIBER|liga\n").await;
        drain(&mut s_rx);

        let mut a = connected(&ctx).await;
        let (stream, _rx) = open_stream(&mut a).await;
        send(&mut a, stream, b"PUBLISHER|liga|10:00:00\n").await;
        send(&mut a, stream, b"HOLA|liga\n").await;
        send(&mut a, stream, b"SUBSCRIBER|\n").await;

        assert!(drain(&mut s_rx).is_empty());
        assert_eq!(ctx.stats.snapshot().messages_malformed, 3);
        assert_eq!(a.phase(), ConnectionPhase::Connected);
        assert_eq!(a.client().role, ClientRole::Unknown);

        // The connection keeps working afterwards
        send(&mut a, stream, b"PUBLISHER|liga|10:00:01|ok\n").await;
        assert_eq!(drain(&mut s_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_message_is_truncated() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;
        let (stream, _rx) = open_stream(&mut a).await;

        let mut big = b"PUBLISHER|liga|10:00:00|".to_vec();
        big.extend(std::iter::repeat(b'x').take(2000));
        big.push(b'\n');

        a.handle(TransportEvent::DataReceived {
            stream,
            chunks: vec![Bytes::from(big)],
        })
        .await;

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.messages_truncated, 1);
        // Best effort: the kept prefix is still a valid publication
        assert_eq!(stats.publications, 1);
        assert_eq!(a.phase(), ConnectionPhase::Connected);
    }

    #[tokio::test]
    async fn test_stream_limit_aborts_only_new_stream() {
        let mut ctx = context(8);
        ctx.limits.max_streams_per_connection = 1;
        let mut a = connected(&ctx).await;
        let (first, mut rx) = open_stream(&mut a).await;

        let (extra, _extra_rx) = OutboundStream::channel(StreamId::next());
        let extra_id = extra.id();
        let directive = a
            .handle(TransportEvent::PeerStreamStarted { stream: extra })
            .await;

        assert_eq!(directive, Directive::AbortStream(extra_id));
        assert!(!a.has_stream(extra_id));
        assert_eq!(ctx.stats.snapshot().streams_aborted, 1);

        send(&mut a, first, b"SUBSCRIBER|liga\n").await;
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_stream_shutdown_evicts_subscriber() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;
        let (stream, _rx) = open_stream(&mut a).await;
        send(&mut a, stream, b"SUBSCRIBER|liga\n").await;

        a.handle(TransportEvent::StreamShutdownComplete { stream }).await;
        assert!(ctx.registry.is_empty().await);
        assert!(!a.client().is_subscribed());
        assert_eq!(a.client().subscribed_topic(), None);
        assert_eq!(a.client().topic.as_deref(), Some("liga"));
        assert_eq!(a.stream_count(), 0);

        // Second shutdown for the same stream is a no-op
        a.handle(TransportEvent::StreamShutdownComplete { stream }).await;
        assert!(ctx.registry.is_empty().await);
        assert_eq!(a.phase(), ConnectionPhase::Connected);
    }

    #[tokio::test]
    async fn test_failed_broadcast_completion_evicts() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;
        let (stream, mut rx) = open_stream(&mut a).await;
        send(&mut a, stream, b"SUBSCRIBER|liga\n").await;
        drain(&mut rx);

        ctx.registry
            .broadcast("liga", Bytes::from_static(b"t|x"))
            .await;
        let request = rx.try_recv().unwrap();

        a.handle(TransportEvent::SendCompleted {
            request,
            result: Err("stream reset by peer".into()),
        })
        .await;

        assert!(ctx.registry.is_empty().await);
        assert!(!a.client().is_subscribed());
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_failed_ack_completion_keeps_subscription() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;
        let (stream, mut rx) = open_stream(&mut a).await;
        send(&mut a, stream, b"SUBSCRIBER|liga\n").await;

        let ack = rx.try_recv().unwrap();
        assert_eq!(ack.kind, SendKind::Ack);
        a.handle(TransportEvent::SendCompleted {
            request: ack,
            result: Err("flow control".into()),
        })
        .await;

        assert_eq!(ctx.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_subscriber_gone_mid_broadcast() {
        let ctx = context(8);
        let mut receivers = Vec::new();
        let mut machines = Vec::new();
        for _ in 0..3 {
            let mut m = connected(&ctx).await;
            let (s, mut rx) = open_stream(&mut m).await;
            send(&mut m, s, b"SUBSCRIBER|liga\n").await;
            drain(&mut rx);
            receivers.push(Some(rx));
            machines.push(m);
        }

        // Second subscriber's peer vanished: its writer is gone
        receivers[1].take();

        let mut publisher = connected(&ctx).await;
        let (p, _p_rx) = open_stream(&mut publisher).await;
        send(&mut publisher, p, b"PUBLISHER|liga|10:00:00|Gol\n").await;

        assert_eq!(drain(receivers[0].as_mut().unwrap()).len(), 1);
        assert_eq!(drain(receivers[2].as_mut().unwrap()).len(), 1);
        assert!(!machines[1].client().is_subscribed());
        assert_eq!(machines[1].client().subscribed_topic(), None);
        assert_eq!(machines[0].client().subscribed_topic(), Some("liga"));
        assert_eq!(ctx.registry.subscriber_count("liga").await, 2);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.deliveries, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(publisher.phase(), ConnectionPhase::Connected);
    }

    #[tokio::test]
    async fn test_connection_shutdown_releases_everything() {
        let ctx = context(8);
        let mut a = connected(&ctx).await;
        let (stream, _rx) = open_stream(&mut a).await;
        send(&mut a, stream, b"SUBSCRIBER|liga\n").await;

        let directive = a
            .handle(TransportEvent::ShutdownInitiated {
                by: ShutdownInitiator::Transport("idle timeout".into()),
            })
            .await;
        assert_eq!(directive, Directive::Continue);
        assert_eq!(a.phase(), ConnectionPhase::ShuttingDown);

        // No new streams while shutting down
        let (late, _late_rx) = OutboundStream::channel(StreamId::next());
        let late_id = late.id();
        assert_eq!(
            a.handle(TransportEvent::PeerStreamStarted { stream: late }).await,
            Directive::AbortStream(late_id)
        );

        assert_eq!(a.handle(TransportEvent::ShutdownComplete).await, Directive::Closed);
        assert!(a.is_closed());
        assert_eq!(a.stream_count(), 0);
        assert!(ctx.registry.is_empty().await);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.connections_total, 1);
        assert_eq!(stats.connections_active, 0);

        // Everything after close is ignored
        assert_eq!(
            a.handle(TransportEvent::StreamShutdownComplete { stream }).await,
            Directive::Closed
        );
    }
}
