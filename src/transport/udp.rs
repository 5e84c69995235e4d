//! UDP transport adapter
//!
//! Every datagram is one message and events go out as one datagram each, without a
//! terminator. UDP has no handshake and no close, so each peer address is tracked as
//! a connection with one implicit stream:
//!
//! - created on the first datagram from that address;
//! - released right after its datagram when it holds no subscription (publishers);
//! - dropped after `idle_timeout` without a datagram from it.
//!
//! Subscribers stay registered by sending their subscription again before the
//! timeout. The registry keeps a single entry per peer, so a refresh never
//! duplicates it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::protocol::constants::TERMINATOR;
use crate::session::{
    ConnectionMachine, Directive, SessionContext, ShutdownInitiator, TransportEvent,
};

use super::outbound::{ConnectionId, OutboundStream, SendRequest, StreamId};

/// Largest datagram read from the socket
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Shortest interval between idle sweeps
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(50);

const LINE_END: &[u8] = &[TERMINATOR];

/// Peer tracking limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpOptions {
    /// Peers tracked at once (0 = unlimited)
    pub max_peers: usize,

    /// Peers silent for this long are dropped with their subscription
    pub idle_timeout: Duration,
}

impl Default for UdpOptions {
    fn default() -> Self {
        Self {
            max_peers: 0,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

struct Peer {
    machine: ConnectionMachine,
    stream: StreamId,
    last_seen: Instant,
}

type PeerEvent = (SocketAddr, TransportEvent);

/// Serve datagrams until `shutdown` changes or its sender is dropped
///
/// Every tracked peer is closed on the way out, releasing its subscription.
pub async fn serve(
    socket: Arc<UdpSocket>,
    ctx: SessionContext,
    options: UdpOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut peers: HashMap<SocketAddr, Peer> = HashMap::new();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<PeerEvent>();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    let mut sweep = tokio::time::interval((options.idle_timeout / 4).max(MIN_SWEEP_PERIOD));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer_addr)) => {
                    let datagram = Bytes::copy_from_slice(&buf[..len]);
                    on_datagram(&mut peers, peer_addr, datagram, &socket, &ctx, options, &events_tx)
                        .await;
                }
                // ICMP errors caused by earlier sends surface here
                Err(e) => tracing::debug!(error = %e, "Datagram receive failed"),
            },
            Some((peer_addr, event)) = events_rx.recv() => {
                if let Some(peer) = peers.get_mut(&peer_addr) {
                    peer.machine.handle(event).await;
                }
            }
            _ = sweep.tick() => expire_idle(&mut peers, options.idle_timeout).await,
            _ = shutdown.changed() => break,
        }
    }

    let open = peers.len();
    for (_, peer) in peers.drain() {
        close_peer(peer, ShutdownInitiator::Local).await;
    }
    tracing::debug!(peers = open, "UDP adapter stopped");
}

async fn on_datagram(
    peers: &mut HashMap<SocketAddr, Peer>,
    peer_addr: SocketAddr,
    datagram: Bytes,
    socket: &Arc<UdpSocket>,
    ctx: &SessionContext,
    options: UdpOptions,
    events: &mpsc::UnboundedSender<PeerEvent>,
) {
    if !peers.contains_key(&peer_addr) {
        if options.max_peers > 0 && peers.len() >= options.max_peers {
            ctx.stats.connection_rejected();
            tracing::warn!(peer = %peer_addr, "Datagram dropped: peer limit reached");
            return;
        }
        let Some(peer) = open_peer(peer_addr, socket, ctx, events).await else {
            return;
        };
        peers.insert(peer_addr, peer);
    }

    let Some(peer) = peers.get_mut(&peer_addr) else {
        return;
    };
    peer.last_seen = Instant::now();

    let stream = peer.stream;
    peer.machine
        .handle(TransportEvent::DataReceived {
            stream,
            chunks: as_message(datagram),
        })
        .await;

    if !peer.machine.client().is_subscribed() {
        if let Some(peer) = peers.remove(&peer_addr) {
            close_peer(peer, ShutdownInitiator::Peer).await;
        }
    }
}

/// The datagram followed by exactly one terminator
fn as_message(mut datagram: Bytes) -> Vec<Bytes> {
    if datagram.last() == Some(&TERMINATOR) {
        datagram.truncate(datagram.len() - 1);
    }
    vec![datagram, Bytes::from_static(LINE_END)]
}

async fn open_peer(
    peer_addr: SocketAddr,
    socket: &Arc<UdpSocket>,
    ctx: &SessionContext,
    events: &mpsc::UnboundedSender<PeerEvent>,
) -> Option<Peer> {
    let mut machine = ConnectionMachine::new(ConnectionId::next(), ctx.clone());
    machine
        .handle(TransportEvent::Connected { peer_addr })
        .await;

    let stream = StreamId::next();
    let (outbound, requests) = OutboundStream::channel(stream);

    match machine
        .handle(TransportEvent::PeerStreamStarted { stream: outbound })
        .await
    {
        Directive::Continue => {
            tokio::spawn(write_datagrams(
                Arc::clone(socket),
                peer_addr,
                requests,
                events.clone(),
            ));
            Some(Peer {
                machine,
                stream,
                last_seen: Instant::now(),
            })
        }
        _ => {
            machine.handle(TransportEvent::ShutdownComplete).await;
            None
        }
    }
}

/// Send each request to `peer_addr` as one datagram
///
/// A failed send is reported and the writer keeps going; datagram errors do not
/// mean the peer is gone.
async fn write_datagrams(
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
    mut requests: mpsc::UnboundedReceiver<SendRequest>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    while let Some(request) = requests.recv().await {
        let result = socket
            .send_to(&request.payload, peer_addr)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string());

        if let Err(reason) = &result {
            tracing::debug!(peer = %peer_addr, error = %reason, "Datagram send failed");
        }

        if events
            .send((peer_addr, TransportEvent::SendCompleted { request, result }))
            .is_err()
        {
            return;
        }
    }
    tracing::trace!(peer = %peer_addr, "Datagram writer finished");
}

async fn expire_idle(peers: &mut HashMap<SocketAddr, Peer>, idle_timeout: Duration) {
    let now = Instant::now();
    let idle: Vec<SocketAddr> = peers
        .iter()
        .filter(|(_, peer)| now.duration_since(peer.last_seen) >= idle_timeout)
        .map(|(addr, _)| *addr)
        .collect();

    for addr in idle {
        if let Some(peer) = peers.remove(&addr) {
            close_peer(peer, ShutdownInitiator::Transport("idle timeout".into())).await;
        }
    }
}

async fn close_peer(mut peer: Peer, by: ShutdownInitiator) {
    peer.machine
        .handle(TransportEvent::ShutdownInitiated { by })
        .await;
    peer.machine.handle(TransportEvent::ShutdownComplete).await;
}

#[cfg(test)]
mod tests {
    use tokio::task::JoinHandle;

    use super::*;

    async fn serve_udp(
        ctx: SessionContext,
        options: UdpOptions,
    ) -> (SocketAddr, watch::Sender<bool>, JoinHandle<()>) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(serve(socket, ctx, options, shutdown_rx));
        (addr, shutdown_tx, task)
    }

    async fn peer(broker: SocketAddr) -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(broker).await.unwrap();
        socket
    }

    async fn recv(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 1024];
        let len = tokio::time::timeout(Duration::from_secs(5), socket.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8_lossy(&buf[..len]).into_owned()
    }

    async fn wait_until_empty(ctx: &SessionContext) {
        for _ in 0..200 {
            if ctx.registry.is_empty().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry still holds subscribers");
    }

    #[test]
    fn test_datagram_gets_one_terminator() {
        let with = as_message(Bytes::from_static(b"SUBSCRIBER|liga\n"));
        assert_eq!(&with[0][..], b"SUBSCRIBER|liga");
        assert_eq!(&with[1][..], b"\n");

        let without = as_message(Bytes::from_static(b"SUBSCRIBER|liga"));
        assert_eq!(&without[0][..], b"SUBSCRIBER|liga");
    }

    #[tokio::test]
    async fn test_subscribe_and_receive_over_udp() {
        let ctx = SessionContext::default();
        let (addr, _shutdown, _task) = serve_udp(ctx.clone(), UdpOptions::default()).await;

        let sub = peer(addr).await;
        sub.send(b"SUBSCRIBER|liga-final").await.unwrap();
        assert_eq!(recv(&sub).await, "SUBSCRIBED|liga-final");

        let publisher = peer(addr).await;
        publisher
            .send(b"PUBLISHER|liga-final|10:15:00|Gol de equipo A\n")
            .await
            .unwrap();
        assert_eq!(recv(&sub).await, "10:15:00|Gol de equipo A");

        // Refreshing the subscription keeps a single entry
        sub.send(b"SUBSCRIBER|liga-final").await.unwrap();
        assert_eq!(recv(&sub).await, "SUBSCRIBED|liga-final");
        assert_eq!(ctx.registry.len().await, 1);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.publications, 1);
        assert_eq!(stats.deliveries, 1);
        // Only the subscriber is still tracked
        assert_eq!(stats.connections_active, 1);
    }

    #[tokio::test]
    async fn test_garbage_datagram_is_dropped() {
        let ctx = SessionContext::default();
        let (addr, _shutdown, _task) = serve_udp(ctx.clone(), UdpOptions::default()).await;

        let sub = peer(addr).await;
        sub.send(b"SUBSCRIBER|liga").await.unwrap();
        recv(&sub).await;

        let other = peer(addr).await;
        other.send(b"HOLA|liga").await.unwrap();
        other.send(b"PUBLISHER|liga|10:00:00|ok").await.unwrap();

        assert_eq!(recv(&sub).await, "10:00:00|ok");
        assert_eq!(ctx.stats.snapshot().messages_malformed, 1);
    }

    #[tokio::test]
    async fn test_idle_subscriber_expires() {
        let ctx = SessionContext::default();
        let options = UdpOptions {
            idle_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let (addr, _shutdown, _task) = serve_udp(ctx.clone(), options).await;

        let sub = peer(addr).await;
        sub.send(b"SUBSCRIBER|liga").await.unwrap();
        recv(&sub).await;
        assert_eq!(ctx.registry.len().await, 1);

        wait_until_empty(&ctx).await;
        assert_eq!(ctx.stats.snapshot().connections_active, 0);
    }

    #[tokio::test]
    async fn test_peer_limit() {
        let ctx = SessionContext::default();
        let options = UdpOptions {
            max_peers: 1,
            ..Default::default()
        };
        let (addr, _shutdown, _task) = serve_udp(ctx.clone(), options).await;

        let first = peer(addr).await;
        first.send(b"SUBSCRIBER|liga").await.unwrap();
        recv(&first).await;

        let second = peer(addr).await;
        second.send(b"SUBSCRIBER|liga").await.unwrap();

        let mut buf = [0u8; 64];
        let reply = tokio::time::timeout(Duration::from_millis(200), second.recv(&mut buf)).await;
        assert!(reply.is_err());
        assert_eq!(ctx.stats.snapshot().connections_rejected, 1);
        assert_eq!(ctx.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_subscribers() {
        let ctx = SessionContext::default();
        let (addr, shutdown, task) = serve_udp(ctx.clone(), UdpOptions::default()).await;

        let sub = peer(addr).await;
        sub.send(b"SUBSCRIBER|liga").await.unwrap();
        recv(&sub).await;

        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert!(ctx.registry.is_empty().await);
        assert_eq!(ctx.stats.snapshot().connections_active, 0);
    }
}
