//! TCP transport adapter
//!
//! Plain TCP carries exactly one stream per connection and has no half-close: the
//! peer's end of stream flushes any unterminated message and then ends the
//! connection.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Semaphore};

use crate::error::Result;
use crate::session::{
    ConnectionMachine, Directive, SessionContext, ShutdownInitiator, TransportEvent,
};

use super::io::{write_stream, READ_BUFFER_SIZE};
use super::outbound::{ConnectionId, OutboundStream, StreamId};

/// Accept connections forever
pub(crate) async fn accept_loop(
    listener: &TcpListener,
    ctx: &SessionContext,
    limiter: Option<&Arc<Semaphore>>,
    tcp_nodelay: bool,
    shutdown: &watch::Receiver<bool>,
) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                let permit = match limiter {
                    Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            ctx.stats.connection_rejected();
                            tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                            continue;
                        }
                    },
                    None => None,
                };

                if tcp_nodelay {
                    if let Err(e) = socket.set_nodelay(true) {
                        tracing::error!(error = %e, "Failed to configure socket");
                        continue;
                    }
                }

                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_connection(socket, peer_addr, ctx, shutdown).await;
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Drive one TCP connection to completion
///
/// The connection ends when the peer closes, the socket fails, or `shutdown`
/// changes.
pub async fn run_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    ctx: SessionContext,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut machine = ConnectionMachine::new(ConnectionId::next(), ctx);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    machine
        .handle(TransportEvent::Connected { peer_addr })
        .await;

    let (mut reader, writer) = socket.into_split();
    let stream = StreamId::next();
    let (outbound, requests) = OutboundStream::channel(stream);

    match machine
        .handle(TransportEvent::PeerStreamStarted { stream: outbound })
        .await
    {
        Directive::Continue => {
            tokio::spawn(write_stream(stream, writer, requests, events_tx.clone()));
        }
        _ => {
            machine.handle(TransportEvent::ShutdownComplete).await;
            return;
        }
    }

    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    let initiator = loop {
        buf.reserve(READ_BUFFER_SIZE);

        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    machine.handle(TransportEvent::PeerSendShutdown { stream }).await;
                    break ShutdownInitiator::Peer;
                }
                Ok(_) => {
                    let chunk = buf.split().freeze();
                    machine
                        .handle(TransportEvent::DataReceived { stream, chunks: vec![chunk] })
                        .await;
                }
                Err(e) => break ShutdownInitiator::Transport(e.to_string()),
            },
            Some(event) = events_rx.recv() => {
                machine.handle(event).await;
            }
            _ = shutdown.changed() => break ShutdownInitiator::Local,
        }
    };

    machine
        .handle(TransportEvent::ShutdownInitiated { by: initiator })
        .await;

    while let Ok(event) = events_rx.try_recv() {
        machine.handle(event).await;
    }

    machine
        .handle(TransportEvent::StreamShutdownComplete { stream })
        .await;
    machine.handle(TransportEvent::ShutdownComplete).await;
}
