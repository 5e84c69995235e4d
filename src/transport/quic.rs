//! QUIC transport adapter
//!
//! ```text
//!  Endpoint::accept ──► Incoming ──handshake──► Connection
//!                                                  │
//!                    ┌─────────── connection task ─┴──────────────────┐
//!                    │  select!                                       │
//!                    │    accept_bi() ──► PeerStreamStarted           │
//!                    │    events_rx   ──► machine.handle(event)       │
//!                    └────────▲───────────────────────▲───────────────┘
//!                             │                       │
//!                      reader task               writer task
//!                 DataReceived/PeerSendShutdown   SendCompleted
//! ```
//!
//! Every stream the peer opens gets a reader and a writer task; everything else
//! happens on the connection task, so the state machine sees one ordered event
//! sequence per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{ConnectionError, Endpoint, RecvStream, SendStream, VarInt};
use tokio::sync::{mpsc, Semaphore};

use crate::error::Result;
use crate::protocol::constants::STREAM_ABORT_CODE;
use crate::session::{
    ConnectionMachine, Directive, SessionContext, ShutdownInitiator, TransportEvent,
};

use super::io::{read_stream, write_stream, EventSender};
use super::outbound::{ConnectionId, OutboundStream, StreamId};

/// Create a server endpoint bound to `addr`
pub fn bind(addr: SocketAddr, config: quinn::ServerConfig) -> Result<Endpoint> {
    let endpoint = Endpoint::server(config, addr)?;
    Ok(endpoint)
}

/// Accept connections until the endpoint is closed
pub(crate) async fn accept_loop(
    endpoint: &Endpoint,
    ctx: &SessionContext,
    limiter: Option<&Arc<Semaphore>>,
) -> Result<()> {
    while let Some(incoming) = endpoint.accept().await {
        let permit = match limiter {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    ctx.stats.connection_rejected();
                    tracing::warn!(
                        peer = %incoming.remote_address(),
                        "Connection rejected: limit reached"
                    );
                    incoming.refuse();
                    continue;
                }
            },
            None => None,
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let peer = incoming.remote_address();

            match incoming.await {
                Ok(connection) => run_connection(connection, ctx).await,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "QUIC handshake failed");
                }
            }
        });
    }

    Ok(())
}

/// Drive one established connection to completion
pub async fn run_connection(connection: quinn::Connection, ctx: SessionContext) {
    let mut machine = ConnectionMachine::new(ConnectionId::next(), ctx);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    machine
        .handle(TransportEvent::Connected {
            peer_addr: connection.remote_address(),
        })
        .await;

    let initiator = loop {
        tokio::select! {
            accepted = connection.accept_bi() => match accepted {
                Ok((send, recv)) => open_stream(&mut machine, send, recv, &events_tx).await,
                Err(e) => break shutdown_initiator(&e),
            },
            Some(event) = events_rx.recv() => {
                if let Directive::AbortStream(stream) = machine.handle(event).await {
                    tracing::debug!(stream_id = %stream, "Abort requested for unowned stream");
                }
            }
        }
    };

    machine
        .handle(TransportEvent::ShutdownInitiated { by: initiator })
        .await;

    // Whatever the stream tasks reported before the connection went away
    while let Ok(event) = events_rx.try_recv() {
        machine.handle(event).await;
    }

    machine.handle(TransportEvent::ShutdownComplete).await;
}

async fn open_stream(
    machine: &mut ConnectionMachine,
    mut send: SendStream,
    mut recv: RecvStream,
    events: &EventSender,
) {
    let id = StreamId::next();
    let (outbound, requests) = OutboundStream::channel(id);

    match machine
        .handle(TransportEvent::PeerStreamStarted { stream: outbound })
        .await
    {
        Directive::Continue => {
            tokio::spawn(read_stream(id, recv, events.clone()));
            tokio::spawn(write_stream(id, send, requests, events.clone()));
        }
        Directive::AbortStream(_) | Directive::Closed => {
            let code = VarInt::from_u32(STREAM_ABORT_CODE);
            let _ = send.reset(code);
            let _ = recv.stop(code);
        }
    }
}

fn shutdown_initiator(error: &ConnectionError) -> ShutdownInitiator {
    match error {
        ConnectionError::ApplicationClosed(_) | ConnectionError::ConnectionClosed(_) => {
            ShutdownInitiator::Peer
        }
        ConnectionError::LocallyClosed => ShutdownInitiator::Local,
        other => ShutdownInitiator::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_initiator_mapping() {
        assert_eq!(
            shutdown_initiator(&ConnectionError::LocallyClosed),
            ShutdownInitiator::Local
        );
        assert!(matches!(
            shutdown_initiator(&ConnectionError::TimedOut),
            ShutdownInitiator::Transport(_)
        ));
        assert!(matches!(
            shutdown_initiator(&ConnectionError::Reset),
            ShutdownInitiator::Transport(_)
        ));
    }
}
