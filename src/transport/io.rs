//! Stream reader and writer tasks
//!
//! Adapters spawn one writer per stream (and, for QUIC, one reader). Both translate
//! I/O results into [`TransportEvent`]s and post them to the connection's event
//! channel; neither touches broker state directly.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::protocol::constants::TERMINATOR;
use crate::session::TransportEvent;

use super::outbound::{SendRequest, StreamId};

/// Bytes requested from the transport per read
pub const READ_BUFFER_SIZE: usize = 4096;

pub(crate) type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Drain `requests` onto `io`, one terminated line per request
///
/// Each request is handed back through `SendCompleted`. On the first write error the
/// stream is reported shut down and the task exits; requests still queued are
/// dropped with the channel. When every [`OutboundStream`](super::OutboundStream)
/// handle is gone the write half is finished.
pub(crate) async fn write_stream<W>(
    stream: StreamId,
    mut io: W,
    mut requests: mpsc::UnboundedReceiver<SendRequest>,
    events: EventSender,
) where
    W: AsyncWrite + Unpin,
{
    let mut line = BytesMut::with_capacity(READ_BUFFER_SIZE);

    while let Some(request) = requests.recv().await {
        line.clear();
        line.extend_from_slice(&request.payload);
        line.put_u8(TERMINATOR);

        let result = match io.write_all(&line).await {
            Ok(()) => io.flush().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let _ = events.send(TransportEvent::SendCompleted {
                    request,
                    result: Ok(()),
                });
            }
            Err(e) => {
                tracing::debug!(stream_id = %stream, error = %e, "Stream write failed");
                let _ = events.send(TransportEvent::SendCompleted {
                    request,
                    result: Err(e.to_string()),
                });
                let _ = events.send(TransportEvent::StreamShutdownComplete { stream });
                return;
            }
        }
    }

    let _ = io.shutdown().await;
    tracing::trace!(stream_id = %stream, "Stream writer finished");
}

/// Read `io` until the peer finishes or the stream fails
///
/// A clean end of stream is reported as `PeerSendShutdown`; the stream stays usable
/// for outbound events. A read error means the stream is gone.
pub(crate) async fn read_stream<R>(stream: StreamId, mut io: R, events: EventSender)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        buf.reserve(READ_BUFFER_SIZE);
        match io.read_buf(&mut buf).await {
            Ok(0) => {
                let _ = events.send(TransportEvent::PeerSendShutdown { stream });
                return;
            }
            Ok(_) => {
                let chunk = buf.split().freeze();
                if events
                    .send(TransportEvent::DataReceived {
                        stream,
                        chunks: vec![chunk],
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(stream_id = %stream, error = %e, "Stream read failed");
                let _ = events.send(TransportEvent::StreamShutdownComplete { stream });
                return;
            }
        }
    }
}
