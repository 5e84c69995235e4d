//! Transport adapters
//!
//! Adapters own the sockets. They turn what the network does into
//! [`TransportEvent`](crate::session::TransportEvent)s for the connection state
//! machine, and carry out the machine's [`Directive`](crate::session::Directive)s.
//!
//! - [`quic`]: QUIC over TLS 1.3, any number of bidirectional streams per connection
//! - [`tcp`]: plain TCP, one implicit stream per connection
//! - [`udp`]: one datagram per message, peers identified by address

pub mod io;
pub mod outbound;
pub mod quic;
pub mod tcp;
pub mod tls;
pub mod udp;

pub use outbound::{ConnectionId, OutboundStream, SendError, SendKind, SendRequest, StreamId};
pub use tls::{CertificateSource, ServerIdentity, ServerVerification};
pub use udp::UdpOptions;
