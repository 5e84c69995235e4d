//! Wire protocol constants

/// Field delimiter used by every message kind
pub const DELIMITER: char = '|';

/// Message terminator on the wire
pub const TERMINATOR: u8 = b'\n';

/// Prefix of a publisher request (includes the delimiter)
pub const PUBLISHER_PREFIX: &str = "PUBLISHER|";

/// Prefix of a subscriber request (includes the delimiter)
pub const SUBSCRIBER_PREFIX: &str = "SUBSCRIBER|";

/// Prefix of the broker's subscription acknowledgement (includes the delimiter)
pub const SUBSCRIBED_PREFIX: &str = "SUBSCRIBED|";

/// Maximum length of a single inbound message in bytes
pub const MAX_MESSAGE_LEN: usize = 512;

/// Maximum topic length in bytes
pub const MAX_TOPIC_LEN: usize = 64;

/// Default number of subscriber slots
pub const MAX_SUBSCRIBERS: usize = 128;

/// Default number of concurrently open streams per connection
pub const MAX_STREAMS_PER_CONNECTION: usize = 16;

/// ALPN protocol identifier for the QUIC transport
pub const ALPN: &[u8] = b"sports-pubsub";

/// Default broker port
pub const DEFAULT_PORT: u16 = 5000;

/// Application error code used when the broker aborts a stream it cannot serve
pub const STREAM_ABORT_CODE: u32 = 1;

/// Application error code used when the broker closes connections on shutdown
pub const SHUTDOWN_CODE: u32 = 0;
