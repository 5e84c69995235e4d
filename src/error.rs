//! Error types
//!
//! `Error` is the crate-wide error. Protocol and registry failures have their own
//! enums so the session layer can log and drop them without tearing anything down.

use thiserror::Error;

use crate::registry::RegistryError;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on a socket or credential file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Subscriber registry rejected an operation
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// TLS / credential setup failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Transport connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Peer closed the stream before the expected message arrived
    #[error("Stream closed")]
    StreamClosed,

    /// Operation did not complete in time
    #[error("Timed out: {0}")]
    Timeout(&'static str),

    /// Broker answered with something other than what was expected
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Wire protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Message starts with no recognized prefix
    #[error("unknown message: {0:?}")]
    UnknownMessage(String),

    /// Publisher message is missing topic, timestamp or text
    #[error("malformed publisher message: {0:?}")]
    MalformedPublish(String),

    /// Event line has no timestamp delimiter
    #[error("malformed event: {0:?}")]
    MalformedEvent(String),

    /// Subscribe request carries no topic
    #[error("subscription without topic")]
    EmptyTopic,

    /// Topic longer than the configured limit
    #[error("topic is {len} bytes, limit is {max}")]
    TopicTooLong { len: usize, max: usize },

    /// Publication timestamp equals the acknowledgement keyword
    #[error("timestamp {0:?} is reserved")]
    ReservedTimestamp(String),

    /// Frame is not valid UTF-8
    #[error("message is not valid UTF-8")]
    InvalidUtf8,
}
