//! Client configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::constants::{ALPN, DEFAULT_PORT};
use crate::transport::ServerVerification;

/// How the client reaches the broker
#[derive(Debug, Clone)]
pub enum ClientTransport {
    /// QUIC, checking the broker's certificate as configured
    Quic { verification: ServerVerification },
    /// Plain TCP
    Tcp,
}

impl Default for ClientTransport {
    fn default() -> Self {
        ClientTransport::Quic {
            verification: ServerVerification::Insecure,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address as `host:port`
    pub broker: String,

    /// TLS server name; defaults to the host part of `broker`
    pub server_name: Option<String>,

    /// Transport and certificate checking
    pub transport: ClientTransport,

    /// ALPN protocol offered on QUIC connections
    pub alpn: Vec<u8>,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// How long to wait for a subscription acknowledgement
    pub ack_timeout: Duration,

    /// How long `close` waits for the broker to finish the stream
    pub close_timeout: Duration,

    /// QUIC idle timeout
    pub idle_timeout: Duration,

    /// QUIC keep-alive interval
    pub keep_alive_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker: format!("localhost:{}", DEFAULT_PORT),
            server_name: None,
            transport: ClientTransport::default(),
            alpn: ALPN.to_vec(),
            connect_timeout: Duration::from_secs(15),
            ack_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            keep_alive_interval: Some(Duration::from_secs(15)),
        }
    }
}

impl ClientConfig {
    /// Create a new config for the given broker address
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            ..Default::default()
        }
    }

    /// Connect over plain TCP
    pub fn tcp(mut self) -> Self {
        self.transport = ClientTransport::Tcp;
        self
    }

    /// Connect over QUIC without checking the broker's certificate
    pub fn insecure(mut self) -> Self {
        self.transport = ClientTransport::Quic {
            verification: ServerVerification::Insecure,
        };
        self
    }

    /// Connect over QUIC trusting the CA certificates in `path`
    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.transport = ClientTransport::Quic {
            verification: ServerVerification::CaFile(path.into()),
        };
        self
    }

    /// Set the TLS server name
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set acknowledgement timeout
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Server name presented during the TLS handshake
    pub fn tls_server_name(&self) -> String {
        if let Some(name) = &self.server_name {
            return name.clone();
        }

        let host = match self.broker.rsplit_once(':') {
            Some((host, _port)) => host,
            None => self.broker.as_str(),
        };
        host.trim_start_matches('[').trim_end_matches(']').to_string()
    }
}
