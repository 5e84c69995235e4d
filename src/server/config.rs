//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::*;
use crate::registry::RegistryConfig;
use crate::session::SessionLimits;
use crate::transport::CertificateSource;

/// Which transport the broker listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// QUIC over TLS 1.3, presenting this certificate
    Quic(CertificateSource),
    /// Plain TCP, one stream per connection
    Tcp,
    /// UDP datagrams, one message each
    Udp,
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Quic(CertificateSource::default())
    }
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Transport and credentials
    pub transport: Transport,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// ALPN protocol negotiated on QUIC connections
    pub alpn: Vec<u8>,

    /// Idle timeout (QUIC connections and UDP peers with no traffic are closed)
    pub idle_timeout: Duration,

    /// Keep-alive interval for QUIC connections
    pub keep_alive_interval: Option<Duration>,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Per-connection message and stream limits
    pub limits: SessionLimits,

    /// Subscriber registry sizing
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            transport: Transport::default(),
            max_connections: 0, // Unlimited
            alpn: ALPN.to_vec(),
            idle_timeout: Duration::from_secs(600),
            keep_alive_interval: Some(Duration::from_secs(15)),
            tcp_nodelay: true,
            limits: SessionLimits::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Listen on QUIC with the given certificate
    pub fn quic(mut self, certificate: CertificateSource) -> Self {
        self.transport = Transport::Quic(certificate);
        self
    }

    /// Listen on plain TCP
    pub fn tcp(mut self) -> Self {
        self.transport = Transport::Tcp;
        self
    }

    /// Listen on UDP
    pub fn udp(mut self) -> Self {
        self.transport = Transport::Udp;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set keep-alive interval (`None` disables keep-alives)
    pub fn keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the number of subscriber slots
    pub fn max_subscribers(mut self, capacity: usize) -> Self {
        self.registry = self.registry.capacity(capacity);
        self
    }

    /// Set the largest inbound message kept
    pub fn max_message_len(mut self, len: usize) -> Self {
        self.limits.max_message_len = len.max(1);
        self
    }

    /// Set the per-connection stream limit
    pub fn max_streams_per_connection(mut self, max: usize) -> Self {
        self.limits.max_streams_per_connection = max;
        self
    }
}
