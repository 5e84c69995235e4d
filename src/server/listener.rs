//! Broker listener
//!
//! Binds the configured transport, accepts connections and spawns one connection
//! task per peer (UDP peers share a single task). Every task shares the same subscriber registry and statistics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{Endpoint, VarInt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{watch, Semaphore};

use crate::error::{Error, Result};
use crate::protocol::constants::SHUTDOWN_CODE;
use crate::registry::SubscriberRegistry;
use crate::server::config::{ServerConfig, Transport};
use crate::session::SessionContext;
use crate::stats::{BrokerStats, StatsSnapshot};
use crate::transport::{quic, tcp, tls, udp, UdpOptions};

/// How long QUIC connections get to drain after the endpoint is closed
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

enum Listener {
    Quic(Endpoint),
    Tcp(TcpListener),
    Udp(Arc<UdpSocket>),
}

/// Publish/subscribe broker
pub struct BrokerServer {
    config: ServerConfig,
    ctx: SessionContext,
    listener: Listener,
    local_addr: SocketAddr,
    connection_semaphore: Option<Arc<Semaphore>>,
    shutdown: watch::Sender<bool>,
}

impl BrokerServer {
    /// Bind the configured transport
    ///
    /// Credentials are loaded (or generated) here, so a bad certificate path fails
    /// before the broker accepts anything.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = match &config.transport {
            Transport::Quic(certificate) => {
                let identity = certificate.load()?;
                let transport =
                    tls::transport_config(config.idle_timeout, config.keep_alive_interval)?;
                let server_config = tls::server_config(identity, &config.alpn, transport)?;
                Listener::Quic(quic::bind(config.bind_addr, server_config)?)
            }
            Transport::Tcp => Listener::Tcp(TcpListener::bind(config.bind_addr).await?),
            Transport::Udp => Listener::Udp(Arc::new(UdpSocket::bind(config.bind_addr).await?)),
        };

        let local_addr = match &listener {
            Listener::Quic(endpoint) => endpoint.local_addr()?,
            Listener::Tcp(listener) => listener.local_addr()?,
            Listener::Udp(socket) => socket.local_addr()?,
        };

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let ctx = SessionContext::new(
            Arc::new(SubscriberRegistry::with_config(config.registry.clone())),
            Arc::new(BrokerStats::new()),
            config.limits,
        );

        let (shutdown, _) = watch::channel(false);

        tracing::info!(
            addr = %local_addr,
            transport = transport_name(&config.transport),
            max_subscribers = config.registry.capacity,
            "Broker listening"
        );

        Ok(Self {
            config,
            ctx,
            listener,
            local_addr,
            connection_semaphore,
            shutdown,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a reference to the subscriber registry
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.ctx.registry
    }

    pub fn stats(&self) -> &Arc<BrokerStats> {
        &self.ctx.stats
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails or is closed.
    pub async fn run(&self) -> Result<()> {
        self.accept_loop().await
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` resolves, the listener stops accepting, every open connection
    /// is closed and its subscriptions are released.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop() => result,
        };

        self.close().await;
        result
    }

    async fn accept_loop(&self) -> Result<()> {
        let limiter = self.connection_semaphore.as_ref();

        match &self.listener {
            Listener::Quic(endpoint) => quic::accept_loop(endpoint, &self.ctx, limiter).await,
            Listener::Tcp(listener) => {
                let shutdown = self.shutdown.subscribe();
                tcp::accept_loop(
                    listener,
                    &self.ctx,
                    limiter,
                    self.config.tcp_nodelay,
                    &shutdown,
                )
                .await
            }
            Listener::Udp(socket) => {
                let options = UdpOptions {
                    max_peers: self.config.max_connections,
                    idle_timeout: self.config.idle_timeout,
                };
                // Peers live in the spawned task so they are still closed after
                // this future is dropped by `run_until`
                tokio::spawn(udp::serve(
                    Arc::clone(socket),
                    self.ctx.clone(),
                    options,
                    self.shutdown.subscribe(),
                ))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))
            }
        }
    }

    async fn close(&self) {
        let _ = self.shutdown.send(true);

        if let Listener::Quic(endpoint) = &self.listener {
            endpoint.close(VarInt::from_u32(SHUTDOWN_CODE), b"broker shutting down");
            if tokio::time::timeout(DRAIN_TIMEOUT, endpoint.wait_idle())
                .await
                .is_err()
            {
                tracing::warn!("Connections still draining at shutdown");
            }
        }

        let stats: StatsSnapshot = self.ctx.stats.snapshot();
        tracing::info!(
            connections = stats.connections_total,
            publications = stats.publications,
            deliveries = stats.deliveries,
            evictions = stats.evictions,
            uptime = ?stats.uptime,
            "Broker stopped"
        );
    }
}

fn transport_name(transport: &Transport) -> &'static str {
    match transport {
        Transport::Quic(_) => "quic",
        Transport::Tcp => "tcp",
        Transport::Udp => "udp",
    }
}
