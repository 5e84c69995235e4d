//! Broker connection
//!
//! Opens one connection and one bidirectional stream to the broker, then exchanges
//! newline-terminated lines over it. QUIC and TCP look the same from here on.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use quinn::{Connection, Endpoint, VarInt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::protocol::constants::{SHUTDOWN_CODE, TERMINATOR};
use crate::transport::tls;

use super::config::{ClientConfig, ClientTransport};

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// One stream to the broker
pub struct BrokerConnector {
    config: ClientConfig,
    peer_addr: SocketAddr,
    reader: Reader,
    writer: Writer,
    quic: Option<(Endpoint, Connection)>,
    line: String,
}

impl BrokerConnector {
    /// Connect to the broker and open the stream
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let peer_addr = resolve(&config.broker).await?;

        let (reader, writer, quic) = match &config.transport {
            ClientTransport::Tcp => {
                let socket = tokio::time::timeout(config.connect_timeout, TcpStream::connect(peer_addr))
                    .await
                    .map_err(|_| Error::Timeout("connect"))??;
                socket.set_nodelay(true)?;

                let (read_half, write_half) = socket.into_split();
                let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
                let writer: Writer = Box::new(write_half);
                (BufReader::new(reader), writer, None)
            }
            ClientTransport::Quic { verification } => {
                let transport =
                    tls::transport_config(config.idle_timeout, config.keep_alive_interval)?;
                let client_config = tls::client_config(verification, &config.alpn, transport)?;

                let local: SocketAddr = if peer_addr.is_ipv6() {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                };
                let mut endpoint = Endpoint::client(local)?;
                endpoint.set_default_client_config(client_config);

                let server_name = config.tls_server_name();
                let connecting = endpoint
                    .connect(peer_addr, &server_name)
                    .map_err(|e| Error::Connection(e.to_string()))?;

                let connection = tokio::time::timeout(config.connect_timeout, connecting)
                    .await
                    .map_err(|_| Error::Timeout("connect"))?
                    .map_err(|e| Error::Connection(e.to_string()))?;

                let (send, recv) = connection
                    .open_bi()
                    .await
                    .map_err(|e| Error::Connection(e.to_string()))?;

                let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(recv);
                let writer: Writer = Box::new(send);
                (BufReader::new(reader), writer, Some((endpoint, connection)))
            }
        };

        tracing::debug!(broker = %peer_addr, "Connected to broker");

        Ok(Self {
            config,
            peer_addr,
            reader,
            writer,
            quic,
            line: String::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Write one line (the terminator is appended)
    pub async fn send_line(&mut self, line: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(TERMINATOR);

        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the next line, without terminator; `None` once the broker finished the stream
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line).await?;
        if n == 0 {
            return Ok(None);
        }

        let line = self.line.trim_end_matches('\n').trim_end_matches('\r');
        Ok(Some(line.to_string()))
    }

    /// Read the next line, failing if it does not arrive within `timeout`
    pub async fn read_line_timeout(
        &mut self,
        timeout: Duration,
        what: &'static str,
    ) -> Result<Option<String>> {
        tokio::time::timeout(timeout, self.read_line())
            .await
            .map_err(|_| Error::Timeout(what))?
    }

    /// Finish our sending half
    pub async fn finish(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Wait for the broker to finish its half, discarding anything it still sends
    pub async fn wait_finished(&mut self, timeout: Duration) -> Result<()> {
        let drain = async {
            while self.read_line().await?.is_some() {}
            Ok::<(), Error>(())
        };

        tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| Error::Timeout("stream close"))?
    }

    /// Close the connection
    pub async fn close(self) {
        if let Some((endpoint, connection)) = self.quic {
            connection.close(VarInt::from_u32(SHUTDOWN_CODE), b"done");
            let _ = tokio::time::timeout(self.config.close_timeout, endpoint.wait_idle()).await;
        }
        tracing::debug!(broker = %self.peer_addr, "Disconnected from broker");
    }
}

async fn resolve(broker: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(broker)
        .await?
        .next()
        .ok_or_else(|| Error::Connection(format!("could not resolve {}", broker)))
}
