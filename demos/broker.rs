//! Publish/subscribe broker
//!
//! Run with: cargo run --example broker -- [OPTIONS]
//!
//! Examples:
//!   cargo run --example broker                                   # QUIC on 0.0.0.0:5000, self-signed
//!   cargo run --example broker -- --port 5001 --tcp              # plain TCP on port 5001
//!   cargo run --example broker -- --udp                          # UDP datagrams on port 5000
//!   cargo run --example broker -- --cert cert.pem --key key.pem  # QUIC with PEM credentials
//!
//! Stop with Ctrl-C; open connections are closed and a summary is logged.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use pubsub_rs::server::Transport;
use pubsub_rs::transport::CertificateSource;
use pubsub_rs::{BrokerServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "broker", about = "Topic-based publish/subscribe broker")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 5000)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Listen on plain TCP instead of QUIC
    #[arg(long, conflicts_with = "udp")]
    tcp: bool,

    /// Listen on UDP instead of QUIC
    #[arg(long)]
    udp: bool,

    /// PEM certificate chain (QUIC); a self-signed certificate is generated if omitted
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key matching --cert
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Subscriber slots
    #[arg(long, default_value_t = 128)]
    max_subscribers: usize,

    /// Maximum concurrent connections, or tracked UDP peers (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pubsub_rs=info".parse()?)
                .add_directive("broker=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let transport = if args.tcp {
        Transport::Tcp
    } else if args.udp {
        Transport::Udp
    } else {
        match (args.cert, args.key) {
            (Some(cert), Some(key)) => Transport::Quic(CertificateSource::pem_files(cert, key)),
            _ => Transport::Quic(CertificateSource::default()),
        }
    };

    let mut config = ServerConfig::with_addr(SocketAddr::new(args.bind, args.port))
        .max_subscribers(args.max_subscribers)
        .max_connections(args.max_connections);
    config.transport = transport;

    let server = BrokerServer::bind(config)
        .await
        .context("failed to start broker")?;

    println!("Broker listening on {}", server.local_addr());
    println!("Press Ctrl-C to stop");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = server.stats().snapshot();
    println!(
        "Stats: connections={} publications={} deliveries={} evictions={} rejected_subscriptions={}",
        stats.connections_total,
        stats.publications,
        stats.deliveries,
        stats.evictions,
        stats.subscriptions_rejected,
    );

    Ok(())
}
