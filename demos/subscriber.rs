//! Topic subscriber
//!
//! Run with: cargo run --example subscriber -- <BROKER> <TOPIC>
//!
//! Prints every event received on TOPIC until the broker goes away or Ctrl-C.
//!
//! Examples:
//!   cargo run --example subscriber -- localhost:5000 liga-final
//!   cargo run --example subscriber -- --tcp 127.0.0.1:5000 liga-final

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use pubsub_rs::client::{ClientConfig, Subscriber};

#[derive(Debug, Parser)]
#[command(name = "subscriber", about = "Print events published on a topic")]
struct Args {
    /// Broker address (host:port)
    broker: String,

    /// Topic to subscribe to (at most 64 bytes)
    topic: String,

    /// Connect over plain TCP instead of QUIC
    #[arg(long)]
    tcp: bool,

    /// CA certificate to verify the broker with (QUIC); verification is skipped if omitted
    #[arg(long)]
    ca_cert: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pubsub_rs=info".parse()?)
                .add_directive("subscriber=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::new(args.broker.clone());
    config = match (&args.ca_cert, args.tcp) {
        (_, true) => config.tcp(),
        (Some(ca), false) => config.ca_cert(ca),
        (None, false) => config.insecure(),
    };

    let mut subscriber = Subscriber::subscribe(config, &args.topic)
        .await
        .with_context(|| format!("failed to subscribe to {} on {}", args.topic, args.broker))?;

    println!("Subscribed to {}, waiting for events...", args.topic);

    loop {
        tokio::select! {
            event = subscriber.next_event() => match event? {
                Some(event) => println!("[{}] {}", event.timestamp, event.text),
                None => {
                    println!("Broker closed the stream");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("Received {} events", subscriber.received());
    subscriber.close().await;
    Ok(())
}
