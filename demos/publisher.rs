//! Event publisher
//!
//! Run with: cargo run --example publisher -- <BROKER> <TOPIC> [EVENTS_FILE]
//!
//! Each non-empty line of EVENTS_FILE (or of stdin when no file is given) is published
//! as one event, stamped with the local time.
//!
//! Examples:
//!   cargo run --example publisher -- localhost:5000 liga-final partido.txt
//!   echo "Gol de equipo A" | cargo run --example publisher -- localhost:5000 liga-final
//!   cargo run --example publisher -- --tcp 127.0.0.1:5000 liga-final partido.txt

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use pubsub_rs::client::{ClientConfig, PublishEvent, Publisher};

#[derive(Debug, Parser)]
#[command(name = "publisher", about = "Publish events from a file to a topic")]
struct Args {
    /// Broker address (host:port)
    broker: String,

    /// Topic to publish on
    topic: String,

    /// File with one event per line; stdin if omitted
    events: Option<PathBuf>,

    /// Connect over plain TCP instead of QUIC
    #[arg(long)]
    tcp: bool,

    /// CA certificate to verify the broker with (QUIC); verification is skipped if omitted
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Delay between events, in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pubsub_rs=info".parse()?)
                .add_directive("publisher=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::new(args.broker.clone());
    config = match (&args.ca_cert, args.tcp) {
        (_, true) => config.tcp(),
        (Some(ca), false) => config.ca_cert(ca),
        (None, false) => config.insecure(),
    };

    let (mut publisher, mut events) = Publisher::new(config);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PublishEvent::Published(p) => {
                    println!("Sent: {}|{}|{}", p.topic, p.timestamp, p.text)
                }
                PublishEvent::Error(e) => eprintln!("Error: {}", e),
                other => tracing::debug!(event = ?other, "Publisher event"),
            }
        }
    });

    publisher
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", args.broker))?;

    let count = if args.interval_ms == 0 {
        match &args.events {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?;
                publisher.publish_lines(&args.topic, BufReader::new(file)).await?
            }
            None => {
                publisher
                    .publish_lines(&args.topic, BufReader::new(tokio::io::stdin()))
                    .await?
            }
        }
    } else {
        let text = match &args.events {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                let mut all = String::new();
                while let Some(line) = lines.next_line().await? {
                    all.push_str(&line);
                    all.push('\n');
                }
                all
            }
        };

        let mut count = 0;
        for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            publisher.publish(&args.topic, line).await?;
            count += 1;
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
        count
    };

    publisher.close().await?;
    println!("Published {} events on {}", count, args.topic);

    Ok(())
}
