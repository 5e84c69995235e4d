//! Topic-based publish/subscribe broker
//!
//! Publishers send timestamped events on a topic; the broker fans each event out to
//! every subscriber of that topic. Messages are short `|`-delimited text lines
//! carried over QUIC (TLS 1.3, ALPN `sports-pubsub`), plain TCP or UDP datagrams.
//!
//! ```text
//!  publisher ── PUBLISHER|liga|10:15:00|Gol ──►┌──────────┐── 10:15:00|Gol ──► subscriber
//!                                              │  broker  │
//!  subscriber ── SUBSCRIBER|liga ─────────────►│ registry │── SUBSCRIBED|liga ─► subscriber
//!                                              └──────────┘
//! ```
//!
//! Delivery is best-effort and at most once: nothing is persisted or replayed, and
//! a subscriber whose stream fails is dropped from the registry on the spot.
//!
//! # Running a broker
//!
//! ```no_run
//! use pubsub_rs::{BrokerServer, ServerConfig};
//!
//! # async fn example() -> pubsub_rs::error::Result<()> {
//! let server = BrokerServer::bind(ServerConfig::default()).await?;
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

pub use client::{ClientConfig, Publisher, Subscriber};
pub use error::{Error, Result};
pub use protocol::{Event, Publication, Request, Response};
pub use registry::SubscriberRegistry;
pub use server::{BrokerServer, ServerConfig};
pub use stats::{BrokerStats, StatsSnapshot};
