//! Subscriber registry and broadcast engine
//!
//! The registry maps active subscriber streams to topics and fans publications out to
//! them. It is the only state shared between connections.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<SubscriberRegistry>
//!                   ┌──────────────────────────────┐
//!                   │ slots: Mutex<Vec<Option<     │
//!                   │   SubscriberEntry {          │
//!                   │     topic,                   │
//!                   │     client: Arc<ClientLink>, │
//!                   │     stream: OutboundStream,  │
//!                   │   }                          │
//!                   │ >>>                          │
//!                   └──────────────┬───────────────┘
//!                                  │
//!        ┌─────────────────────────┼─────────────────────────┐
//!        │                         │                         │
//!        ▼                         ▼                         ▼
//!   [Publisher]              [Subscriber]              [Subscriber]
//!   PUBLISHER|t|..           SUBSCRIBER|t              SUBSCRIBER|t
//!        │                   upsert()                  upsert()
//!        └──► registry.broadcast() ──► stream.send() ──► writer task
//! ```
//!
//! Payloads are `bytes::Bytes`, so every subscriber of a topic shares one allocation.

pub mod broadcast;
pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use broadcast::BroadcastReport;
pub use config::RegistryConfig;
pub use entry::{RegistryStats, SubscriberEntry, Upsert, Visit};
pub use error::RegistryError;
pub use store::SubscriberRegistry;
