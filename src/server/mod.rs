//! Broker server
//!
//! [`BrokerServer`] binds a QUIC or TCP listener and runs one connection task per
//! peer against a shared subscriber registry.

pub mod config;
pub mod listener;

pub use config::{ServerConfig, Transport};
pub use listener::BrokerServer;
