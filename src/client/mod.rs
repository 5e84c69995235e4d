//! Broker clients
//!
//! Provides the two client roles:
//! - [`Publisher`]: sends timestamped events on a topic
//! - [`Subscriber`]: subscribes to one topic and receives its events

pub mod config;
pub mod connector;
pub mod publisher;
pub mod subscriber;

pub use config::{ClientConfig, ClientTransport};
pub use connector::BrokerConnector;
pub use publisher::{PublishEvent, Publisher};
pub use subscriber::Subscriber;
