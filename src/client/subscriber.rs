//! Topic subscriber
//!
//! Sends one subscription request, waits for the broker's acknowledgement and then
//! yields events until the broker closes the stream.

use crate::error::{Error, Result};
use crate::protocol::{Event, Request, Response};

use super::config::ClientConfig;
use super::connector::BrokerConnector;

/// Subscription to one topic
pub struct Subscriber {
    connector: BrokerConnector,
    topic: String,
    received: u64,
}

impl Subscriber {
    /// Connect, subscribe to `topic` and wait for the acknowledgement
    ///
    /// A broker whose subscriber table is full never acknowledges; that surfaces here
    /// as [`Error::Timeout`].
    pub async fn subscribe(config: ClientConfig, topic: &str) -> Result<Self> {
        let request = Request::Subscribe {
            topic: topic.to_string(),
        };
        Request::parse_bytes(&request.encode())?;

        let ack_timeout = config.ack_timeout;
        let mut connector = BrokerConnector::connect(config).await?;
        connector.send_line(&request.encode()).await?;

        let line = connector
            .read_line_timeout(ack_timeout, "subscription acknowledgement")
            .await?
            .ok_or(Error::StreamClosed)?;

        match Response::parse(&line)? {
            Response::Subscribed { topic: acked } if acked == topic => {}
            _ => return Err(Error::UnexpectedResponse(line)),
        }

        tracing::info!(broker = %connector.peer_addr(), topic = topic, "Subscribed");

        Ok(Self {
            connector,
            topic: topic.to_string(),
            received: 0,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Events received so far
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Wait for the next event; `None` once the broker closed the stream
    ///
    /// Lines that do not parse as events are logged and skipped.
    pub async fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            let Some(line) = self.connector.read_line().await? else {
                return Ok(None);
            };

            match Response::parse(&line) {
                Ok(Response::Event(event)) => {
                    self.received += 1;
                    return Ok(Some(event));
                }
                Ok(Response::Subscribed { topic }) => {
                    tracing::debug!(topic = %topic, "Duplicate acknowledgement");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed event");
                }
            }
        }
    }

    /// Disconnect from the broker
    pub async fn close(self) {
        tracing::info!(topic = %self.topic, received = self.received, "Subscriber closed");
        self.connector.close().await;
    }
}
