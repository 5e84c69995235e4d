//! Event publisher
//!
//! High-level API for publishing timestamped events on a topic.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{Publication, Request};

use super::config::ClientConfig;
use super::connector::BrokerConnector;

/// Events from the publisher
#[derive(Debug)]
pub enum PublishEvent {
    /// Connected and ready to publish
    Connected,

    /// A publication was handed to the broker
    Published(Publication),

    /// Error occurred
    Error(String),

    /// Disconnected
    Disconnected,
}

/// Event publisher
///
/// # Example
/// ```no_run
/// use pubsub_rs::client::{ClientConfig, Publisher};
///
/// # async fn example() -> pubsub_rs::error::Result<()> {
/// let config = ClientConfig::new("localhost:5000").insecure();
/// let (mut publisher, mut events) = Publisher::new(config);
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("Event: {:?}", event);
///     }
/// });
///
/// publisher.connect().await?;
/// publisher.publish("liga-final", "Gol de equipo A").await?;
/// publisher.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Publisher {
    config: ClientConfig,
    event_tx: mpsc::Sender<PublishEvent>,
    connector: Option<BrokerConnector>,
    published: u64,
}

impl Publisher {
    /// Create a new publisher.
    ///
    /// Returns the publisher and a receiver for events.
    pub fn new(config: ClientConfig) -> (Self, mpsc::Receiver<PublishEvent>) {
        let (tx, rx) = mpsc::channel(256);

        let publisher = Self {
            config,
            event_tx: tx,
            connector: None,
            published: 0,
        };

        (publisher, rx)
    }

    /// Connect to the broker and open the publishing stream
    pub async fn connect(&mut self) -> Result<()> {
        let connector = match BrokerConnector::connect(self.config.clone()).await {
            Ok(connector) => connector,
            Err(e) => {
                let _ = self.event_tx.try_send(PublishEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        tracing::info!(broker = %connector.peer_addr(), "Publisher connected");
        self.connector = Some(connector);
        let _ = self.event_tx.try_send(PublishEvent::Connected);
        Ok(())
    }

    /// Publish `text` on `topic`, stamped with the local wall-clock time
    pub async fn publish(&mut self, topic: &str, text: &str) -> Result<Publication> {
        let timestamp = chrono::Local::now().format("%H:%M:%S").to_string();
        self.publish_at(topic, &timestamp, text).await
    }

    /// Publish `text` on `topic` with an explicit timestamp
    pub async fn publish_at(
        &mut self,
        topic: &str,
        timestamp: &str,
        text: &str,
    ) -> Result<Publication> {
        let publication = Publication::new(topic, timestamp, text);
        let line = Request::Publish(publication.clone()).encode();

        // Refuse locally what the broker would discard or split
        if line.contains(&b'\n') {
            return Err(ProtocolError::MalformedPublish(publication.text).into());
        }
        Request::parse_bytes(&line)?;

        let connector = self.connector.as_mut().ok_or(Error::StreamClosed)?;
        if let Err(e) = connector.send_line(&line).await {
            let _ = self.event_tx.try_send(PublishEvent::Error(e.to_string()));
            return Err(e);
        }

        self.published += 1;
        tracing::debug!(
            topic = topic,
            timestamp = timestamp,
            text = text,
            "Event published"
        );
        let _ = self
            .event_tx
            .try_send(PublishEvent::Published(publication.clone()));

        Ok(publication)
    }

    /// Publish every non-empty line of `reader` as one event on `topic`
    ///
    /// Returns the number of events published.
    pub async fn publish_lines<R>(&mut self, topic: &str, reader: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut count = 0;

        while let Some(line) = lines.next_line().await? {
            let text = line.trim_end_matches('\r');
            if text.is_empty() {
                continue;
            }
            self.publish(topic, text).await?;
            count += 1;
        }

        Ok(count)
    }

    /// Number of events published so far
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn is_connected(&self) -> bool {
        self.connector.is_some()
    }

    /// Finish the stream, wait for the broker to finish its side, and disconnect
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut connector) = self.connector.take() else {
            return Ok(());
        };

        let close_timeout = self.config.close_timeout;
        let result = match connector.finish().await {
            Ok(()) => connector.wait_finished(close_timeout).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Publisher stream did not close cleanly");
        }

        connector.close().await;
        let _ = self.event_tx.try_send(PublishEvent::Disconnected);
        tracing::info!(published = self.published, "Publisher closed");
        result
    }
}
