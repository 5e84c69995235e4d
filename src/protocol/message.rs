//! Text message codec
//!
//! ```text
//! publisher  -> broker   PUBLISHER|<topic>|<HH:MM:SS>|<free text>
//! subscriber -> broker   SUBSCRIBER|<topic>
//! broker -> subscriber   SUBSCRIBED|<topic>
//! broker -> subscriber   <HH:MM:SS>|<free text>
//! ```
//!
//! The free text of a publication is captured verbatim, including any delimiters it
//! contains. Nothing is escaped when encoding.

use bytes::Bytes;

use crate::error::ProtocolError;

use super::constants::{
    DELIMITER, MAX_TOPIC_LEN, PUBLISHER_PREFIX, SUBSCRIBED_PREFIX, SUBSCRIBER_PREFIX,
};

/// A timestamped event on a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub timestamp: String,
    pub text: String,
}

impl Publication {
    pub fn new(
        topic: impl Into<String>,
        timestamp: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            timestamp: timestamp.into(),
            text: text.into(),
        }
    }

    /// The event as it is fanned out to subscribers (topic omitted)
    pub fn to_event(&self) -> Event {
        Event {
            timestamp: self.timestamp.clone(),
            text: self.text.clone(),
        }
    }
}

/// An event as delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: String,
    pub text: String,
}

/// Messages a client sends to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Publish an event to a topic
    Publish(Publication),
    /// Register the sending stream as a subscriber of a topic
    Subscribe { topic: String },
}

impl Request {
    /// Parse one assembled message
    pub fn parse(message: &str) -> Result<Self, ProtocolError> {
        if let Some(fields) = message.strip_prefix(PUBLISHER_PREFIX) {
            let mut parts = fields.splitn(3, DELIMITER);
            let topic = non_empty(parts.next());
            let timestamp = non_empty(parts.next());
            let text = non_empty(parts.next());

            match (topic, timestamp, text) {
                (Some(topic), Some(timestamp), Some(text)) => {
                    check_topic(topic)?;
                    // An event line starting with the acknowledgement prefix would
                    // read as an acknowledgement on the subscriber side
                    if SUBSCRIBED_PREFIX.strip_suffix(DELIMITER) == Some(timestamp) {
                        return Err(ProtocolError::ReservedTimestamp(timestamp.to_string()));
                    }
                    Ok(Request::Publish(Publication::new(topic, timestamp, text)))
                }
                _ => Err(ProtocolError::MalformedPublish(message.to_string())),
            }
        } else if let Some(topic) = message.strip_prefix(SUBSCRIBER_PREFIX) {
            if topic.is_empty() {
                return Err(ProtocolError::EmptyTopic);
            }
            check_topic(topic)?;
            Ok(Request::Subscribe {
                topic: topic.to_string(),
            })
        } else {
            Err(ProtocolError::UnknownMessage(message.to_string()))
        }
    }

    /// Parse a raw frame, rejecting invalid UTF-8
    pub fn parse_bytes(frame: &[u8]) -> Result<Self, ProtocolError> {
        let message = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidUtf8)?;
        Self::parse(message)
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Request::Publish(p) => Bytes::from(format!(
                "{PUBLISHER_PREFIX}{}{DELIMITER}{}{DELIMITER}{}",
                p.topic, p.timestamp, p.text
            )),
            Request::Subscribe { topic } => Bytes::from(format!("{SUBSCRIBER_PREFIX}{topic}")),
        }
    }
}

/// Messages the broker sends to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Subscription accepted
    Subscribed { topic: String },
    /// Fanned-out event
    Event(Event),
}

impl Response {
    /// Parse a line received from the broker
    pub fn parse(message: &str) -> Result<Self, ProtocolError> {
        if let Some(topic) = message.strip_prefix(SUBSCRIBED_PREFIX) {
            return Ok(Response::Subscribed {
                topic: topic.to_string(),
            });
        }

        match message.split_once(DELIMITER) {
            Some((timestamp, text)) => Ok(Response::Event(Event {
                timestamp: timestamp.to_string(),
                text: text.to_string(),
            })),
            None => Err(ProtocolError::MalformedEvent(message.to_string())),
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Response::Subscribed { topic } => Bytes::from(format!("{SUBSCRIBED_PREFIX}{topic}")),
            Response::Event(event) => {
                Bytes::from(format!("{}{DELIMITER}{}", event.timestamp, event.text))
            }
        }
    }
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.filter(|f| !f.is_empty())
}

fn check_topic(topic: &str) -> Result<(), ProtocolError> {
    if topic.len() > MAX_TOPIC_LEN {
        return Err(ProtocolError::TopicTooLong {
            len: topic.len(),
            max: MAX_TOPIC_LEN,
        });
    }
    Ok(())
}
