//! Subscriber registry implementation
//!
//! A bounded table of subscriber slots shared by every connection. All access goes
//! through one `tokio::sync::Mutex`, so a broadcast always iterates a table nobody can
//! modify mid-scan and two concurrent subscriptions never race on the same slot.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::session::ClientLink;
use crate::transport::{ConnectionId, OutboundStream, StreamId};

use super::config::RegistryConfig;
use super::entry::{RegistryStats, SubscriberEntry, Upsert, Visit};
use super::error::RegistryError;

/// Central table of active subscriptions
pub struct SubscriberRegistry {
    slots: Mutex<Vec<Option<SubscriberEntry>>>,
    config: RegistryConfig,
}

impl SubscriberRegistry {
    /// Create a registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        let slots: Vec<Option<SubscriberEntry>> =
            std::iter::repeat_with(|| None).take(config.capacity).collect();
        Self {
            slots: Mutex::new(slots),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Register `client` as a subscriber of `topic` on `stream`
    ///
    /// A client owns at most one entry: if it already has one, the entry is rebound to
    /// the new topic and stream. Otherwise the first free slot is taken. The client's
    /// subscription flags are set before the lock is released.
    pub async fn upsert(
        &self,
        topic: &str,
        client: &Arc<ClientLink>,
        stream: &OutboundStream,
    ) -> Result<Upsert, RegistryError> {
        self.check_topic(topic)?;

        let mut slots = self.slots.lock().await;

        let existing = slots
            .iter()
            .position(|slot| matches!(slot, Some(entry) if entry.owner() == client.id()));

        let outcome = if let Some(index) = existing {
            if let Some(entry) = slots[index].as_mut() {
                entry.rebind(topic, stream.clone());
            }
            Upsert::Updated { slot: index }
        } else if let Some(index) = slots.iter().position(Option::is_none) {
            slots[index] = Some(SubscriberEntry::new(topic, Arc::clone(client), stream.clone()));
            Upsert::Inserted { slot: index }
        } else {
            return Err(RegistryError::Full {
                capacity: self.config.capacity,
                topic: topic.to_string(),
            });
        };

        client.mark_subscribed(stream.id());

        tracing::debug!(
            topic = topic,
            connection_id = %client.id(),
            stream_id = %stream.id(),
            slot = outcome.slot(),
            "Subscriber registered"
        );

        Ok(outcome)
    }

    /// Clear every entry owned by `client`; returns how many were cleared
    pub async fn remove_by_client(&self, client: ConnectionId) -> usize {
        let mut slots = self.slots.lock().await;
        let mut removed = 0;

        for slot in slots.iter_mut() {
            if matches!(slot, Some(entry) if entry.owner() == client) {
                if let Some(entry) = slot.take() {
                    entry.client.clear_subscription();
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::debug!(connection_id = %client, removed = removed, "Subscriber removed by client");
        }
        removed
    }

    /// Clear every entry bound to `stream`; returns how many were cleared
    ///
    /// The owning clients' subscription flags are cleared too, so a late broadcast
    /// attempt skips them.
    pub async fn remove_by_stream(&self, stream: StreamId) -> usize {
        let mut slots = self.slots.lock().await;
        let mut removed = 0;

        for slot in slots.iter_mut() {
            if matches!(slot, Some(entry) if entry.stream_id() == stream) {
                if let Some(entry) = slot.take() {
                    entry.client.clear_subscription();
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::debug!(stream_id = %stream, removed = removed, "Subscriber removed by stream");
        }
        removed
    }

    /// Visit every entry subscribed to `topic` while holding the lock
    ///
    /// Entries the visitor answers [`Visit::Evict`] for are cleared on the spot, along
    /// with their client's subscription flags. Returns the number of entries visited.
    pub async fn for_each_matching<F>(&self, topic: &str, mut visit: F) -> usize
    where
        F: FnMut(&SubscriberEntry) -> Visit,
    {
        let mut slots = self.slots.lock().await;
        let mut visited = 0;

        for slot in slots.iter_mut() {
            let verdict = match slot {
                Some(entry) if entry.matches(topic) => {
                    visited += 1;
                    visit(entry)
                }
                _ => continue,
            };

            if verdict == Visit::Evict {
                if let Some(entry) = slot.take() {
                    entry.client.clear_subscription();
                }
            }
        }

        visited
    }

    /// Topic the client is currently subscribed to
    pub async fn topic_of(&self, client: ConnectionId) -> Option<String> {
        let slots = self.slots.lock().await;
        slots
            .iter()
            .flatten()
            .find(|entry| entry.owner() == client)
            .map(|entry| entry.topic.clone())
    }

    /// Number of entries subscribed to `topic`
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let slots = self.slots.lock().await;
        slots.iter().flatten().filter(|e| e.matches(topic)).count()
    }

    /// Number of occupied slots
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.iter().flatten().count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> RegistryStats {
        let slots = self.slots.lock().await;
        let topics: HashSet<&str> = slots.iter().flatten().map(|e| e.topic.as_str()).collect();
        RegistryStats {
            occupied: slots.iter().flatten().count(),
            capacity: self.config.capacity,
            topics: topics.len(),
        }
    }

    fn check_topic(&self, topic: &str) -> Result<(), RegistryError> {
        if topic.is_empty() {
            return Err(RegistryError::EmptyTopic);
        }
        if topic.len() > self.config.max_topic_len {
            return Err(RegistryError::TopicTooLong {
                len: topic.len(),
                max: self.config.max_topic_len,
            });
        }
        Ok(())
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::transport::SendRequest;

    fn client(id: u64) -> Arc<ClientLink> {
        Arc::new(ClientLink::new(ConnectionId(id)))
    }

    fn stream() -> (OutboundStream, mpsc::UnboundedReceiver<SendRequest>) {
        OutboundStream::channel(StreamId::next())
    }

    #[tokio::test]
    async fn test_upsert_inserts_and_flags_client() {
        let registry = SubscriberRegistry::new();
        let alice = client(1);
        let (s, _rx) = stream();

        let outcome = assert_ok!(registry.upsert("liga-final", &alice, &s).await);
        assert_eq!(outcome, Upsert::Inserted { slot: 0 });
        assert!(alice.is_subscribed());
        assert_eq!(alice.active_stream(), Some(s.id()));
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.topic_of(alice.id()).await.as_deref(), Some("liga-final"));
    }

    #[tokio::test]
    async fn test_resubscribe_updates_in_place() {
        let registry = SubscriberRegistry::new();
        let alice = client(1);
        let (first, _rx1) = stream();
        let (second, _rx2) = stream();

        registry.upsert("liga", &alice, &first).await.unwrap();
        let outcome = registry.upsert("copa", &alice, &second).await.unwrap();

        assert_eq!(outcome, Upsert::Updated { slot: 0 });
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.topic_of(alice.id()).await.as_deref(), Some("copa"));
        assert_eq!(registry.subscriber_count("liga").await, 0);
        assert_eq!(alice.active_stream(), Some(second.id()));
    }

    #[tokio::test]
    async fn test_full_registry_rejects() {
        let registry = SubscriberRegistry::with_config(RegistryConfig::default().capacity(2));
        let (s1, _rx1) = stream();
        let (s2, _rx2) = stream();
        let (s3, _rx3) = stream();
        let late = client(3);

        registry.upsert("liga", &client(1), &s1).await.unwrap();
        registry.upsert("liga", &client(2), &s2).await.unwrap();

        let err = assert_err!(registry.upsert("liga", &late, &s3).await);
        assert!(matches!(err, RegistryError::Full { capacity: 2, .. }));
        assert!(!late.is_subscribed());
        assert_eq!(registry.subscriber_count("liga").await, 2);

        // An existing owner can still re-subscribe when the table is full
        let alice = client(1);
        assert_ok!(registry.upsert("copa", &alice, &s1).await);
    }

    #[tokio::test]
    async fn test_topic_validation() {
        let registry = SubscriberRegistry::new();
        let (s, _rx) = stream();

        assert_eq!(
            registry.upsert("", &client(1), &s).await,
            Err(RegistryError::EmptyTopic)
        );
        let long = "t".repeat(65);
        assert!(matches!(
            registry.upsert(&long, &client(1), &s).await,
            Err(RegistryError::TopicTooLong { len: 65, max: 64 })
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_by_client() {
        let registry = SubscriberRegistry::new();
        let alice = client(1);
        let bob = client(2);
        let (s1, _rx1) = stream();
        let (s2, _rx2) = stream();

        registry.upsert("liga", &alice, &s1).await.unwrap();
        registry.upsert("liga", &bob, &s2).await.unwrap();

        assert_eq!(registry.remove_by_client(alice.id()).await, 1);
        assert_eq!(registry.remove_by_client(alice.id()).await, 0);
        assert!(!alice.is_subscribed());
        assert!(bob.is_subscribed());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_by_stream_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let alice = client(1);
        let (s, _rx) = stream();

        registry.upsert("liga", &alice, &s).await.unwrap();

        assert_eq!(registry.remove_by_stream(s.id()).await, 1);
        assert!(!alice.is_subscribed());
        assert_eq!(alice.active_stream(), None);

        assert_eq!(registry.remove_by_stream(s.id()).await, 0);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_freed_slot_is_reused() {
        let registry = SubscriberRegistry::with_config(RegistryConfig::default().capacity(1));
        let (s1, _rx1) = stream();
        let (s2, _rx2) = stream();

        registry.upsert("liga", &client(1), &s1).await.unwrap();
        registry.remove_by_stream(s1.id()).await;

        let outcome = registry.upsert("copa", &client(2), &s2).await.unwrap();
        assert_eq!(outcome, Upsert::Inserted { slot: 0 });
    }

    #[tokio::test]
    async fn test_for_each_matching_evicts() {
        let registry = SubscriberRegistry::new();
        let alice = client(1);
        let bob = client(2);
        let carol = client(3);
        let (s1, _rx1) = stream();
        let (s2, _rx2) = stream();
        let (s3, _rx3) = stream();

        registry.upsert("liga", &alice, &s1).await.unwrap();
        registry.upsert("liga", &bob, &s2).await.unwrap();
        registry.upsert("copa", &carol, &s3).await.unwrap();

        let bob_stream = s2.id();
        let visited = registry
            .for_each_matching("liga", |entry| {
                if entry.stream_id() == bob_stream {
                    Visit::Evict
                } else {
                    Visit::Keep
                }
            })
            .await;

        assert_eq!(visited, 2);
        assert!(alice.is_subscribed());
        assert!(!bob.is_subscribed());
        assert!(carol.is_subscribed());
        assert_eq!(registry.subscriber_count("liga").await, 1);

        let stats = registry.stats().await;
        assert_eq!(stats.occupied, 2);
        assert_eq!(stats.topics, 2);
        assert_eq!(stats.capacity, 128);
    }

    #[tokio::test]
    async fn test_concurrent_subscriptions() {
        let registry = Arc::new(SubscriberRegistry::with_config(
            RegistryConfig::default().capacity(32),
        ));

        let mut handles = Vec::new();
        for id in 0..64u64 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let (s, rx) = stream();
                let result = registry.upsert("liga", &client(id), &s).await;
                drop(rx);
                result.is_ok()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 32);
        assert_eq!(registry.len().await, 32);
    }
}
