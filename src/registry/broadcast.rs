//! Broadcast engine
//!
//! Fans one payload out to every subscriber of a topic. The registry lock is held for
//! the whole pass; sends only queue the payload on each stream's writer, so nothing
//! inside the critical section waits on the network.
//!
//! ```text
//!   publisher stream               SubscriberRegistry (locked)
//!   PUBLISHER|t|ts|text ──► broadcast(t, "ts|text")
//!                                 │
//!                 ┌───────────────┼───────────────┐
//!                 ▼               ▼               ▼
//!            slot[0] t        slot[3] t       slot[9] t
//!            send() ok        send() err      send() ok
//!                             └─► evicted inline
//! ```

use bytes::Bytes;

use crate::transport::SendKind;

use super::entry::Visit;
use super::store::SubscriberRegistry;

/// Outcome of one broadcast, for logging and statistics only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Payloads queued on subscriber streams
    pub delivered: usize,
    /// Subscribers evicted because their stream was gone
    pub evicted: usize,
}

impl SubscriberRegistry {
    /// Send `payload` to every subscriber of `topic`
    ///
    /// A subscriber whose stream rejects the send is evicted during the same pass and
    /// never sees a second attempt. Failures are not reported to the caller beyond
    /// the counts in the returned report.
    pub async fn broadcast(&self, topic: &str, payload: Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        self.for_each_matching(topic, |entry| {
            match entry.stream.send(SendKind::Broadcast, payload.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    Visit::Keep
                }
                Err(e) => {
                    tracing::warn!(
                        topic = topic,
                        connection_id = %entry.owner(),
                        error = %e,
                        "Send to subscriber failed, evicting"
                    );
                    report.evicted += 1;
                    Visit::Evict
                }
            }
        })
        .await;

        tracing::debug!(
            topic = topic,
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast complete"
        );

        report
    }
}
