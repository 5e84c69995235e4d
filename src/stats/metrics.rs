//! Statistics for the broker

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Broker-wide counters, shared by every connection
#[derive(Debug)]
pub struct BrokerStats {
    started_at: Instant,
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    connections_rejected: AtomicU64,
    streams_aborted: AtomicU64,
    bytes_received: AtomicU64,
    messages_truncated: AtomicU64,
    messages_malformed: AtomicU64,
    publications: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
    subscriptions: AtomicU64,
    subscriptions_rejected: AtomicU64,
    send_failures: AtomicU64,
}

impl BrokerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            streams_aborted: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_truncated: AtomicU64::new(0),
            messages_malformed: AtomicU64::new(0),
            publications: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            subscriptions: AtomicU64::new(0),
            subscriptions_rejected: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_aborted(&self) {
        self.streams_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn message_truncated(&self) {
        self.messages_truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_malformed(&self) {
        self.messages_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one publication and the outcome of its fan-out
    pub fn published(&self, delivered: usize, evicted: usize) {
        self.publications.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub fn subscribed(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_rejected(&self) {
        self.subscriptions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evicted(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            streams_aborted: self.streams_aborted.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_truncated: self.messages_truncated.load(Ordering::Relaxed),
            messages_malformed: self.messages_malformed.load(Ordering::Relaxed),
            publications: self.publications.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            subscriptions_rejected: self.subscriptions_rejected.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for BrokerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker-wide statistics at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub streams_aborted: u64,
    pub bytes_received: u64,
    pub messages_truncated: u64,
    pub messages_malformed: u64,
    pub publications: u64,
    pub deliveries: u64,
    pub evictions: u64,
    pub subscriptions: u64,
    pub subscriptions_rejected: u64,
    pub send_failures: u64,
}

impl StatsSnapshot {
    /// Average deliveries per publication
    pub fn fan_out(&self) -> f64 {
        if self.publications == 0 {
            0.0
        } else {
            self.deliveries as f64 / self.publications as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        let snapshot = BrokerStats::new().snapshot();
        assert_eq!(snapshot.connections_total, 0);
        assert_eq!(snapshot.publications, 0);
        assert_eq!(snapshot.fan_out(), 0.0);
    }

    #[test]
    fn test_connection_counters() {
        let stats = BrokerStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.connections_active, 1);
    }

    #[test]
    fn test_active_connections_never_underflow() {
        let stats = BrokerStats::new();
        stats.connection_closed();
        assert_eq!(stats.snapshot().connections_active, 0);
    }

    #[test]
    fn test_publication_counters() {
        let stats = BrokerStats::new();
        stats.published(3, 1);
        stats.published(1, 0);
        stats.evicted(2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.publications, 2);
        assert_eq!(snapshot.deliveries, 4);
        assert_eq!(snapshot.evictions, 3);
        assert_eq!(snapshot.fan_out(), 2.0);
    }
}
