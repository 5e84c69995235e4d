//! Registry configuration

use crate::protocol::constants::{MAX_SUBSCRIBERS, MAX_TOPIC_LEN};

/// Subscriber registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Number of subscriber slots
    pub capacity: usize,

    /// Longest topic accepted, in bytes
    pub max_topic_len: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_SUBSCRIBERS,
            max_topic_len: MAX_TOPIC_LEN,
        }
    }
}

impl RegistryConfig {
    /// Set the number of subscriber slots
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the topic length limit (never above the wire limit)
    pub fn max_topic_len(mut self, len: usize) -> Self {
        self.max_topic_len = len.min(MAX_TOPIC_LEN);
        self
    }
}
