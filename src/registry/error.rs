//! Registry error types

use thiserror::Error;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Every slot is occupied
    #[error("subscriber table full ({capacity} slots), cannot register {topic}")]
    Full { capacity: usize, topic: String },

    /// Topic is empty
    #[error("empty topic")]
    EmptyTopic,

    /// Topic exceeds the configured limit
    #[error("topic is {len} bytes, limit is {max}")]
    TopicTooLong { len: usize, max: usize },
}
