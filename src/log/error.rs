//! Error types for message log operations

use std::time::Duration;

use thiserror::Error;

use crate::envelope::EnvelopeError;

/// Result type alias for message log operations
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur while talking to the message log
#[derive(Debug, Error)]
pub enum LogError {
    /// Client could not be created or configured
    #[error("failed to create log client: {0}")]
    Client(String),

    /// Record was rejected before it left the process
    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    /// Outstanding records were not acknowledged in time
    #[error("flush did not complete within {0:?}")]
    FlushTimeout(Duration),

    #[error("flush failed: {0}")]
    Flush(String),

    #[error("failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    /// Broker-side error attached to a consumed record
    #[error("log read error: {0}")]
    Read(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[cfg(feature = "kafka")]
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}
