//! Message log abstraction
//!
//! The broker talks to an external append-only log through three small traits
//! so the same session code runs against Kafka in production and an in-process
//! log in tests.
//!
//! ## Design
//!
//! - **`LogProducer`**: thread-safe publish + bounded flush, one shared client per process
//! - **`LogSubscription`**: one reader with its own identity and read position
//! - **`LogBackend`**: hands out the shared producer and creates subscriptions
//!
//! ## Backends
//!
//! - **Kafka** (default, feature `kafka`): `rdkafka` threaded producer and stream consumers
//! - **Memory**: single-partition topics held in process memory

pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::LogConfig;

pub use error::{LogError, LogResult};
pub use memory::MemoryLog;

/// Where a new subscription identity starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    /// Oldest retained record
    Earliest,

    /// Only records appended after subscribing
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// A record read from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

/// Write side of the log
///
/// Implementations must be `Send + Sync`: a single instance is shared by
/// every session's receive task without external locking.
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Enqueue a record for delivery
    ///
    /// Delivery reports arrive asynchronously and are only logged.
    fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> LogResult<()>;

    /// Wait until every enqueued record is acknowledged or the timeout elapses
    async fn flush(&self, timeout: Duration) -> LogResult<()>;
}

/// Read side of the log for a single subscription identity
#[async_trait]
pub trait LogSubscription: Send {
    /// Next record, or `None` once the timeout elapses
    ///
    /// `Some(Err(_))` carries a broker-side error attached to a read.
    /// Must be cancel-safe: dropping the future never skips a record.
    async fn poll(&mut self, timeout: Duration) -> Option<LogResult<LogRecord>>;

    /// Release the subscription, calling it again is a no-op
    async fn close(&mut self);
}

pub trait LogBackend: Send + Sync {
    /// The process-wide producer client, created on first use
    fn producer(&self) -> LogResult<Arc<dyn LogProducer>>;

    fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        reset: OffsetReset,
    ) -> LogResult<Box<dyn LogSubscription>>;
}

/// Create the backend selected by the configuration
pub fn connect(config: &LogConfig) -> LogResult<Arc<dyn LogBackend>> {
    match config {
        #[cfg(feature = "kafka")]
        LogConfig::Kafka {
            bootstrap_servers,
            client_id,
            security_protocol,
        } => Ok(Arc::new(kafka::KafkaBackend::new(
            bootstrap_servers,
            client_id,
            security_protocol,
        ))),

        #[cfg(not(feature = "kafka"))]
        LogConfig::Kafka { .. } => Err(LogError::Client(
            "kafka support was not compiled in (enable the `kafka` feature)".to_string(),
        )),

        LogConfig::Memory => Ok(Arc::new(MemoryLog::new())),
    }
}
