//! ProducerAdapter - Publishes metrics samples onto the metrics topic
//!
//! ## Message Flow
//!
//! ```text
//! receive task → send() → MetricsEnvelope → JSON → publish(key = agent_id) → flush(≤ 5s)
//! ```
//!
//! One adapter exists per process and is shared by every session. The
//! underlying client is thread-safe, so no lock is taken here. A failed
//! publish is reported as `false` and never retried, which keeps delivery
//! at-most-once from the broker's side.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};

use crate::config::{ProducerConfig, TopicConfig};
use crate::envelope::MetricsEnvelope;
use crate::log::{LogProducer, LogResult};

pub struct ProducerAdapter {
    /// Shared publishing client
    producer: Arc<dyn LogProducer>,

    /// Topic samples are published to
    topic: String,

    /// Upper bound of the flush after each publish
    flush_timeout: Duration,
}

impl ProducerAdapter {
    pub fn new(
        producer: Arc<dyn LogProducer>,
        topic: impl Into<String>,
        flush_timeout: Duration,
    ) -> Self {
        let topic = topic.into();
        info!("producer adapter ready (topic: {topic}, flush timeout: {flush_timeout:?})");

        Self {
            producer,
            topic,
            flush_timeout,
        }
    }

    pub fn from_config(
        producer: Arc<dyn LogProducer>,
        topics: &TopicConfig,
        config: &ProducerConfig,
    ) -> Self {
        Self::new(producer, topics.metrics.clone(), config.flush_timeout())
    }

    /// Publish one sample and wait for it to be acknowledged
    ///
    /// Returns `false` on any serialization, publish or flush failure; the
    /// sample is then dropped.
    #[instrument(skip(self, metrics, metadata), fields(agent = %agent_id))]
    pub async fn send(
        &self,
        agent_id: &str,
        timestamp: i64,
        metrics: BTreeMap<String, f64>,
        metadata: BTreeMap<String, String>,
    ) -> bool {
        let envelope = match MetricsEnvelope::new(agent_id, timestamp, metrics, metadata) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("rejecting sample: {e}");
                return false;
            }
        };

        match self.publish_envelope(&envelope).await {
            Ok(()) => {
                trace!("sample forwarded");
                true
            }
            Err(e) => {
                warn!("failed to forward sample: {e}");
                false
            }
        }
    }

    /// Publish a prepared envelope, keeping the failure reason
    pub async fn publish_envelope(&self, envelope: &MetricsEnvelope) -> LogResult<()> {
        let payload = envelope.to_json()?;

        self.producer.publish(&self.topic, envelope.key(), &payload)?;

        self.producer.flush(self.flush_timeout).await
    }

    /// Flush whatever is still buffered before the process exits
    pub async fn shutdown(&self) -> LogResult<()> {
        debug!("flushing producer before shutdown");
        self.producer.flush(self.flush_timeout).await?;
        info!("producer adapter closed");
        Ok(())
    }
}
