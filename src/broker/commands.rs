//! Operator commands onto the commands topic

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::config::{ProducerConfig, TopicConfig};
use crate::log::{LogProducer, LogResult};
use crate::proto::CommandType;

pub struct CommandPublisher {
    producer: Arc<dyn LogProducer>,
    topic: String,
    flush_timeout: Duration,
}

impl CommandPublisher {
    pub fn new(
        producer: Arc<dyn LogProducer>,
        topic: impl Into<String>,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            flush_timeout,
        }
    }

    pub fn from_config(
        producer: Arc<dyn LogProducer>,
        topics: &TopicConfig,
        config: &ProducerConfig,
    ) -> Self {
        Self::new(producer, topics.commands.clone(), config.flush_timeout())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `command` for `agent_id` and wait for the acknowledgement
    ///
    /// The payload is the bare command name, which is exactly what sessions
    /// relay to their agents.
    #[instrument(skip(self), fields(agent = %agent_id))]
    pub async fn publish(&self, agent_id: &str, command: CommandType) -> LogResult<()> {
        let name = command.as_str_name();

        self.producer.publish(&self.topic, agent_id.as_bytes(), name.as_bytes())?;
        self.producer.flush(self.flush_timeout).await?;

        info!("published {name} on {}", self.topic);
        Ok(())
    }
}
