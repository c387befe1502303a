//! CommandSubscriber - Reads the commands topic for exactly one session
//!
//! Each subscriber gets a fresh identity (`<prefix>-<uuid>`) and starts at the
//! earliest retained offset, so every session sees the whole command history
//! independently of the others (broadcast, not a work queue).

use std::time::Duration;

use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::envelope::CommandEnvelope;
use crate::log::{LogBackend, LogResult, LogSubscription, OffsetReset};

pub struct CommandSubscriber {
    /// Subscription identity, unique per session
    group_id: String,

    topic: String,

    subscription: Box<dyn LogSubscription>,
}

impl CommandSubscriber {
    pub fn subscribe(backend: &dyn LogBackend, topic: &str, group_prefix: &str) -> LogResult<Self> {
        let group_id = format!("{group_prefix}-{}", Uuid::new_v4());
        let subscription = backend.subscribe(topic, &group_id, OffsetReset::Earliest)?;

        debug!("subscribed to {topic} as {group_id}");

        Ok(Self {
            group_id,
            topic: topic.to_string(),
            subscription,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next command, or `None` if the timeout elapses
    ///
    /// Records flagged with a read error, empty records and non-UTF-8 payloads
    /// are skipped and reported as `None`.
    #[instrument(skip(self), fields(group = %self.group_id))]
    pub async fn poll(&mut self, timeout: Duration) -> Option<CommandEnvelope> {
        let record = match self.subscription.poll(timeout).await? {
            Ok(record) => record,
            Err(e) => {
                warn!("skipping command record: {e}");
                return None;
            }
        };

        let Some(payload) = record.payload else {
            debug!(offset = record.offset, "skipping empty command record");
            return None;
        };

        match String::from_utf8(payload) {
            Ok(command) => {
                trace!(offset = record.offset, "polled command {command}");
                Some(CommandEnvelope { command })
            }
            Err(_) => {
                warn!(offset = record.offset, "skipping non UTF-8 command record");
                None
            }
        }
    }

    /// Release the subscription
    pub async fn close(mut self) {
        self.subscription.close().await;
        debug!("released subscription {}", self.group_id);
    }
}
