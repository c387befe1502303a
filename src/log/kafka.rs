//! Kafka backend built on `rdkafka`
//!
//! - One [`ThreadedProducer`] per process; its context logs delivery reports
//! - One [`StreamConsumer`] per subscription, each with its own `group.id`
//!
//! `flush` blocks inside librdkafka, so it is moved onto the blocking pool.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{
    BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer,
};
use rdkafka::{ClientConfig, ClientContext};
use tracing::{debug, info, instrument, trace, warn};

use super::{LogBackend, LogError, LogProducer, LogRecord, LogResult, LogSubscription, OffsetReset};

/// Producer context that reports every delivery outcome to the log
pub struct DeliveryLogger;

impl ClientContext for DeliveryLogger {}

impl ProducerContext for DeliveryLogger {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        match result {
            Ok(message) => debug!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "delivered record"
            ),
            Err((e, message)) => warn!(
                topic = message.topic(),
                partition = message.partition(),
                "delivery failed: {e}"
            ),
        }
    }
}

pub struct KafkaProducer {
    producer: Arc<ThreadedProducer<DeliveryLogger>>,
}

impl KafkaProducer {
    fn new(config: &ClientConfig) -> LogResult<Self> {
        let producer: ThreadedProducer<DeliveryLogger> = config
            .create_with_context(DeliveryLogger)
            .map_err(|e| LogError::Client(e.to_string()))?;

        Ok(Self {
            producer: Arc::new(producer),
        })
    }
}

#[async_trait]
impl LogProducer for KafkaProducer {
    fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> LogResult<()> {
        let record = BaseRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record)
            .map_err(|(e, _record)| LogError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn flush(&self, timeout: Duration) -> LogResult<()> {
        let producer = Arc::clone(&self.producer);

        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| LogError::Flush(e.to_string()))?
            .map_err(|e| LogError::Flush(e.to_string()))
    }
}

/// Connection settings plus the lazily created shared producer
pub struct KafkaBackend {
    bootstrap_servers: String,
    client_id: String,
    security_protocol: String,
    producer: Mutex<Option<Arc<KafkaProducer>>>,
}

impl KafkaBackend {
    pub fn new(bootstrap_servers: &str, client_id: &str, security_protocol: &str) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.to_string(),
            client_id: client_id.to_string(),
            security_protocol: security_protocol.to_string(),
            producer: Mutex::new(None),
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id)
            .set("security.protocol", &self.security_protocol);
        config
    }
}

impl LogBackend for KafkaBackend {
    fn producer(&self) -> LogResult<Arc<dyn LogProducer>> {
        let mut slot = self.producer.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(producer) = slot.as_ref() {
            return Ok(Arc::clone(producer) as Arc<dyn LogProducer>);
        }

        let producer = Arc::new(KafkaProducer::new(&self.client_config())?);
        info!(
            bootstrap_servers = %self.bootstrap_servers,
            "kafka producer initialized"
        );
        *slot = Some(Arc::clone(&producer));

        Ok(producer)
    }

    #[instrument(skip(self))]
    fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        reset: OffsetReset,
    ) -> LogResult<Box<dyn LogSubscription>> {
        let subscribe_error = |e: rdkafka::error::KafkaError| LogError::Subscribe {
            topic: topic.to_string(),
            reason: e.to_string(),
        };

        let consumer: StreamConsumer = self
            .client_config()
            .set("group.id", group_id)
            .set("auto.offset.reset", reset.as_str())
            .set("enable.partition.eof", "false")
            .create()
            .map_err(subscribe_error)?;

        consumer.subscribe(&[topic]).map_err(subscribe_error)?;
        trace!("kafka consumer subscribed");

        Ok(Box::new(KafkaSubscription {
            consumer: Some(consumer),
        }))
    }
}

struct KafkaSubscription {
    /// `None` once released
    consumer: Option<StreamConsumer>,
}

#[async_trait]
impl LogSubscription for KafkaSubscription {
    async fn poll(&mut self, timeout: Duration) -> Option<LogResult<LogRecord>> {
        let consumer = self.consumer.as_ref()?;

        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_elapsed) => None,
            Ok(Err(e)) => Some(Err(LogError::Kafka(e))),
            Ok(Ok(message)) => Some(Ok(LogRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                payload: message.payload().map(<[u8]>::to_vec),
            })),
        }
    }

    async fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            debug!("kafka consumer released");
        }
    }
}
