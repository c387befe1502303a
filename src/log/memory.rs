//! In-memory message log (no persistence)
//!
//! Every topic is a single partition held in a `Vec`, and read positions are
//! tracked per `(topic, group)` pair the same way a Kafka consumer group would.
//! It's useful for:
//! - Testing sessions end to end without a cluster
//! - Local development (`"log": { "backend": "memory" }`)
//!
//! ## Fault injection
//!
//! Publishes and flushes can be made to fail, and error-flagged entries can be
//! appended to a topic, so failure paths are testable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{LogBackend, LogError, LogProducer, LogRecord, LogResult, LogSubscription, OffsetReset};

const PARTITION: i32 = 0;

#[derive(Debug, Clone)]
enum Entry {
    Record {
        key: Option<Vec<u8>>,
        payload: Option<Vec<u8>>,
    },
    Error(String),
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Vec<Entry>>,

    /// Next offset to read per (topic, group)
    positions: HashMap<(String, String), usize>,

    failing_publishes: usize,

    failing_flushes: bool,

    open_subscriptions: usize,

    released_subscriptions: usize,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,

    /// Woken whenever a topic grows
    appended: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, topic: &str, entry: Entry) -> i64 {
        let offset = {
            let mut state = self.lock();
            let entries = state.topics.entry(topic.to_string()).or_default();
            entries.push(entry);
            (entries.len() - 1) as i64
        };
        self.appended.notify_waiters();
        offset
    }
}

/// In-process log shared by clones
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record directly, bypassing fault injection
    pub fn append(&self, topic: &str, key: Option<&[u8]>, payload: &[u8]) -> i64 {
        self.inner.append(
            topic,
            Entry::Record {
                key: key.map(<[u8]>::to_vec),
                payload: Some(payload.to_vec()),
            },
        )
    }

    /// Append an entry that surfaces as a read error to its consumers
    pub fn append_error(&self, topic: &str, reason: impl Into<String>) -> i64 {
        self.inner.append(topic, Entry::Error(reason.into()))
    }

    /// Reject the next `count` publishes
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner.lock().failing_publishes = count;
    }

    /// Make every flush fail until reset
    pub fn fail_flushes(&self, failing: bool) {
        self.inner.lock().failing_flushes = failing;
    }

    /// All readable records of a topic in offset order (error entries excluded)
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        let state = self.inner.lock();
        state
            .topics
            .get(topic)
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .filter_map(|(offset, entry)| match entry {
                        Entry::Record { key, payload } => Some(LogRecord {
                            topic: topic.to_string(),
                            partition: PARTITION,
                            offset: offset as i64,
                            key: key.clone(),
                            payload: payload.clone(),
                        }),
                        Entry::Error(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn open_subscriptions(&self) -> usize {
        self.inner.lock().open_subscriptions
    }

    pub fn released_subscriptions(&self) -> usize {
        self.inner.lock().released_subscriptions
    }
}

#[async_trait]
impl LogProducer for MemoryLog {
    fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> LogResult<()> {
        {
            let mut state = self.inner.lock();
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(LogError::Publish {
                    topic: topic.to_string(),
                    reason: "injected publish failure".to_string(),
                });
            }
        }

        let offset = self.append(topic, Some(key), payload);
        debug!(topic, partition = PARTITION, offset, "delivered record");
        Ok(())
    }

    async fn flush(&self, timeout: Duration) -> LogResult<()> {
        if self.inner.lock().failing_flushes {
            return Err(LogError::FlushTimeout(timeout));
        }
        Ok(())
    }
}

impl LogBackend for MemoryLog {
    fn producer(&self) -> LogResult<Arc<dyn LogProducer>> {
        Ok(Arc::new(self.clone()))
    }

    fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        reset: OffsetReset,
    ) -> LogResult<Box<dyn LogSubscription>> {
        let position_key = (topic.to_string(), group_id.to_string());

        {
            let mut state = self.inner.lock();
            let end = state.topics.get(topic).map_or(0, Vec::len);
            state
                .positions
                .entry(position_key.clone())
                .or_insert(match reset {
                    OffsetReset::Earliest => 0,
                    OffsetReset::Latest => end,
                });
            state.open_subscriptions += 1;
        }

        trace!(topic, group_id, reset = reset.as_str(), "subscribed");

        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            position_key,
            released: false,
        }))
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    position_key: (String, String),
    released: bool,
}

impl MemorySubscription {
    fn try_next(&self) -> Option<LogResult<LogRecord>> {
        let mut state = self.inner.lock();
        let state = &mut *state;

        let (topic, _) = &self.position_key;
        let entries = state.topics.get(topic)?;
        let position = state.positions.get_mut(&self.position_key)?;

        let entry = entries.get(*position)?.clone();
        let offset = *position as i64;
        *position += 1;

        Some(match entry {
            Entry::Record { key, payload } => Ok(LogRecord {
                topic: topic.clone(),
                partition: PARTITION,
                offset,
                key,
                payload,
            }),
            Entry::Error(reason) => Err(LogError::Read(reason)),
        })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.inner.lock();
        state.positions.remove(&self.position_key);
        state.open_subscriptions = state.open_subscriptions.saturating_sub(1);
        state.released_subscriptions += 1;
    }
}

#[async_trait]
impl LogSubscription for MemorySubscription {
    async fn poll(&mut self, timeout: Duration) -> Option<LogResult<LogRecord>> {
        let deadline = Instant::now() + timeout;
        let inner = Arc::clone(&self.inner);

        loop {
            // register before checking so an append in between is not missed
            let appended = inner.appended.notified();

            if let Some(next) = self.try_next() {
                return Some(next);
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return None;
            }
        }
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}
