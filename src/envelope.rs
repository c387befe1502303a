//! Records exchanged across the broker's boundaries
//!
//! - [`MetricsEnvelope`]: one agent sample on its way to the metrics topic
//! - [`CommandEnvelope`]: one opaque command on its way back to an agent
//!
//! Inbound gRPC records are first flattened into an [`InboundRecord`] so the
//! producer path only deals with plain maps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::proto::{CommandResponse, MetricsRequest, SystemMetrics};

/// Metadata key the agent's host name is stored under
pub const HOSTNAME_KEY: &str = "hostname";

#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("timestamp {0} is outside the representable range")]
    InvalidTimestamp(i64),
}

/// Metrics sample as published to the metrics topic
///
/// Serialized as
/// `{"agent_id": .., "timestamp": "<ISO-8601>", "metrics": {..}, "metadata": {..}}`
/// and keyed by `agent_id` so all samples of one agent land on one partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsEnvelope {
    agent_id: String,
    timestamp: DateTime<Utc>,
    metrics: BTreeMap<String, f64>,
    metadata: BTreeMap<String, String>,
}

impl MetricsEnvelope {
    pub fn new(
        agent_id: impl Into<String>,
        timestamp_secs: i64,
        metrics: BTreeMap<String, f64>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self, EnvelopeError> {
        let timestamp = DateTime::from_timestamp(timestamp_secs, 0)
            .ok_or(EnvelopeError::InvalidTimestamp(timestamp_secs))?;

        Ok(Self {
            agent_id: agent_id.into(),
            timestamp,
            metrics,
            metadata,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Publish key on the metrics topic
    pub fn key(&self) -> &[u8] {
        self.agent_id.as_bytes()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Command payload relayed verbatim to an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub command: String,
}

impl From<CommandEnvelope> for CommandResponse {
    fn from(envelope: CommandEnvelope) -> Self {
        CommandResponse {
            command: envelope.command,
        }
    }
}

/// Inbound record reduced to the fields the producer path needs
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub agent_id: String,
    pub timestamp: i64,
    pub metrics: BTreeMap<String, f64>,
    pub metadata: BTreeMap<String, String>,
}

/// Flatten an agent's gRPC record into named metrics and string metadata
pub fn flatten_request(request: MetricsRequest) -> InboundRecord {
    let MetricsRequest {
        agent_id,
        hostname,
        timestamp,
        metrics,
        metadata,
    } = request;

    let metrics = metrics.map(flatten_metrics).unwrap_or_default();

    let mut metadata: BTreeMap<String, String> = metadata.into_iter().collect();
    if !hostname.is_empty() {
        metadata
            .entry(HOSTNAME_KEY.to_string())
            .or_insert(hostname);
    }

    InboundRecord {
        agent_id,
        timestamp,
        metrics,
        metadata,
    }
}

fn flatten_metrics(system: SystemMetrics) -> BTreeMap<String, f64> {
    let fixed = [
        ("cpu_percent", system.cpu_percent),
        ("memory_percent", system.memory_percent),
        ("memory_used_mb", system.memory_used_mb),
        ("memory_total_mb", system.memory_total_mb),
        ("disk_read_mb", system.disk_read_mb),
        ("disk_write_mb", system.disk_write_mb),
        ("net_in_mb", system.net_in_mb),
        ("net_out_mb", system.net_out_mb),
    ];

    let mut metrics: BTreeMap<String, f64> = fixed
        .into_iter()
        .filter(|(_, value)| value.is_finite())
        .map(|(name, value)| (name.to_string(), value))
        .collect();

    for (name, raw) in system.custom_metrics {
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => {
                metrics.insert(name, value);
            }
            _ => debug!("skipping non-numeric custom metric {name}={raw}"),
        }
    }

    metrics
}
