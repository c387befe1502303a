use std::net::IpAddr;
use std::time::Duration;

use tracing::{trace, warn};

use crate::util::{
    GRPC_SERVER_HOST, GRPC_SERVER_PORT, KAFKA_BOOTSTRAP_SERVERS, get_default_addr,
    get_default_bootstrap_servers, get_default_client_id, get_default_port,
};

/// Message log backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum LogConfig {
    /// Kafka cluster (default for deployments)
    Kafka {
        /// Comma-separated broker addresses
        #[serde(default = "get_default_bootstrap_servers")]
        bootstrap_servers: String,

        /// Client id reported to the cluster
        #[serde(default = "get_default_client_id")]
        client_id: String,

        #[serde(default = "default_security_protocol")]
        security_protocol: String,
    },

    /// In-process log (no persistence, local development and tests)
    Memory,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig::Kafka {
            bootstrap_servers: get_default_bootstrap_servers(),
            client_id: get_default_client_id(),
            security_protocol: default_security_protocol(),
        }
    }
}

fn default_security_protocol() -> String {
    String::from("PLAINTEXT")
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,

    pub log: LogConfig,

    pub topics: TopicConfig,

    pub session: SessionConfig,

    pub producer: ProducerConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: get_default_addr(),
            port: get_default_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Topic metrics are published to
    pub metrics: String,

    /// Topic commands are read from
    pub commands: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            metrics: String::from("metrics"),
            commands: String::from("command"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a single command poll waits for a record
    pub poll_timeout_ms: u64,

    /// How long a closing session waits for its receive task
    pub join_grace_ms: u64,

    /// Capacity of the outbound command channel per session
    pub outbound_buffer: usize,

    /// Prefix for the per-session subscription identity
    pub group_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            join_grace_ms: 2000,
            outbound_buffer: 32,
            group_prefix: String::from("telemetry-broker"),
        }
    }
}

impl SessionConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn join_grace(&self) -> Duration {
        Duration::from_millis(self.join_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Upper bound for the synchronous flush after each publish
    pub flush_timeout_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            flush_timeout_ms: 5000,
        }
    }
}

impl ProducerConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

impl Config {
    /// Apply environment overrides on top of the current values
    ///
    /// Unparseable values are ignored so a typo in the environment never
    /// replaces a valid configured value.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(GRPC_SERVER_HOST) {
            match host.parse() {
                Ok(host) => self.server.host = host,
                Err(_) => warn!("ignoring invalid {GRPC_SERVER_HOST}: {host}"),
            }
        }

        if let Some(port) = lookup(GRPC_SERVER_PORT) {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("ignoring invalid {GRPC_SERVER_PORT}: {port}"),
            }
        }

        if let Some(servers) = lookup(KAFKA_BOOTSTRAP_SERVERS) {
            self.set_bootstrap_servers(servers);
        }

        self
    }

    /// Point the Kafka backend at different brokers (no-op for the memory log)
    pub fn set_bootstrap_servers(&mut self, servers: String) {
        if let LogConfig::Kafka {
            bootstrap_servers, ..
        } = &mut self.log
        {
            *bootstrap_servers = servers;
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
