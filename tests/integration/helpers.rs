//! Helper functions for integration tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use telemetry_broker::{
    Broker, SessionRegistry,
    config::{Config, LogConfig},
    log::MemoryLog,
    proto::{
        CommandResponse, MetricsRequest, SystemMetrics,
        monitoring_service_client::MonitoringServiceClient,
    },
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Request, Streaming};

pub const POLL_TIMEOUT_MS: u64 = 50;
pub const JOIN_GRACE_MS: u64 = 200;

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.log = LogConfig::Memory;
    config.session.poll_timeout_ms = POLL_TIMEOUT_MS;
    config.session.join_grace_ms = JOIN_GRACE_MS;
    config.producer.flush_timeout_ms = 200;
    config
}

/// Broker serving on an ephemeral local port
pub struct TestBroker {
    pub addr: SocketAddr,
    pub log: MemoryLog,
    pub registry: Arc<SessionRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

pub async fn spawn_broker() -> TestBroker {
    let log = MemoryLog::new();
    let broker = Broker::new(test_config(), Arc::new(log.clone())).unwrap();
    let registry = broker.registry();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown, signal) = oneshot::channel::<()>();
    let task = tokio::spawn(broker.serve(listener, async {
        let _ = signal.await;
    }));

    TestBroker {
        addr,
        log,
        registry,
        shutdown: Some(shutdown),
        task,
    }
}

impl TestBroker {
    pub async fn client(&self) -> MonitoringServiceClient<Channel> {
        MonitoringServiceClient::connect(format!("http://{}", self.addr))
            .await
            .unwrap()
    }

    pub fn trigger_shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("broker did not stop in time")
            .unwrap()
    }
}

/// Agent side of one `StreamMetrics` call
pub struct AgentConnection {
    pub metrics: mpsc::Sender<MetricsRequest>,
    pub commands: Streaming<CommandResponse>,
}

pub async fn connect_agent(
    client: &mut MonitoringServiceClient<Channel>,
    agent_id: Option<&str>,
) -> AgentConnection {
    let (metrics, rx) = mpsc::channel(16);

    let mut request = Request::new(ReceiverStream::new(rx));
    if let Some(agent_id) = agent_id {
        request
            .metadata_mut()
            .insert("agent-id", agent_id.parse().unwrap());
    }

    let commands = client.stream_metrics(request).await.unwrap().into_inner();

    AgentConnection { metrics, commands }
}

impl AgentConnection {
    pub async fn send(&self, request: MetricsRequest) {
        self.metrics.send(request).await.unwrap();
    }

    pub async fn next_command(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(2), self.commands.message())
            .await
            .expect("no command within timeout")
            .expect("command stream failed")
            .expect("command stream ended")
            .command
    }

    /// Assert nothing arrives for a few poll intervals
    pub async fn expect_no_command(&mut self) {
        let waited = tokio::time::timeout(
            Duration::from_millis(POLL_TIMEOUT_MS * 4),
            self.commands.message(),
        )
        .await;
        assert!(waited.is_err(), "unexpected command: {waited:?}");
    }
}

pub fn metrics_request(agent_id: &str, timestamp: i64, cpu: f64) -> MetricsRequest {
    MetricsRequest {
        agent_id: agent_id.to_string(),
        hostname: format!("{agent_id}.local"),
        timestamp,
        metrics: Some(SystemMetrics {
            cpu_percent: cpu,
            memory_percent: 50.0,
            ..Default::default()
        }),
        metadata: HashMap::new(),
    }
}

pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn payload_json(record: &telemetry_broker::log::LogRecord) -> serde_json::Value {
    serde_json::from_slice(record.payload.as_deref().unwrap()).unwrap()
}
