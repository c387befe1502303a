//! `MonitoringService` implementation
//!
//! `StreamMetrics` turns each call into a [`StreamSession`]; `SendCommand`
//! writes an operator command onto the commands topic.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use crate::broker::commands::CommandPublisher;
use crate::broker::messages::SessionSettings;
use crate::broker::producer::ProducerAdapter;
use crate::broker::registry::SessionRegistry;
use crate::broker::session::StreamSession;
use crate::broker::subscriber::CommandSubscriber;
use crate::log::LogBackend;
use crate::proto::monitoring_service_server::MonitoringService;
use crate::proto::{Command, CommandAck, CommandResponse, CommandType, MetricsRequest};

/// Request header an agent may use to announce itself before its first record
pub const AGENT_ID_HEADER: &str = "agent-id";

pub struct MonitoringServiceImpl {
    backend: Arc<dyn LogBackend>,
    producer: Arc<ProducerAdapter>,
    commands: CommandPublisher,
    registry: Arc<SessionRegistry>,

    /// Topic every session subscribes to
    commands_topic: String,

    settings: SessionSettings,

    /// Parent of every session's cancellation token
    shutdown: CancellationToken,
}

impl MonitoringServiceImpl {
    pub fn new(
        backend: Arc<dyn LogBackend>,
        producer: Arc<ProducerAdapter>,
        commands: CommandPublisher,
        registry: Arc<SessionRegistry>,
        settings: SessionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let commands_topic = commands.topic().to_string();

        Self {
            backend,
            producer,
            commands,
            registry,
            commands_topic,
            settings,
            shutdown,
        }
    }

    fn rejected(message: impl Into<String>) -> Response<CommandAck> {
        let message = message.into();
        warn!("rejected command: {message}");
        Response::new(CommandAck {
            success: false,
            message,
        })
    }
}

#[tonic::async_trait]
impl MonitoringService for MonitoringServiceImpl {
    type StreamMetricsStream = ReceiverStream<Result<CommandResponse, Status>>;

    async fn stream_metrics(
        &self,
        request: Request<Streaming<MetricsRequest>>,
    ) -> Result<Response<Self::StreamMetricsStream>, Status> {
        let agent_hint = request
            .metadata()
            .get(AGENT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let remote = request.remote_addr();
        let inbound = request.into_inner();

        let subscriber = CommandSubscriber::subscribe(
            self.backend.as_ref(),
            &self.commands_topic,
            &self.settings.group_prefix,
        )
        .map_err(|e| Status::unavailable(format!("Failed to subscribe to commands: {e}")))?;

        let (tx, rx) = mpsc::channel(self.settings.outbound_buffer);

        let mut session = StreamSession::new(
            Arc::clone(&self.producer),
            subscriber,
            Arc::clone(&self.registry),
            self.settings.clone(),
        );
        if let Some(agent_id) = agent_hint {
            session = session.with_agent_id(agent_id);
        }

        info!(session = %session.id(), ?remote, "agent connected");

        tokio::spawn(session.run(inbound, tx, self.shutdown.child_token()));

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn send_command(
        &self,
        request: Request<Command>,
    ) -> Result<Response<CommandAck>, Status> {
        let req = request.into_inner();

        if req.agent_id.is_empty() {
            return Ok(Self::rejected("agent_id is required"));
        }

        let Ok(command) = CommandType::try_from(req.r#type) else {
            return Ok(Self::rejected(format!("unknown command type {}", req.r#type)));
        };

        debug!(agent = %req.agent_id, "sending {}", command.as_str_name());

        if let Err(e) = self.commands.publish(&req.agent_id, command).await {
            return Ok(Self::rejected(format!("failed to publish command: {e}")));
        }

        let presence = if self.registry.contains(&req.agent_id) {
            "connected"
        } else {
            "not connected, delivered on its next session"
        };

        Ok(Response::new(CommandAck {
            success: true,
            message: format!(
                "{} queued for {} ({presence})",
                command.as_str_name(),
                req.agent_id
            ),
        }))
    }
}
