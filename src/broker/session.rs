//! StreamSession - One agent's bidirectional connection
//!
//! ## Message Flow
//!
//! ```text
//! inbound stream → receive task → ProducerAdapter::send → metrics topic
//!                        │
//!                        └── outcome (joined by the send loop)
//!
//! commands topic → CommandSubscriber::poll(1s) → send loop → outbound stream
//! ```
//!
//! The send loop owns the session. It stops when the session is cancelled,
//! when the agent goes away, when a command cannot be written, or when the
//! receive task reports an error. A clean end of the inbound stream only stops
//! the receive path; commands keep flowing until the connection closes.
//!
//! On exit the session moves `Active → Closing`, gives the receive task a
//! bounded grace period, releases its subscription, deregisters and ends in
//! `Closed`.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{Instrument, debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::messages::{
    CloseReason, ReceiveEnd, ReceiveOutcome, SessionSettings, SessionState, SessionSummary,
};
use super::producer::ProducerAdapter;
use super::registry::SessionRegistry;
use super::subscriber::CommandSubscriber;
use crate::envelope::flatten_request;
use crate::proto::{CommandResponse, MetricsRequest};

/// Outbound half of the connection
pub type CommandSink = mpsc::Sender<Result<CommandResponse, Status>>;

/// Observer side of a running session
///
/// Cheap to clone; the registry stores one per connected agent.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Resolve once the session reached `Closed`
    pub async fn wait_closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == SessionState::Closed)
            .await;
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (_state_tx, state) = watch::channel(SessionState::Active);
        Self {
            id: Uuid::new_v4(),
            state,
        }
    }
}

pub struct StreamSession {
    id: Uuid,

    /// Agent id announced before the first record, if any
    agent_hint: Option<String>,

    /// Process-wide producer
    producer: Arc<ProducerAdapter>,

    /// This session's own command subscription
    subscriber: CommandSubscriber,

    registry: Arc<SessionRegistry>,

    settings: SessionSettings,

    state_tx: watch::Sender<SessionState>,
}

impl StreamSession {
    pub fn new(
        producer: Arc<ProducerAdapter>,
        subscriber: CommandSubscriber,
        registry: Arc<SessionRegistry>,
        settings: SessionSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Active);

        Self {
            id: Uuid::new_v4(),
            agent_hint: None,
            producer,
            subscriber,
            registry,
            settings,
            state_tx,
        }
    }

    /// Register under this agent id right away instead of on the first record
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        if !agent_id.is_empty() {
            self.agent_hint = Some(agent_id);
        }
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            state: self.state_tx.subscribe(),
        }
    }

    /// Serve the connection until it ends
    ///
    /// `inbound` carries the agent's metrics, `outbound` its commands, and
    /// `cancel` is the server's shutdown signal.
    #[instrument(skip_all, fields(session = %self.id))]
    pub async fn run<S>(
        self,
        inbound: S,
        outbound: CommandSink,
        cancel: CancellationToken,
    ) -> SessionSummary
    where
        S: Stream<Item = Result<MetricsRequest, Status>> + Send + 'static,
    {
        let handle = self.handle();
        let StreamSession {
            id,
            agent_hint,
            producer,
            mut subscriber,
            registry,
            settings,
            state_tx,
        } = self;

        if let Some(agent_id) = &agent_hint {
            registry.register(agent_id, handle.clone());
        }
        let (agent_tx, agent_rx) = watch::channel(agent_hint);

        info!(group = subscriber.group_id(), "session started");

        let mut receive_task = tokio::spawn(
            receive_loop(inbound, producer, Arc::clone(&registry), handle, agent_tx)
                .in_current_span(),
        );
        let mut receive_finished = false;
        let mut receive = None;
        let mut commands_delivered = 0u64;

        let reason = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break CloseReason::Cancelled,

                _ = outbound.closed() => break CloseReason::TransportClosed,

                joined = &mut receive_task, if !receive_finished => {
                    receive_finished = true;

                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            break CloseReason::ReceiveFailed(format!("receive task died: {e}"));
                        }
                    };
                    let end = outcome.end.clone();
                    receive = Some(outcome);

                    match end {
                        ReceiveEnd::EndOfStream => {
                            debug!("agent closed its metrics stream, still relaying commands");
                        }
                        ReceiveEnd::Failed(reason) => break CloseReason::ReceiveFailed(reason),
                    }
                }

                polled = subscriber.poll(settings.poll_timeout) => {
                    let Some(envelope) = polled else {
                        continue;
                    };

                    trace!("relaying command {}", envelope.command);

                    // an agent that stops reading fills the buffer, keep honouring cancellation
                    tokio::select! {
                        biased;

                        _ = cancel.cancelled() => break CloseReason::Cancelled,

                        sent = outbound.send(Ok(envelope.into())) => {
                            if sent.is_err() {
                                break CloseReason::WriteFailed;
                            }
                            commands_delivered += 1;
                        }
                    }
                }
            }
        };

        state_tx.send_replace(SessionState::Closing);
        info!("session closing: {reason}");

        if !receive_finished {
            match tokio::time::timeout(settings.join_grace, &mut receive_task).await {
                Ok(Ok(outcome)) => receive = Some(outcome),
                Ok(Err(e)) => warn!("receive task died: {e}"),
                Err(_) => {
                    warn!(
                        "receive task still running after {:?}, abandoning it",
                        settings.join_grace
                    );
                    receive_task.abort();
                    // wait for the abort so no registration races the cleanup below
                    let _ = (&mut receive_task).await;
                }
            }
        }

        subscriber.close().await;

        let agent_id = agent_rx.borrow().clone();
        if let Some(agent_id) = &agent_id {
            registry.unregister(agent_id, id);
        }

        state_tx.send_replace(SessionState::Closed);

        let summary = SessionSummary {
            session_id: id,
            agent_id,
            reason,
            commands_delivered,
            receive,
        };
        info!(
            agent = ?summary.agent_id,
            commands = summary.commands_delivered,
            "session closed"
        );

        summary
    }
}

/// Forward every inbound record to the producer until the stream ends
async fn receive_loop<S>(
    inbound: S,
    producer: Arc<ProducerAdapter>,
    registry: Arc<SessionRegistry>,
    handle: SessionHandle,
    agent_tx: watch::Sender<Option<String>>,
) -> ReceiveOutcome
where
    S: Stream<Item = Result<MetricsRequest, Status>>,
{
    let mut inbound = std::pin::pin!(inbound);
    let mut forwarded = 0;
    let mut dropped = 0;

    let end = loop {
        let request = match inbound.next().await {
            Some(Ok(request)) => request,
            Some(Err(status)) => {
                debug!("inbound stream failed: {status}");
                break ReceiveEnd::Failed(status.message().to_string());
            }
            None => break ReceiveEnd::EndOfStream,
        };

        let record = flatten_request(request);
        if record.agent_id.is_empty() {
            warn!("dropping record without agent id");
            dropped += 1;
            continue;
        }

        if agent_tx.borrow().is_none() {
            registry.register(&record.agent_id, handle.clone());
            agent_tx.send_replace(Some(record.agent_id.clone()));
            info!(agent = %record.agent_id, "agent identified");
        }

        trace!(agent = %record.agent_id, "received metrics");

        let agent_id = record.agent_id;
        if producer
            .send(&agent_id, record.timestamp, record.metrics, record.metadata)
            .await
        {
            forwarded += 1;
        } else {
            warn!(agent = %agent_id, "dropped metrics record");
            dropped += 1;
        }
    };

    ReceiveOutcome {
        forwarded,
        dropped,
        end,
    }
}
