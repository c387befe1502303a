//! Types exchanged between a session's tasks and its observers

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::config::SessionConfig;

/// Lifecycle of a stream session
///
/// `Active → Closing → Closed`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Receive task and send loop are running
    Active,

    /// Send loop has exited, waiting for the receive task
    Closing,

    /// Subscription released and session deregistered
    Closed,
}

/// Why a session left the `Active` state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Server shutdown or explicit cancellation
    Cancelled,

    /// The agent went away (outbound stream dropped)
    TransportClosed,

    /// Reading from the agent failed
    ReceiveFailed(String),

    /// Writing a command to the agent failed
    WriteFailed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Cancelled => write!(f, "cancelled"),
            CloseReason::TransportClosed => write!(f, "transport closed"),
            CloseReason::ReceiveFailed(reason) => write!(f, "receive failed: {reason}"),
            CloseReason::WriteFailed => write!(f, "write failed"),
        }
    }
}

/// How the inbound stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEnd {
    /// The agent half-closed its side
    EndOfStream,

    /// The transport reported an error
    Failed(String),
}

/// Result reported by a finished receive task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Records published and flushed
    pub forwarded: u64,

    /// Records dropped after a failed publish
    pub dropped: u64,

    pub end: ReceiveEnd,
}

/// Final report of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: Uuid,

    pub agent_id: Option<String>,

    pub reason: CloseReason,

    /// Commands written to the agent
    pub commands_delivered: u64,

    /// `None` when the receive task had to be abandoned
    pub receive: Option<ReceiveOutcome>,
}

/// Timing and sizing knobs of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Upper bound for a single command poll
    pub poll_timeout: Duration,

    /// How long a closing session waits for its receive task
    pub join_grace: Duration,

    /// Capacity of the outbound command channel
    pub outbound_buffer: usize,

    /// Prefix of the per-session subscription identity
    pub group_prefix: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionConfig::default().into()
    }
}

impl From<SessionConfig> for SessionSettings {
    fn from(config: SessionConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout(),
            join_grace: config.join_grace(),
            outbound_buffer: config.outbound_buffer.max(1),
            group_prefix: config.group_prefix,
        }
    }
}
