//! Live sessions by agent id
//!
//! Sessions register once their agent is known and deregister when they close.
//! Commands are still broadcast to every session; the registry only answers
//! "is this agent connected right now".

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

use super::session::SessionHandle;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a session, returning the one it replaces (agent reconnected)
    pub fn register(&self, agent_id: &str, handle: SessionHandle) -> Option<SessionHandle> {
        debug!("registering session {} for agent {agent_id}", handle.id());
        self.lock().insert(agent_id.to_string(), handle)
    }

    /// Remove the agent's entry if it still belongs to `session_id`
    ///
    /// A newer session of the same agent is left untouched.
    pub fn unregister(&self, agent_id: &str, session_id: Uuid) -> bool {
        let mut sessions = self.lock();

        match sessions.get(agent_id) {
            Some(handle) if handle.id() == session_id => {
                sessions.remove(agent_id);
                debug!("unregistered session {session_id} for agent {agent_id}");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, agent_id: &str) -> Option<SessionHandle> {
        self.lock().get(agent_id).cloned()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.lock().contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}
