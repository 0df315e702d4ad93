//! Session persistence.
//!
//! The runtime owns session state in memory during a run and hands it to
//! a [`SessionStore`] at the save points (turn completion, abort). Hosts
//! plug in a durable store; [`MemoryStore`] backs tests and ephemeral
//! deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use krait_core::messages::Message;
use krait_core::timeline::TimelineEntry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::RuntimeError;

/// Durable per-session state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Session identity.
    pub session_id: String,
    /// Completed turn count.
    pub turn: u32,
    /// Conversation history in request order.
    pub messages: Vec<Message>,
    /// Ordered activity timeline.
    pub timeline: Vec<TimelineEntry>,
    /// Next timeline position to assign.
    pub next_position: u64,
}

impl SessionState {
    /// A fresh, idle session with no history.
    #[must_use]
    pub fn empty(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn: 0,
            messages: Vec::new(),
            timeline: Vec::new(),
            next_position: 0,
        }
    }
}

/// Session persistence hooks.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. `Ok(None)` when the session has never been saved.
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, RuntimeError>;

    /// Save a session snapshot, replacing any prior state.
    async fn save(&self, state: &SessionState) -> Result<(), RuntimeError>;

    /// Load a session, falling back to a fresh idle session when unknown.
    async fn load_or_default(&self, session_id: &str) -> Result<SessionState, RuntimeError> {
        Ok(self
            .load(session_id)
            .await?
            .unwrap_or_else(|| SessionState::empty(session_id)))
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, RuntimeError> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn save(&self, state: &SessionState) -> Result<(), RuntimeError> {
        let _ = self
            .sessions
            .write()
            .insert(state.session_id.clone(), state.clone());
        Ok(())
    }
}
