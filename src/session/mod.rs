//! Per-user session state: the model history replayed on every turn and the
//! user-facing transcript.
//!
//! Nothing here is persisted; a session lives as long as its owner keeps it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::{DatabaseGateway, GatewayFactory};
use crate::error::SqlTalkError;
use crate::trace::TraceBuilder;
use crate::types::{ModelMessage, Role};

/// One entry of the user-facing transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls made while producing this message. Assistant messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceBuilder>,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            trace: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, trace: TraceBuilder) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            trace: Some(trace),
            timestamp: Utc::now(),
        }
    }
}

/// A conversation bound to its own database connection.
pub struct Session {
    id: String,
    gateway: Box<dyn DatabaseGateway>,
    history: Vec<ModelMessage>,
    transcript: Vec<SessionMessage>,
    created_at: DateTime<Utc>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("history", &self.history.len())
            .field("transcript", &self.transcript.len())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(id: impl Into<String>, gateway: Box<dyn DatabaseGateway>) -> Self {
        Self {
            id: id.into(),
            gateway,
            history: Vec::new(),
            transcript: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn gateway(&self) -> &dyn DatabaseGateway {
        &*self.gateway
    }

    /// Messages replayed to the model, including tool calls and results.
    pub fn history(&self) -> &[ModelMessage] {
        &self.history
    }

    /// What the user sees: prompts and answers, each answer with its trace.
    pub fn transcript(&self) -> &[SessionMessage] {
        &self.transcript
    }

    /// The most recent assistant message, if any.
    pub fn last_answer(&self) -> Option<&SessionMessage> {
        self.transcript
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
    }

    /// Forget the conversation. The database connection is kept.
    pub fn clear(&mut self) {
        debug!(session_id = %self.id, "clearing session");
        self.history.clear();
        self.transcript.clear();
    }

    pub(crate) fn push_history(&mut self, message: ModelMessage) {
        self.history.push(message);
    }

    pub(crate) fn truncate_history(&mut self, len: usize) {
        self.history.truncate(len);
    }

    pub(crate) fn push_transcript(&mut self, message: SessionMessage) {
        self.transcript.push(message);
    }
}

/// Sessions keyed by id, each opened with its own gateway.
pub struct SessionManager {
    factory: Arc<dyn GatewayFactory>,
    sessions: HashMap<String, Session>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn GatewayFactory>) -> Self {
        Self {
            factory,
            sessions: HashMap::new(),
        }
    }

    /// Get the session for `id`, opening a fresh connection if it is new.
    pub fn open(&mut self, id: &str) -> Result<&mut Session, SqlTalkError> {
        if !self.sessions.contains_key(id) {
            let gateway = self.factory.open()?;
            debug!(session_id = %id, "opened session");
            self.sessions
                .insert(id.to_string(), Session::new(id, gateway));
        }
        self.sessions
            .get_mut(id)
            .ok_or_else(|| SqlTalkError::InvalidState(format!("session '{id}' vanished")))
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// End a session, dropping its connection.
    pub fn close(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn session_ids(&self) -> Vec<&str> {
        self.sessions.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
