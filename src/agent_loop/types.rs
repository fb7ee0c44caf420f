//! Core turn types: the state machine, limits and outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::error::SqlTalkError;
use crate::trace::TraceBuilder;
use crate::types::Usage;

/// Unique turn identifier.
pub type TurnId = Uuid;

/// Instruction sent with every model call unless overridden.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "Please give a concise, high-level summary followed \
    by detail in plain language about where the information in your response is coming from in \
    the database. Only use information that you learn from SQLite, do not make up information. \
    The table name or field name can be any case sent as input. You have to analyse based on \
    table information.";

/// States of a single turn.
///
/// ```text
/// AwaitingModel -> FinalAnswer
///               -> ToolCallPending -> Dispatching -> AwaitingModel
///                                                 -> ToolCallPending (more calls in the reply)
/// any non-terminal state -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnState {
    AwaitingModel,
    ToolCallPending,
    Dispatching,
    FinalAnswer,
    Failed,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::FinalAnswer | Self::Failed)
    }

    pub fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;
        match (self, next) {
            (FinalAnswer | Failed, _) => false,
            (_, Failed) => true,
            (AwaitingModel, ToolCallPending | FinalAnswer) => true,
            (ToolCallPending, Dispatching) => true,
            (Dispatching, AwaitingModel | ToolCallPending) => true,
            _ => false,
        }
    }
}

/// Tracks the current state and every state visited, rejecting illegal moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnMachine {
    path: Vec<TurnState>,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnMachine {
    pub fn new() -> Self {
        Self {
            path: vec![TurnState::AwaitingModel],
        }
    }

    pub fn state(&self) -> TurnState {
        self.path
            .last()
            .copied()
            .unwrap_or(TurnState::AwaitingModel)
    }

    /// Every state visited, starting with `AwaitingModel`.
    pub fn path(&self) -> &[TurnState] {
        &self.path
    }

    /// Move to `next`, returning the state left behind.
    pub fn transition(&mut self, next: TurnState) -> Result<TurnState, SqlTalkError> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(SqlTalkError::InvalidState(format!(
                "illegal turn transition {current} -> {next}"
            )));
        }
        self.path.push(next);
        Ok(current)
    }

    /// Force the terminal `Failed` state. Returns the previous state, or
    /// `None` if the turn had already failed.
    pub fn fail(&mut self) -> Option<TurnState> {
        let current = self.state();
        if current == TurnState::Failed {
            return None;
        }
        self.path.push(TurnState::Failed);
        Some(current)
    }
}

/// Per-turn safety limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnLimits {
    /// Tool calls allowed before the turn fails with `TooManyToolCalls`.
    pub max_tool_calls: usize,
    /// Empty or unusable model replies tolerated before the turn fails.
    pub max_malformed_replies: usize,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_tool_calls: 10,
            max_malformed_replies: 2,
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Failed,
}

/// Result of one user prompt.
///
/// `answer` is always user-presentable: the model's final text, or the
/// failure notice when the turn failed.
#[derive(Debug)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    pub status: TurnStatus,
    pub answer: String,
    /// Tool calls made during the turn, kept even when it failed.
    pub trace: TraceBuilder,
    pub error: Option<SqlTalkError>,
    pub states: Vec<TurnState>,
    pub usage: Usage,
    pub finished_at: DateTime<Utc>,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TurnStatus::Completed
    }
}
