//! Error types for sqltalk.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all sqltalk operations.
#[derive(Error, Debug)]
pub enum SqlTalkError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Tool dispatch error: {tool_name}: {message}")]
    ToolDispatch { tool_name: String, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Too many tool calls: the model requested more than {limit} in one turn")]
    TooManyToolCalls { limit: usize },

    #[error("Turn canceled")]
    Canceled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<rusqlite::Error> for SqlTalkError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl SqlTalkError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a tool dispatch error.
    pub fn tool_dispatch(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolDispatch {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Api { .. }
            | Self::Network(_)
            | Self::Authentication(_)
            | Self::RateLimited { .. }
            | Self::Timeout(_)
            | Self::MalformedResponse(_) => ErrorCategory::ModelCommunication,
            Self::ToolDispatch { .. } => ErrorCategory::ToolDispatch,
            Self::Database(_) => ErrorCategory::Database,
            Self::TooManyToolCalls { .. } => ErrorCategory::TurnLimit,
            Self::Canceled => ErrorCategory::Canceled,
            Self::Configuration(_) | Self::ModelNotFound(_) => ErrorCategory::Configuration,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    ///
    /// Only transient model-communication failures qualify; a database error
    /// is handed back to the model instead of being retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            Self::Authentication(_) => RecoverySuggestion::CheckCredentials,
            Self::Timeout(_) => RecoverySuggestion::IncreaseTimeout,
            _ if self.is_retryable() => RecoverySuggestion::RetryWithBackoff,
            _ => match self.category() {
                ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
                ErrorCategory::TurnLimit
                | ErrorCategory::ToolDispatch
                | ErrorCategory::ModelCommunication => RecoverySuggestion::RephraseQuestion,
                ErrorCategory::Database => RecoverySuggestion::CheckQuery,
                _ => RecoverySuggestion::None,
            },
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SqlTalkError>;
