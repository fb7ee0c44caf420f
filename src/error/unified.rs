//! Error classification and recovery hints.

/// Broad error category, following the turn failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The hosted model could not be reached or answered with garbage.
    ModelCommunication,
    /// The model asked for a tool that does not exist or sent bad arguments.
    ToolDispatch,
    /// SQL execution failed.
    Database,
    /// The per-turn tool-call cap was hit.
    TurnLimit,
    Canceled,
    Configuration,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckCredentials,
    CheckConfiguration,
    IncreaseTimeout,
    RephraseQuestion,
    CheckQuery,
    None,
}
