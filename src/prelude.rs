//! Convenience re-exports for common use.

pub use crate::agent_loop::{ConversationDriver, TurnLimits, TurnOutcome, TurnState, TurnStatus};
pub use crate::config::SqlTalkConfig;
pub use crate::database::{DatabaseGateway, GatewayFactory, Row, SqliteGateway, SqliteGatewayFactory};
pub use crate::error::{Result, SqlTalkError};
pub use crate::generate::{GeneratedAnswer, SqlGenerator};
pub use crate::models::LanguageModel;
pub use crate::provider::{create_provider, ModelProvider, ModelReply};
pub use crate::session::{Session, SessionManager};
pub use crate::tools::{ToolCatalog, ToolName};
pub use crate::trace::TraceBuilder;
pub use crate::types::{GenerationSettings, ModelMessage, Role};
