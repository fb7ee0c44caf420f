//! Model provider trait and implementations.

pub mod http;

#[cfg(feature = "google")]
pub mod google;

#[cfg(feature = "openai")]
pub mod openai;

use async_trait::async_trait;

use crate::config::SqlTalkConfig;
use crate::error::SqlTalkError;
use crate::models::{LanguageModel, ProviderKind};
use crate::tools::ToolDeclaration;
use crate::types::{AgentToolCall, FinishReason, GenerationSettings, ModelMessage, Usage};

/// A request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub system: Option<String>,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDeclaration>,
    pub settings: GenerationSettings,
}

/// The two shapes a model reply can take.
///
/// Decided once when the provider payload is decoded; the conversation loop
/// only ever matches on this.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// The model wants tools run. Any accompanying text is kept for history.
    ToolCalls {
        text: Option<String>,
        calls: Vec<AgentToolCall>,
    },
    /// Final answer for the turn.
    Text(String),
}

impl ModelReply {
    /// Classify decoded reply parts. Neither text nor calls is malformed.
    pub fn from_parts(text: String, calls: Vec<AgentToolCall>) -> Result<Self, SqlTalkError> {
        if !calls.is_empty() {
            let text = (!text.trim().is_empty()).then_some(text);
            return Ok(Self::ToolCalls { text, calls });
        }
        if text.trim().is_empty() {
            return Err(SqlTalkError::MalformedResponse(
                "reply contained neither text nor a tool call".into(),
            ));
        }
        Ok(Self::Text(text))
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCalls { .. })
    }
}

/// Response from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub reply: ModelReply,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

/// Core trait implemented by all model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "google").
    fn provider_name(&self) -> &str;

    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Send the full history and tool catalog; get the model's next move.
    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, SqlTalkError>;
}

/// Create a provider for the given model, using the provided config.
pub fn create_provider(
    model: &LanguageModel,
    config: &SqlTalkConfig,
) -> Result<Box<dyn ModelProvider>, SqlTalkError> {
    match model.provider {
        #[cfg(feature = "google")]
        ProviderKind::Google => {
            let api_key = config.get_api_key("google").ok_or_else(|| {
                SqlTalkError::Authentication("Missing GOOGLE_API_KEY".into())
            })?;
            Ok(Box::new(google::GoogleProvider::new(
                model.model_id.clone(),
                api_key,
                config.get_base_url("google"),
            )))
        }
        #[cfg(feature = "openai")]
        ProviderKind::OpenAi => {
            let api_key = config.get_api_key("openai").ok_or_else(|| {
                SqlTalkError::Authentication("Missing OPENAI_API_KEY".into())
            })?;
            Ok(Box::new(openai::OpenAiProvider::new(
                model.model_id.clone(),
                api_key,
                config.get_base_url("openai"),
            )))
        }
        #[allow(unreachable_patterns)]
        _ => Err(SqlTalkError::ModelNotFound(format!(
            "Provider for model '{model}' not enabled via feature flags"
        ))),
    }
}
