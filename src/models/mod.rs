//! Model selection: `provider:model-id` strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::SqlTalkError;

/// Hosted model providers sqltalk can talk to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    Google,
    OpenAi,
}

/// A model addressed as `provider:model-id`, e.g. `google:gemini-1.5-pro`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LanguageModel {
    pub provider: ProviderKind,
    pub model_id: String,
}

impl LanguageModel {
    pub fn new(provider: ProviderKind, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
        }
    }

    /// Get the provider name.
    pub fn provider_name(&self) -> String {
        self.provider.to_string()
    }
}

impl Default for LanguageModel {
    fn default() -> Self {
        Self::new(ProviderKind::Google, "gemini-1.5-pro")
    }
}

impl fmt::Display for LanguageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model_id)
    }
}

impl FromStr for LanguageModel {
    type Err = SqlTalkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model_id) = s.split_once(':').ok_or_else(|| {
            SqlTalkError::InvalidArgument(format!(
                "Invalid model format: '{s}'. Use provider:model (e.g. google:gemini-1.5-pro)"
            ))
        })?;
        let model_id = model_id.trim();
        if model_id.is_empty() {
            return Err(SqlTalkError::InvalidArgument(format!(
                "Missing model id in '{s}'"
            )));
        }
        let provider = ProviderKind::from_str(provider.trim())
            .map_err(|_| SqlTalkError::ModelNotFound(format!("Unknown provider '{provider}'")))?;
        Ok(Self::new(provider, model_id))
    }
}
