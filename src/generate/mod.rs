//! One-shot question answering without tools.
//!
//! The model writes a single query from a schema-aware prompt, the gateway
//! runs it, and a second model call explains the rows. There is no loop and
//! no history: each question stands alone.

mod prompts;

pub use prompts::{clean_sql, interpretation_prompt, sql_prompt, FewShotExample};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent_loop::runner::generate_with_policy;
use crate::config::SqlTalkConfig;
use crate::database::{DatabaseGateway, Row};
use crate::error::SqlTalkError;
use crate::provider::{ModelProvider, ModelReply, ProviderRequest};
use crate::types::{GenerationSettings, ModelMessage, Usage};
use crate::util::retry::RetryPolicy;

const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything produced for one question.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedAnswer {
    pub question: String,
    /// The statement that was executed, after fence stripping.
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// `None` when the query returned nothing to explain.
    pub interpretation: Option<String>,
    pub usage: Usage,
}

impl GeneratedAnswer {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Turns a question into one SQL statement and an explanation of its rows.
pub struct SqlGenerator {
    provider: Arc<dyn ModelProvider>,
    examples: Vec<FewShotExample>,
    settings: GenerationSettings,
    retry_policy: RetryPolicy,
    model_timeout: Duration,
}

impl SqlGenerator {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            examples: Vec::new(),
            settings: GenerationSettings::builder().temperature(0.0).build(),
            retry_policy: RetryPolicy::default(),
            model_timeout: DEFAULT_MODEL_TIMEOUT,
        }
    }

    pub fn from_config(provider: Arc<dyn ModelProvider>, config: &SqlTalkConfig) -> Self {
        let settings = config.settings();
        Self::new(provider)
            .with_examples(settings.examples.clone())
            .with_settings(
                GenerationSettings::builder()
                    .temperature(settings.temperature)
                    .build(),
            )
            .with_retry_policy(RetryPolicy::default().with_max_attempts(settings.max_attempts))
            .with_model_timeout(config.model_timeout())
    }

    pub fn with_examples(mut self, examples: Vec<FewShotExample>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Ask the model for the query that answers `question`.
    pub async fn generate_sql(
        &self,
        gateway: &dyn DatabaseGateway,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, Usage), SqlTalkError> {
        let request = ProviderRequest {
            system: Some(sql_prompt(gateway, &self.examples)?),
            messages: vec![ModelMessage::user(question)],
            tools: Vec::new(),
            settings: self.settings.clone(),
        };
        let (reply, usage) = self.ask(&request, cancel).await?;
        let sql = clean_sql(&reply)?;
        debug!(%sql, "generated query");
        Ok((sql, usage))
    }

    /// Generate a query, run it, and explain the result.
    ///
    /// Query errors are returned as they are: there is no model in the loop
    /// to correct them.
    pub async fn answer(
        &self,
        gateway: &dyn DatabaseGateway,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedAnswer, SqlTalkError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SqlTalkError::InvalidArgument(
                "Please enter a valid question to generate a query.".into(),
            ));
        }

        let (sql, mut usage) = self.generate_sql(gateway, question, cancel).await?;
        let rows = gateway.run_query(&sql)?;
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();

        let interpretation = if rows.is_empty() {
            None
        } else {
            let request = ProviderRequest {
                system: None,
                messages: vec![ModelMessage::user(format!(
                    "{question}\n\n{}",
                    interpretation_prompt(&rows)
                ))],
                tools: Vec::new(),
                settings: self.settings.clone(),
            };
            let (text, more) = self.ask(&request, cancel).await?;
            usage.merge(&more);
            Some(text)
        };

        info!(rows = rows.len(), total_tokens = usage.total_tokens, "question answered");
        Ok(GeneratedAnswer {
            question: question.to_string(),
            sql,
            columns,
            rows,
            interpretation,
            usage,
        })
    }

    async fn ask(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<(String, Usage), SqlTalkError> {
        if cancel.is_cancelled() {
            return Err(SqlTalkError::Canceled);
        }
        let response = generate_with_policy(
            self.provider.as_ref(),
            request,
            &self.retry_policy,
            self.model_timeout,
            cancel,
        )
        .await?;
        match response.reply {
            ModelReply::Text(text) => Ok((text, response.usage)),
            ModelReply::ToolCalls { calls, .. } => Err(SqlTalkError::MalformedResponse(format!(
                "expected text, got {} tool call(s)",
                calls.len()
            ))),
        }
    }
}
