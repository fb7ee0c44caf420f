//! OpenAI Chat Completions API provider.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::SqlTalkError;
use crate::types::*;

use super::http::{bearer_headers, shared_client, status_to_error};
use super::{ModelProvider, ModelReply, ProviderRequest, ProviderResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    model_id: String,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(model_id: String, api_key: String, base_url: Option<String>) -> Self {
        Self {
            model_id,
            api_key,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn build_request_body(&self, request: &ProviderRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        for msg in &request.messages {
            messages.extend(message_to_openai(msg));
        }

        let mut body = serde_json::json!({
            "model": self.model_id,
            "messages": messages,
        });

        if let Some(max) = request.settings.max_tokens {
            body["max_tokens"] = max.into();
        }
        if let Some(temp) = request.settings.temperature {
            body["temperature"] = temp.into();
        }
        if let Some(top_p) = request.settings.top_p {
            body["top_p"] = top_p.into();
        }

        if !request.tools.is_empty() {
            let tool_defs: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = tool_defs.into();
            // Calls are dispatched strictly one after another.
            body["parallel_tool_calls"] = false.into();
        }

        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, SqlTalkError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %self.model_id,
            messages = request.messages.len(),
            "OpenAI chat completion"
        );

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let body_text = resp.text().await?;
        let data: OpenAiChatResponse = serde_json::from_str(&body_text).map_err(|e| {
            SqlTalkError::MalformedResponse(format!("undecodable OpenAI response: {e}"))
        })?;
        parse_openai_response(data)
    }
}

fn message_to_openai(msg: &ModelMessage) -> Vec<serde_json::Value> {
    match msg.role {
        Role::User => vec![serde_json::json!({ "role": "user", "content": msg.text() })],
        Role::Assistant => {
            let text = msg.text();
            let calls: Vec<serde_json::Value> = msg
                .tool_calls()
                .into_iter()
                .map(|call| {
                    serde_json::json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let content = if text.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::String(text)
            };
            let mut out = serde_json::json!({ "role": "assistant", "content": content });
            if !calls.is_empty() {
                out["tool_calls"] = calls.into();
            }
            vec![out]
        }
        Role::Tool => msg
            .tool_results()
            .into_iter()
            .map(|tr| {
                serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tr.tool_call_id,
                    "content": tr.result.to_string(),
                })
            })
            .collect(),
    }
}

fn parse_openai_response(data: OpenAiChatResponse) -> Result<ProviderResponse, SqlTalkError> {
    let choice = data
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| SqlTalkError::MalformedResponse("No choices in OpenAI response".into()))?;

    let calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| AgentToolCall {
            id: tc.id,
            name: tc.function.name,
            // Unparseable arguments fail schema validation at dispatch.
            arguments: serde_json::from_str(&tc.function.arguments)
                .unwrap_or(serde_json::Value::String(tc.function.arguments)),
        })
        .collect();

    let finish_reason = match choice.finish_reason.as_deref() {
        Some("stop") => Some(FinishReason::Stop),
        Some("length") => Some(FinishReason::Length),
        Some("tool_calls") | Some("function_call") => Some(FinishReason::ToolCalls),
        Some("content_filter") => Some(FinishReason::ContentFilter),
        Some(_) => Some(FinishReason::Error),
        None => None,
    };

    let usage = data
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(ProviderResponse {
        reply: ModelReply::from_parts(choice.message.content.unwrap_or_default(), calls)?,
        usage,
        finish_reason,
    })
}

// Internal OpenAI response types

#[derive(Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
