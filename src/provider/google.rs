//! Google Gemini API provider (`generateContent` with function calling).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::SqlTalkError;
use crate::tools::ToolDeclaration;
use crate::types::*;

use super::http::{google_headers, shared_client, status_to_error};
use super::{ModelProvider, ModelReply, ProviderRequest, ProviderResponse};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleProvider {
    model_id: String,
    api_key: String,
    base_url: String,
}

impl GoogleProvider {
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
        let contents =
            merge_function_responses(request.messages.iter().filter_map(message_to_gemini));

        let mut body = serde_json::json!({ "contents": contents });

        if let Some(ref system) = request.system {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
        }

        let mut gen_config = serde_json::Map::new();
        if let Some(max) = request.settings.max_tokens {
            gen_config.insert("maxOutputTokens".into(), max.into());
        }
        if let Some(temp) = request.settings.temperature {
            gen_config.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = request.settings.top_p {
            gen_config.insert("topP".into(), top_p.into());
        }
        if !gen_config.is_empty() {
            body["generationConfig"] = serde_json::Value::Object(gen_config);
        }

        if !request.tools.is_empty() {
            let fn_decls: Vec<serde_json::Value> =
                request.tools.iter().map(declaration_to_gemini).collect();
            body["tools"] = serde_json::json!([{ "functionDeclarations": fn_decls }]);
        }

        body
    }
}

#[async_trait]
impl ModelProvider for GoogleProvider {
    fn provider_name(&self) -> &str {
        "google"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, SqlTalkError> {
        let body = self.build_request_body(request);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model_id);

        debug!(
            model = %self.model_id,
            messages = request.messages.len(),
            "Google generateContent"
        );

        let resp = shared_client()
            .post(&url)
            .headers(google_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let body_text = resp.text().await?;
        let data: GeminiResponse = serde_json::from_str(&body_text).map_err(|e| {
            SqlTalkError::MalformedResponse(format!("undecodable Gemini response: {e}"))
        })?;
        parse_gemini_response(data)
    }
}

fn message_to_gemini(msg: &ModelMessage) -> Option<serde_json::Value> {
    let (role, parts): (&str, Vec<serde_json::Value>) = match msg.role {
        Role::User => (
            "user",
            msg.content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(serde_json::json!({ "text": text })),
                    _ => None,
                })
                .collect(),
        ),
        Role::Assistant => (
            "model",
            msg.content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(serde_json::json!({ "text": text })),
                    ContentPart::ToolCall(call) => Some(serde_json::json!({
                        "functionCall": { "name": call.name, "args": call.arguments }
                    })),
                    ContentPart::ToolResult(_) => None,
                })
                .collect(),
        ),
        Role::Tool => (
            "function",
            msg.tool_results()
                .into_iter()
                .map(|tr| {
                    serde_json::json!({
                        "functionResponse": { "name": tr.tool_name, "response": tr.result }
                    })
                })
                .collect(),
        ),
    };
    (!parts.is_empty()).then(|| serde_json::json!({ "role": role, "parts": parts }))
}

/// History keeps one tool message per dispatched call, but Gemini wants
/// every response to a model entry in a single `function` entry, one part
/// per `functionCall`.
fn merge_function_responses(
    entries: impl Iterator<Item = serde_json::Value>,
) -> Vec<serde_json::Value> {
    let mut merged: Vec<serde_json::Value> = Vec::new();
    for entry in entries {
        if entry["role"] == "function" {
            if let Some(last) = merged.last_mut().filter(|last| last["role"] == "function") {
                if let (Some(parts), Some(more)) =
                    (last["parts"].as_array_mut(), entry["parts"].as_array())
                {
                    parts.extend(more.iter().cloned());
                    continue;
                }
            }
        }
        merged.push(entry);
    }
    merged
}

/// Gemini rejects OBJECT schemas with an empty `properties` map, so
/// parameterless tools are declared without a schema.
fn declaration_to_gemini(decl: &ToolDeclaration) -> serde_json::Value {
    let has_properties = decl
        .parameters
        .get("properties")
        .and_then(|p| p.as_object())
        .is_some_and(|p| !p.is_empty());
    if has_properties {
        serde_json::json!({
            "name": decl.name,
            "description": decl.description,
            "parameters": decl.parameters,
        })
    } else {
        serde_json::json!({ "name": decl.name, "description": decl.description })
    }
}

fn parse_gemini_response(data: GeminiResponse) -> Result<ProviderResponse, SqlTalkError> {
    let candidate = data.candidates.into_iter().next().ok_or_else(|| {
        let reason = data
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".to_string());
        SqlTalkError::MalformedResponse(format!("Gemini returned no candidates ({reason})"))
    })?;

    let mut text = String::new();
    let mut calls = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(fc) = part.function_call {
            calls.push(AgentToolCall {
                id: uuid::Uuid::new_v4().to_string(),
                name: fc.name,
                arguments: fc
                    .args
                    .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            });
        }
    }

    let finish_reason = match candidate.finish_reason.as_deref() {
        Some("STOP") if !calls.is_empty() => Some(FinishReason::ToolCalls),
        Some("STOP") => Some(FinishReason::Stop),
        Some("MAX_TOKENS") => Some(FinishReason::Length),
        Some("SAFETY") | Some("RECITATION") => Some(FinishReason::ContentFilter),
        Some(_) => Some(FinishReason::Error),
        None => None,
    };

    let usage = data
        .usage_metadata
        .map(|u| Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default();

    Ok(ProviderResponse {
        reply: ModelReply::from_parts(text, calls)?,
        usage,
        finish_reason,
    })
}

// Internal Gemini response types

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolCatalog;
    use serde_json::json;

    fn provider() -> GoogleProvider {
        GoogleProvider::new("gemini-1.5-pro".into(), "key".into(), None)
    }

    #[test]
    fn tool_exchange_is_encoded_as_function_parts() {
        let call = AgentToolCall {
            id: "c1".into(),
            name: "sql_query".into(),
            arguments: json!({"query": "SELECT 1"}),
        };
        let request = ProviderRequest {
            system: Some("Only use information from SQLite.".into()),
            messages: vec![
                ModelMessage::user("How many albums?"),
                ModelMessage::assistant_tool_calls(None, std::slice::from_ref(&call)),
                ModelMessage::tool_result("c1", "sql_query", json!({"content": [{"1": 1}]}), false),
            ],
            tools: ToolCatalog::new().declarations().to_vec(),
            settings: GenerationSettings::builder().temperature(0.0).build(),
        };

        let body = provider().build_request_body(&request);

        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "Only use information from SQLite."
        );
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["contents"][1]["parts"][0]["functionCall"],
            json!({"name": "sql_query", "args": {"query": "SELECT 1"}})
        );
        assert_eq!(body["contents"][2]["role"], "function");
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["name"],
            "sql_query"
        );
        assert_eq!(body["generationConfig"]["temperature"], json!(0.0));
    }

    #[test]
    fn responses_to_one_reply_share_a_function_entry() {
        let calls = vec![
            AgentToolCall {
                id: "c1".into(),
                name: "get_table".into(),
                arguments: json!({"table_name": "Artist"}),
            },
            AgentToolCall {
                id: "c2".into(),
                name: "get_table".into(),
                arguments: json!({"table_name": "Album"}),
            },
        ];
        let request = ProviderRequest {
            messages: vec![
                ModelMessage::user("Describe Artist and Album"),
                ModelMessage::assistant_tool_calls(None, &calls),
                ModelMessage::tool_result("c1", "get_table", json!({"content": []}), false),
                ModelMessage::tool_result("c2", "get_table", json!({"content": []}), false),
                ModelMessage::assistant("Both tables are empty."),
                ModelMessage::user("And Track?"),
                ModelMessage::assistant_tool_calls(None, &calls[..1]),
                ModelMessage::tool_result("c1", "get_table", json!({"content": []}), false),
            ],
            ..Default::default()
        };

        let body = provider().build_request_body(&request);
        let contents = body["contents"].as_array().unwrap();
        let roles: Vec<&str> = contents.iter().map(|c| c["role"].as_str().unwrap()).collect();
        assert_eq!(
            roles,
            vec!["user", "model", "function", "model", "user", "model", "function"]
        );

        let call_parts = contents[1]["parts"].as_array().unwrap().len();
        let response_parts = contents[2]["parts"].as_array().unwrap();
        assert_eq!(call_parts, response_parts.len());
        assert_eq!(response_parts[1]["functionResponse"]["name"], "get_table");
        assert_eq!(contents[6]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn parameterless_tools_omit_the_schema() {
        let request = ProviderRequest {
            tools: ToolCatalog::new().declarations().to_vec(),
            ..Default::default()
        };
        let body = provider().build_request_body(&request);
        let decls = &body["tools"][0]["functionDeclarations"];
        assert_eq!(decls[0]["name"], "list_tables");
        assert!(decls[0].get("parameters").is_none());
        assert_eq!(decls[2]["parameters"]["required"], json!(["query"]));
    }

    #[test]
    fn function_call_part_becomes_tool_call_reply() {
        let data: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "list_tables", "args": {}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3, "totalTokenCount": 15}
        }))
        .unwrap();

        let response = parse_gemini_response(data).unwrap();
        match response.reply {
            ModelReply::ToolCalls { text, calls } => {
                assert!(text.is_none());
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "list_tables");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn blocked_prompt_is_malformed() {
        let data: GeminiResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        let err = parse_gemini_response(data).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }
}
