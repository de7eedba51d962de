//! OpenAI Chat Completions API provider.
//!
//! Chat Completions returns tool calls out-of-band (a `tool_calls` list beside
//! the text), and expects tool results as separate `tool` role messages. Both
//! directions are converted here.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::DelveError;
use crate::types::{ContentBlock, Message, Role, StopReason, Usage};

use super::http::{bearer_headers, check_status};
use super::{Backend, ModelProvider, TurnRequest, TurnResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(
        client: reqwest::Client,
        model: String,
        api_key: String,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn build_request_body(&self, request: &TurnRequest) -> serde_json::Value {
        let mut messages: Vec<serde_json::Value> = request
            .system_prompts
            .iter()
            .map(|s| serde_json::json!({"role": "system", "content": s.text}))
            .collect();
        for msg in &request.messages {
            messages.extend(message_to_openai(msg));
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

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
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
            if let Some(obj) = body.as_object_mut() {
                obj.insert("tools".into(), tool_defs.into());
            }
        }

        body
    }
}

/// One generic message may become several Chat Completions messages: tool
/// results each become their own `tool` message, ahead of any user text.
fn message_to_openai(msg: &Message) -> Vec<serde_json::Value> {
    match msg.role {
        Role::User => {
            let mut out = Vec::new();
            let mut text = String::new();
            for block in &msg.content {
                match block {
                    ContentBlock::Text(t) => text.push_str(&t.text),
                    ContentBlock::ToolResult(r) => {
                        let content = if r.is_error {
                            format!("Error: {}", r.content)
                        } else {
                            r.content.clone()
                        };
                        out.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": r.tool_use_id,
                            "content": content,
                        }));
                    }
                    ContentBlock::ToolUse(_) => {}
                }
            }
            if !text.is_empty() {
                out.push(serde_json::json!({"role": "user", "content": text}));
            }
            out
        }
        Role::Assistant => {
            let text = msg.text();
            let tool_calls: Vec<serde_json::Value> = msg
                .tool_uses()
                .into_iter()
                .map(|tu| {
                    serde_json::json!({
                        "id": tu.id,
                        "type": "function",
                        "function": {
                            "name": tu.name,
                            "arguments": tu.input.to_string(),
                        }
                    })
                })
                .collect();

            let mut out = serde_json::json!({
                "role": "assistant",
                "content": if text.is_empty() { serde_json::Value::Null } else { text.into() },
            });
            if !tool_calls.is_empty() {
                if let Some(obj) = out.as_object_mut() {
                    obj.insert("tool_calls".into(), tool_calls.into());
                }
            }
            vec![out]
        }
    }
}

/// Parse a function call's argument string. Empty means no arguments.
fn parse_arguments(name: &str, raw: &str) -> Result<serde_json::Value, DelveError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw).map_err(|e| {
        DelveError::provider(
            "openai",
            format!("tool call '{name}' has malformed JSON arguments: {e}"),
        )
    })
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn backend(&self) -> Backend {
        Backend::OpenAi
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, DelveError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "OpenAI send_turn"
        );

        let resp = self
            .client
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;
        let data: OpenAiResponse = check_status(resp).await?.json().await?;

        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DelveError::api(200, "No choices in OpenAI response"))?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
            content.push(ContentBlock::text(text));
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let input = parse_arguments(&call.function.name, &call.function.arguments)?;
            content.push(ContentBlock::tool_use(call.id, call.function.name, input));
        }

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("stop") => Some(StopReason::EndTurn),
            Some("length") => Some(StopReason::MaxTokens),
            Some("tool_calls") | Some("function_call") => Some(StopReason::ToolUse),
            Some("content_filter") => Some(StopReason::ContentFilter),
            _ => None,
        };

        let usage: OpenAiUsage = serde_json::from_value(data.usage.clone()).unwrap_or_default();
        Ok(TurnResponse {
            content,
            usage: Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                cache_read_tokens: usage.prompt_tokens_details.and_then(|d| d.cached_tokens),
                cache_creation_tokens: None,
            },
            raw_usage: data.usage,
            stop_reason,
        })
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: serde_json::Value,
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
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Deserialize)]
struct PromptTokensDetails {
    cached_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDefinition;
    use crate::types::{SystemPromptSegment, ToolResultBlock};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: Option<String>) -> OpenAiProvider {
        OpenAiProvider::new(reqwest::Client::new(), "gpt-test".into(), "sk-test".into(), base_url)
    }

    fn tool_round_trip() -> TurnRequest {
        TurnRequest {
            messages: vec![
                Message::user("list files in src"),
                Message {
                    role: Role::Assistant,
                    content: vec![
                        ContentBlock::text("Checking."),
                        ContentBlock::tool_use("call_1", "list_dir", json!({"relative_workspace_path": "src"})),
                        ContentBlock::tool_use("call_2", "read_file", json!({"relative_workspace_path": "x"})),
                    ],
                },
                Message::tool_results(vec![
                    ToolResultBlock::success("call_1", "main.rs\n"),
                    ToolResultBlock::error("call_2", "no such file"),
                ]),
            ],
            system_prompts: vec![
                SystemPromptSegment::new("base prompt"),
                SystemPromptSegment::new("extra context"),
            ],
            tools: vec![ToolDefinition {
                name: "list_dir".into(),
                description: "List".into(),
                input_schema: json!({"type": "object"}),
            }],
        }
    }

    #[test]
    fn request_body_flattens_system_and_tool_results() {
        let body = provider(None).build_request_body(&tool_round_trip());
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "system", "user", "assistant", "tool", "tool"]);

        let assistant = &body["messages"][3];
        assert_eq!(assistant["content"], "Checking.");
        assert_eq!(assistant["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            r#"{"relative_workspace_path":"src"}"#
        );
        assert_eq!(body["messages"][4]["tool_call_id"], "call_1");
        assert_eq!(body["messages"][5]["content"], "Error: no such file");
        assert_eq!(body["tools"][0]["function"]["name"], "list_dir");
    }

    #[tokio::test]
    async fn out_of_band_tool_calls_follow_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "Looking now.",
                        "tool_calls": [
                            {"id": "call_a", "type": "function", "function": {"name": "list_dir", "arguments": "{\"relative_workspace_path\":\"src\"}"}},
                            {"id": "call_b", "type": "function", "function": {"name": "grep_search", "arguments": ""}}
                        ]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 50, "completion_tokens": 10, "total_tokens": 60,
                          "prompt_tokens_details": {"cached_tokens": 32}}
            })))
            .mount(&server)
            .await;

        let response = provider(Some(server.uri())).send_turn(&tool_round_trip()).await.unwrap();
        assert_eq!(
            response.content,
            vec![
                ContentBlock::text("Looking now."),
                ContentBlock::tool_use("call_a", "list_dir", json!({"relative_workspace_path": "src"})),
                ContentBlock::tool_use("call_b", "grep_search", json!({})),
            ]
        );
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.total_tokens, 60);
        assert_eq!(response.usage.cache_read_tokens, Some(32));
    }

    #[tokio::test]
    async fn malformed_arguments_are_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"content": null, "tool_calls": [
                        {"id": "c", "type": "function", "function": {"name": "list_dir", "arguments": "{not json"}}
                    ]},
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let err = provider(Some(server.uri())).send_turn(&tool_round_trip()).await.unwrap_err();
        assert!(matches!(err, DelveError::Provider { .. }));
    }

    #[tokio::test]
    async fn rate_limit_status_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let err = provider(Some(server.uri())).send_turn(&tool_round_trip()).await.unwrap_err();
        assert!(matches!(err, DelveError::RateLimited { retry_after_ms: Some(2000) }));
        assert!(err.is_retryable());
    }
}
