//! Google Gemini API provider.
//!
//! Gemini takes a single `systemInstruction`, calls tools through
//! `functionCall` parts without ids, and identifies results by function name.
//! Ids are generated on the way in and names recovered on the way out.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::DelveError;
use crate::tools::ToolDefinition;
use crate::types::{ContentBlock, Message, Role, StopReason, Usage};

use super::http::{check_status, google_headers};
use super::{Backend, ModelProvider, TurnRequest, TurnResponse};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Schema keywords Gemini's OpenAPI subset accepts.
const ALLOWED_SCHEMA_KEYS: &[&str] = &[
    "type",
    "description",
    "properties",
    "required",
    "items",
    "enum",
    "format",
    "nullable",
];

pub struct GoogleProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl GoogleProvider {
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
        let tool_names: HashMap<&str, &str> = request
            .messages
            .iter()
            .flat_map(|m| m.tool_uses())
            .map(|tu| (tu.id.as_str(), tu.name.as_str()))
            .collect();

        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter_map(|msg| {
                let parts = gemini_parts(msg, &tool_names);
                (!parts.is_empty()).then(|| {
                    serde_json::json!({
                        "role": match msg.role {
                            Role::User => "user",
                            Role::Assistant => "model",
                        },
                        "parts": parts,
                    })
                })
            })
            .collect();

        let mut body = serde_json::json!({ "contents": contents });
        let Some(obj) = body.as_object_mut() else {
            return body;
        };

        if !request.system_prompts.is_empty() {
            let text = request
                .system_prompts
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            obj.insert(
                "systemInstruction".into(),
                serde_json::json!({"parts": [{"text": text}]}),
            );
        }

        if !request.tools.is_empty() {
            let fn_decls: Vec<serde_json::Value> =
                request.tools.iter().map(function_declaration).collect();
            obj.insert(
                "tools".into(),
                serde_json::json!([{"functionDeclarations": fn_decls}]),
            );
        }

        body
    }
}

fn gemini_parts(msg: &Message, tool_names: &HashMap<&str, &str>) -> Vec<serde_json::Value> {
    msg.content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text(t) if t.text.is_empty() => None,
            ContentBlock::Text(t) => Some(serde_json::json!({"text": t.text})),
            ContentBlock::ToolUse(tu) => Some(serde_json::json!({
                "functionCall": {"name": tu.name, "args": tu.input}
            })),
            ContentBlock::ToolResult(r) => {
                let name = tool_names
                    .get(r.tool_use_id.as_str())
                    .copied()
                    .unwrap_or(r.tool_use_id.as_str());
                let response = if r.is_error {
                    serde_json::json!({"error": r.content})
                } else {
                    serde_json::json!({"content": r.content})
                };
                Some(serde_json::json!({
                    "functionResponse": {"name": name, "response": response}
                }))
            }
        })
        .collect()
}

fn function_declaration(tool: &ToolDefinition) -> serde_json::Value {
    let mut decl = serde_json::json!({
        "name": tool.name,
        "description": tool.description,
    });
    let has_properties = tool
        .input_schema
        .get("properties")
        .and_then(|p| p.as_object())
        .is_some_and(|p| !p.is_empty());
    if has_properties {
        if let Some(obj) = decl.as_object_mut() {
            obj.insert("parameters".into(), sanitize_schema(&tool.input_schema));
        }
    }
    decl
}

/// Reduce a JSON schema to the keywords Gemini accepts, recursively.
pub fn sanitize_schema(schema: &serde_json::Value) -> serde_json::Value {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };
    let mut out = serde_json::Map::new();
    for (key, value) in obj {
        if !ALLOWED_SCHEMA_KEYS.contains(&key.as_str()) {
            continue;
        }
        let cleaned = match key.as_str() {
            "properties" => match value.as_object() {
                Some(props) => serde_json::Value::Object(
                    props
                        .iter()
                        .map(|(name, prop)| (name.clone(), sanitize_schema(prop)))
                        .collect(),
                ),
                None => continue,
            },
            "items" => sanitize_schema(value),
            // ["string", "null"] style unions collapse to the first concrete type
            "type" => match value.as_array() {
                Some(types) => match types.iter().find(|t| t.as_str() != Some("null")) {
                    Some(first) => first.clone(),
                    None => continue,
                },
                None => value.clone(),
            },
            _ => value.clone(),
        };
        out.insert(key.clone(), cleaned);
    }
    serde_json::Value::Object(out)
}

/// Whether a tool can be declared to Gemini at all.
pub fn is_declarable(tool: &ToolDefinition) -> bool {
    static NAME: std::sync::OnceLock<Option<regex::Regex>> = std::sync::OnceLock::new();
    let valid_name = NAME
        .get_or_init(|| regex::Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_.\-]{0,63}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(&tool.name));
    let object_schema = tool.input_schema.get("type").and_then(|t| t.as_str()) == Some("object");
    valid_name && object_schema
}

#[async_trait]
impl ModelProvider for GoogleProvider {
    fn backend(&self) -> Backend {
        Backend::Gemini
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, DelveError> {
        let body = self.build_request_body(request);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Google send_turn"
        );

        let resp = self
            .client
            .post(&url)
            .headers(google_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;
        let data: GeminiResponse = check_status(resp).await?.json().await?;

        let candidate = data
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| DelveError::api(200, "No candidates in Gemini response"))?;

        let mut content = Vec::new();
        let mut called_tools = false;
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                content.push(ContentBlock::text(text));
            }
            if let Some(fc) = part.function_call {
                called_tools = true;
                content.push(ContentBlock::tool_use(
                    format!("call_{}", uuid::Uuid::new_v4().simple()),
                    fc.name,
                    fc.args.unwrap_or_else(|| serde_json::json!({})),
                ));
            }
        }

        let stop_reason = match candidate.finish_reason.as_deref() {
            _ if called_tools => Some(StopReason::ToolUse),
            Some("STOP") => Some(StopReason::EndTurn),
            Some("MAX_TOKENS") => Some(StopReason::MaxTokens),
            Some("SAFETY") | Some("RECITATION") | Some("PROHIBITED_CONTENT") => {
                Some(StopReason::ContentFilter)
            }
            _ => None,
        };

        let usage: GeminiUsage =
            serde_json::from_value(data.usage_metadata.clone()).unwrap_or_default();
        Ok(TurnResponse {
            content,
            usage: Usage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
                cache_read_tokens: usage.cached_content_token_count,
                cache_creation_tokens: None,
            },
            raw_usage: data.usage_metadata,
            stop_reason,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: serde_json::Value,
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

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
    cached_content_token_count: Option<u32>,
}
