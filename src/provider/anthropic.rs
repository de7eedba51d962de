//! Anthropic Messages API provider.
//!
//! The generic content-block model mirrors Anthropic's own, so blocks (and
//! their `cache_control` markers) pass through with little reshaping.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::DelveError;
use crate::types::{ContentBlock, Message, Role, StopReason, SystemPromptSegment, Usage};

use super::http::{anthropic_headers, check_status};
use super::{Backend, ModelProvider, TurnRequest, TurnResponse};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

/// Beta flag enabling the compact tool-use encoding.
const TOKEN_EFFICIENT_TOOLS: &str = "token-efficient-tools-2025-02-19";
/// Stands in for a message whose only content was empty text, which the API rejects.
const EMPTY_MESSAGE_PLACEHOLDER: &str = "(empty)";

pub struct AnthropicProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    token_efficient: bool,
}

impl AnthropicProvider {
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
            token_efficient: false,
        }
    }

    /// Opt in to token-efficient tool use.
    pub fn with_token_efficient_tools(mut self, enabled: bool) -> Self {
        self.token_efficient = enabled;
        self
    }

    fn build_headers(&self) -> reqwest::header::HeaderMap {
        let beta = self.token_efficient.then_some(TOKEN_EFFICIENT_TOOLS);
        anthropic_headers(&self.api_key, API_VERSION, beta)
    }

    fn build_request_body(&self, request: &TurnRequest) -> Result<serde_json::Value, DelveError> {
        let system = request
            .system_prompts
            .iter()
            .map(system_block)
            .collect::<Vec<_>>();

        let mut messages = Vec::with_capacity(request.messages.len());
        for msg in &request.messages {
            let content = anthropic_content(msg)?;
            messages.push(serde_json::json!({
                "role": match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": content,
            }));
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": messages,
        });
        if let Some(obj) = body.as_object_mut() {
            if !system.is_empty() {
                obj.insert("system".into(), system.into());
            }
            if !request.tools.is_empty() {
                let tools: Vec<serde_json::Value> = request
                    .tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.input_schema,
                        })
                    })
                    .collect();
                obj.insert("tools".into(), tools.into());
            }
        }
        Ok(body)
    }
}

fn system_block(segment: &SystemPromptSegment) -> serde_json::Value {
    let mut block = serde_json::json!({"type": "text", "text": segment.text});
    if let (Some(marker), Some(obj)) = (segment.cache_control, block.as_object_mut()) {
        obj.insert("cache_control".into(), serde_json::json!(marker));
    }
    block
}

/// Serialize a message's blocks, dropping empty text blocks the API rejects.
/// Empty text blocks are dropped. A marker they carried moves to the last kept
/// block, and a message left with nothing gets a placeholder so turns still alternate.
fn anthropic_content(msg: &Message) -> Result<Vec<serde_json::Value>, DelveError> {
    let mut kept = Vec::with_capacity(msg.content.len());
    let mut orphaned_marker = None;
    for block in &msg.content {
        match block {
            ContentBlock::Text(t) if t.text.is_empty() => {
                orphaned_marker = orphaned_marker.or(t.cache_control);
            }
            other => kept.push(other.clone()),
        }
    }
    if kept.is_empty() {
        kept.push(ContentBlock::text(EMPTY_MESSAGE_PLACEHOLDER));
    }
    if let (Some(marker), Some(last)) = (orphaned_marker, kept.last_mut()) {
        if last.cache_control().is_none() {
            last.set_cache_control(Some(marker));
        }
    }
    kept.iter()
        .map(|block| serde_json::to_value(block).map_err(DelveError::from))
        .collect()
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn backend(&self) -> Backend {
        Backend::Anthropic
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn supports_prompt_caching(&self) -> bool {
        true
    }

    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, DelveError> {
        let body = self.build_request_body(request)?;
        let url = format!("{}/messages", self.base_url);

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            token_efficient = self.token_efficient,
            "Anthropic send_turn"
        );

        let resp = self
            .client
            .post(&url)
            .headers(self.build_headers())
            .json(&body)
            .send()
            .await?;
        let data: AnthropicResponse = check_status(resp).await?.json().await?;

        let mut content = Vec::with_capacity(data.content.len());
        for block in data.content {
            match block {
                AnthropicBlock::Text { text } => content.push(ContentBlock::text(text)),
                AnthropicBlock::ToolUse { id, name, input } => {
                    content.push(ContentBlock::tool_use(id, name, input))
                }
                AnthropicBlock::Other => {}
            }
        }

        let stop_reason = match data.stop_reason.as_deref() {
            Some("end_turn") => Some(StopReason::EndTurn),
            Some("max_tokens") => Some(StopReason::MaxTokens),
            Some("tool_use") => Some(StopReason::ToolUse),
            Some("stop_sequence") => Some(StopReason::StopSequence),
            Some("refusal") => Some(StopReason::ContentFilter),
            _ => None,
        };

        let usage: AnthropicUsage = serde_json::from_value(data.usage.clone()).unwrap_or_default();
        Ok(TurnResponse {
            content,
            usage: Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                total_tokens: usage.input_tokens + usage.output_tokens,
                cache_read_tokens: usage.cache_read_input_tokens,
                cache_creation_tokens: usage.cache_creation_input_tokens,
            },
            raw_usage: data.usage,
            stop_reason,
        })
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}
