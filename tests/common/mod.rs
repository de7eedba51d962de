//! Shared test helpers and a scripted mock provider.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use delve::error::DelveError;
use delve::provider::{Backend, ModelProvider, TurnRequest, TurnResponse};
use delve::tools::Tool;
use delve::types::{ContentBlock, StopReason, Usage};

/// A provider that replays queued replies and records every request.
pub struct MockProvider {
    model_id: String,
    caching: bool,
    replies: Mutex<VecDeque<Result<TurnResponse, DelveError>>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl MockProvider {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            caching: false,
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Report prompt-caching support, as the Anthropic adapter does.
    pub fn with_caching(mut self) -> Self {
        self.caching = true;
        self
    }

    /// Queue a text-only reply.
    pub fn queue_text(&self, text: &str) {
        self.queue_blocks(vec![ContentBlock::text(text)]);
    }

    /// Queue a reply with a single tool call.
    pub fn queue_tool_call(&self, id: &str, name: &str, input: serde_json::Value) {
        self.queue_blocks(vec![ContentBlock::tool_use(id, name, input)]);
    }

    /// Queue an arbitrary reply.
    pub fn queue_blocks(&self, content: Vec<ContentBlock>) {
        let stop_reason = if content.iter().any(|b| b.as_tool_use().is_some()) {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };
        self.replies.lock().unwrap().push_back(Ok(TurnResponse {
            content,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 20,
                total_tokens: 30,
                ..Default::default()
            },
            raw_usage: serde_json::json!({"input_tokens": 10, "output_tokens": 20}),
            stop_reason: Some(stop_reason),
        }));
    }

    pub fn queue_error(&self, error: DelveError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn backend(&self) -> Backend {
        Backend::Anthropic
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn supports_prompt_caching(&self) -> bool {
        self.caching
    }

    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, DelveError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(TurnResponse {
                    content: vec![ContentBlock::text("Mock response")],
                    stop_reason: Some(StopReason::EndTurn),
                    ..Default::default()
                })
            })
    }
}

/// Upcast helper for building registries in tests.
pub fn arc_tool(tool: impl Tool + 'static) -> Arc<dyn Tool> {
    Arc::new(tool)
}
