//! Model provider trait and backend adapters.
//!
//! Each adapter translates the engine's generic messages, system-prompt
//! segments, and tool definitions into one backend's wire format and parses
//! the reply back into [`ContentBlock`]s.

pub mod anthropic;
pub mod google;
pub mod http;
pub mod openai;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use strum::{Display, EnumString};

use crate::config::DelveConfig;
use crate::error::DelveError;
use crate::tools::ToolDefinition;
use crate::types::{ContentBlock, Message, StopReason, SystemPromptSegment, Usage};
use crate::util::retry::RetryPolicy;

/// Supported model backends. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Backend {
    Anthropic,
    OpenAi,
    #[strum(to_string = "gemini", serialize = "google")]
    Gemini,
}

impl Backend {
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-5",
            Self::OpenAi => "gpt-4.1",
            Self::Gemini => "gemini-2.5-pro",
        }
    }

    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// One turn's worth of input for a provider.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub messages: Vec<Message>,
    pub system_prompts: Vec<SystemPromptSegment>,
    pub tools: Vec<ToolDefinition>,
}

/// A provider's reply, normalized to generic content blocks.
#[derive(Debug, Clone, Default)]
pub struct TurnResponse {
    /// Text and tool-use blocks in the order the model produced them.
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
    /// The backend's usage object, untouched.
    pub raw_usage: serde_json::Value,
    pub stop_reason: Option<StopReason>,
}

/// Core trait implemented by all model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn backend(&self) -> Backend;

    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Whether cache-boundary markers in the request reduce cost.
    fn supports_prompt_caching(&self) -> bool {
        false
    }

    /// Send one turn and wait for the complete reply.
    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, DelveError>;
}

/// Create the provider selected by `config`.
pub fn create_provider(config: &DelveConfig) -> Result<Arc<dyn ModelProvider>, DelveError> {
    let backend = config.backend;
    let api_key = config
        .api_key(backend)
        .ok_or_else(|| DelveError::Authentication(format!("Missing {}", backend.api_key_env())))?
        .to_string();
    let client = http::build_client(config.request_timeout)?;
    let model = config.model_id().to_string();
    let base_url = config.base_url(backend).map(str::to_string);

    let provider: Arc<dyn ModelProvider> = match backend {
        Backend::Anthropic => Arc::new(
            anthropic::AnthropicProvider::new(client, model, api_key, base_url)
                .with_token_efficient_tools(config.token_efficient),
        ),
        Backend::OpenAi => Arc::new(openai::OpenAiProvider::new(client, model, api_key, base_url)),
        Backend::Gemini => Arc::new(google::GoogleProvider::new(client, model, api_key, base_url)),
    };

    if config.retry_attempts > 1 {
        Ok(Arc::new(retry::RetryingProvider::new(
            provider,
            RetryPolicy::with_max_attempts(config.retry_attempts),
        )))
    } else {
        Ok(provider)
    }
}
