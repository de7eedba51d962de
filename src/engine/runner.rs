//! The conversation loop.

use std::sync::Arc;

use bon::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{EngineEvent, EventEmitter, EventSink};
use crate::cache::{annotate_system, CacheAnnotator};
use crate::error::DelveError;
use crate::provider::{ModelProvider, TurnRequest};
use crate::session::Session;
use crate::tools::{ToolArguments, ToolExecutionContext, ToolRegistry};
use crate::types::{
    ContentBlock, Message, Role, SystemPromptSegment, ToolResultBlock, ToolUseBlock, Usage,
};

pub const DEFAULT_MAX_TURNS: usize = 50;

/// Loop settings.
#[derive(Debug, Clone, Builder)]
pub struct EngineConfig {
    /// Provider calls allowed in one run.
    #[builder(default = DEFAULT_MAX_TURNS)]
    pub max_turns: usize,
    /// Annotate requests with cache markers when the provider supports them.
    #[builder(default = true)]
    pub prompt_caching: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            prompt_caching: true,
        }
    }
}

/// What a caller hands to [`Engine::run`].
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    pub prompt: String,
    /// Appended as system-prompt segments, in order.
    pub extra_context: Vec<String>,
    /// Session to resume.
    pub prior: Option<Session>,
}

impl RunInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.extra_context.push(context.into());
        self
    }

    pub fn with_prior(mut self, prior: Option<Session>) -> Self {
        self.prior = prior;
        self
    }
}

/// A finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub session: Session,
    pub usage: Usage,
    pub turns: usize,
}

impl RunOutcome {
    /// Text of the final assistant message.
    pub fn answer(&self) -> String {
        self.session.last_answer().unwrap_or_default()
    }
}

/// Drives one prompt through as many model turns as the tools require.
pub struct Engine {
    provider: Arc<dyn ModelProvider>,
    registry: ToolRegistry,
    base_prompt: String,
    config: EngineConfig,
    events: EventEmitter,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: ToolRegistry,
        base_prompt: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            base_prompt: base_prompt.into(),
            config,
            events: EventEmitter::default(),
        }
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.events = EventEmitter::new(Some(sink));
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run until the model answers without calling a tool.
    ///
    /// Tool failures are fed back to the model. An unregistered tool name,
    /// a provider failure, the turn bound, or cancellation end the run.
    pub async fn run(
        &self,
        input: RunInput,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, DelveError> {
        let (mut messages, mut system_prompts) = match input.prior {
            Some(prior) => {
                let prior = prior.without_cache_markers();
                (prior.messages, prior.system_prompts)
            }
            None => (Vec::new(), vec![SystemPromptSegment::new(&self.base_prompt)]),
        };
        system_prompts.extend(input.extra_context.into_iter().map(SystemPromptSegment::new));
        messages.push(Message::user(input.prompt));

        let caching = self.config.prompt_caching && self.provider.supports_prompt_caching();
        let mut annotator = caching.then(|| CacheAnnotator::new(&messages));
        let tools = self.registry.declarations(self.provider.backend());
        let mut usage = Usage::default();
        let mut turn = 0usize;

        debug!(
            backend = %self.provider.backend(),
            model = self.provider.model_id(),
            tools = tools.len(),
            history = messages.len(),
            caching,
            "run start"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(DelveError::Cancelled);
            }
            if turn >= self.config.max_turns {
                return Err(DelveError::MaxTurnsExceeded(self.config.max_turns));
            }
            turn += 1;

            let request = TurnRequest {
                messages: match annotator.as_mut() {
                    Some(annotator) => annotator.annotate().to_vec(),
                    None => messages.clone(),
                },
                system_prompts: if caching {
                    annotate_system(&system_prompts)
                } else {
                    system_prompts.clone()
                },
                tools: tools.clone(),
            };

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DelveError::Cancelled),
                response = self.provider.send_turn(&request) => response?,
            };
            usage.merge(&response.usage);

            let assistant = Message {
                role: Role::Assistant,
                content: response.content,
            };
            messages.push(assistant.clone());
            if let Some(annotator) = annotator.as_mut() {
                annotator.push(assistant.clone());
            }

            let mut results = Vec::new();
            for block in &assistant.content {
                match block {
                    ContentBlock::Text(text) if !text.text.is_empty() => {
                        self.events.emit(EngineEvent::Text(text.text.clone()));
                    }
                    ContentBlock::ToolUse(tool_use) => {
                        let result = self.dispatch(tool_use, &mut system_prompts, cancel).await?;
                        results.push(result);
                    }
                    _ => {}
                }
            }

            info!(turn, tool_calls = results.len(), stop_reason = ?response.stop_reason, "turn complete");
            self.events.emit(EngineEvent::TurnCompleted {
                turn,
                usage: response.usage.clone(),
            });

            if results.is_empty() {
                return Ok(RunOutcome {
                    session: Session {
                        messages,
                        system_prompts,
                    },
                    usage,
                    turns: turn,
                });
            }

            let tool_message = Message::tool_results(results);
            messages.push(tool_message.clone());
            if let Some(annotator) = annotator.as_mut() {
                annotator.push(tool_message);
            }
        }
    }

    /// Run one tool-use block. Only an unknown tool or cancellation is an error.
    async fn dispatch(
        &self,
        tool_use: &ToolUseBlock,
        system_prompts: &mut Vec<SystemPromptSegment>,
        cancel: &CancellationToken,
    ) -> Result<ToolResultBlock, DelveError> {
        let tool = self.registry.lookup(&tool_use.name)?.clone();
        let args = ToolArguments::new(tool_use.input.clone());

        let description = tool.describe_invocation(&args);
        info!(tool = %tool_use.name, id = %tool_use.id, "{description}");
        self.events.emit(EngineEvent::ToolInvocation {
            name: tool_use.name.clone(),
            description,
        });

        let ctx = ToolExecutionContext {
            tool_use_id: Some(tool_use.id.clone()),
        };
        let outcome = match tool.check_params(&args) {
            Ok(()) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DelveError::Cancelled),
                outcome = tool.invoke(&args, &ctx) => outcome,
            },
            Err(err) => Err(err),
        };

        match outcome {
            Ok(output) => {
                if let Some(system) = output.system {
                    system_prompts.push(SystemPromptSegment::new(system));
                    self.events.emit(EngineEvent::SystemContextAdded {
                        tool: tool_use.name.clone(),
                    });
                }
                Ok(ToolResultBlock::success(&tool_use.id, output.content))
            }
            Err(err) => {
                let message = err.to_string();
                warn!(tool = %tool_use.name, error = %message, "tool failed");
                self.events.emit(EngineEvent::ToolFailed {
                    name: tool_use.name.clone(),
                    message: message.clone(),
                });
                Ok(ToolResultBlock::error(&tool_use.id, message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Backend, TurnResponse};
    use crate::tools::{FnTool, ToolOutput, ToolParameters};
    use crate::types::{CacheControl, StopReason};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        caching: bool,
        replies: Mutex<VecDeque<Vec<ContentBlock>>>,
        requests: Mutex<Vec<TurnRequest>>,
    }

    impl Scripted {
        fn new(caching: bool, replies: Vec<Vec<ContentBlock>>) -> Arc<Self> {
            Arc::new(Self {
                caching,
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelProvider for Scripted {
        fn backend(&self) -> Backend {
            Backend::Anthropic
        }

        fn model_id(&self) -> &str {
            "scripted"
        }

        fn supports_prompt_caching(&self) -> bool {
            self.caching
        }

        async fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, DelveError> {
            self.requests.lock().unwrap().push(request.clone());
            let content = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| vec![ContentBlock::text("done")]);
            Ok(TurnResponse {
                content,
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 2,
                    total_tokens: 12,
                    ..Default::default()
                },
                raw_usage: serde_json::Value::Null,
                stop_reason: Some(StopReason::EndTurn),
            })
        }
    }

    fn echo_registry() -> ToolRegistry {
        let echo = FnTool::new(
            "echo",
            "Echo text",
            ToolParameters::object().string("text", "Text", true).build(),
            |args, _ctx| async move {
                let text = args.get_str("text")?.to_string();
                Ok(ToolOutput::text(text.clone()).with_system(format!("echoed {text}")))
            },
        );
        ToolRegistry::from_tools([Arc::new(echo) as Arc<dyn crate::tools::Tool>])
    }

    fn echo_call(id: &str, text: &str) -> ContentBlock {
        ContentBlock::tool_use(id, "echo", json!({ "text": text }))
    }

    fn engine(provider: Arc<Scripted>, config: EngineConfig) -> Engine {
        Engine::new(provider, echo_registry(), "base", config)
    }

    #[tokio::test]
    async fn text_only_reply_ends_after_one_turn() {
        let provider = Scripted::new(false, vec![vec![ContentBlock::text("hello")]]);
        let outcome = engine(provider.clone(), EngineConfig::default())
            .run(RunInput::new("hi"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.answer(), "hello");
        assert_eq!(
            outcome.session.messages,
            vec![Message::user("hi"), Message::assistant("hello")]
        );
        assert_eq!(outcome.usage.total_tokens, 12);
    }

    #[tokio::test]
    async fn tool_results_share_one_user_message_and_keep_order() {
        let provider = Scripted::new(
            false,
            vec![vec![
                ContentBlock::text("checking"),
                echo_call("a", "one"),
                echo_call("b", "two"),
            ]],
        );
        let outcome = engine(provider.clone(), EngineConfig::default())
            .run(RunInput::new("go"), &CancellationToken::new())
            .await
            .unwrap();

        let messages = &outcome.session.messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(
            messages[2],
            Message::tool_results(vec![
                ToolResultBlock::success("a", "one"),
                ToolResultBlock::success("b", "two"),
            ])
        );
        let system: Vec<_> = outcome.session.system_prompts.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(system, vec!["base", "echoed one", "echoed two"]);

        // second request already carries the appended segments
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[1].system_prompts.len(), 3);
        assert_eq!(requests[1].tools.len(), 1);
    }

    #[tokio::test]
    async fn rejected_params_are_fed_back_as_errors() {
        let provider = Scripted::new(
            false,
            vec![vec![ContentBlock::tool_use("x", "echo", json!({ "text": 5 }))]],
        );
        let outcome = engine(provider, EngineConfig::default())
            .run(RunInput::new("go"), &CancellationToken::new())
            .await
            .unwrap();

        let ContentBlock::ToolResult(result) = &outcome.session.messages[2].content[0] else {
            panic!("expected tool result");
        };
        assert!(result.is_error);
        assert!(result.content.contains("'text'"));
        assert_eq!(outcome.turns, 2);
    }

    #[tokio::test]
    async fn unknown_tool_is_fatal() {
        let provider = Scripted::new(
            false,
            vec![vec![ContentBlock::tool_use("x", "rm_rf", json!({}))]],
        );
        let err = engine(provider, EngineConfig::default())
            .run(RunInput::new("go"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DelveError::ToolNotFound(name) if name == "rm_rf"));
    }

    #[tokio::test]
    async fn turn_bound_is_enforced() {
        let provider = Scripted::new(
            false,
            (0..5).map(|i| vec![echo_call(&format!("t{i}"), "again")]).collect(),
        );
        let config = EngineConfig::builder().max_turns(3).build();
        let err = engine(provider.clone(), config)
            .run(RunInput::new("loop"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DelveError::MaxTurnsExceeded(3)));
        assert_eq!(provider.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_turn() {
        let provider = Scripted::new(false, vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine(provider.clone(), EngineConfig::default())
            .run(RunInput::new("hi"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DelveError::Cancelled));
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_appends_to_prior_session_and_context() {
        let mut prior = Session::new("prior base");
        prior.messages = vec![Message::user("first"), Message::assistant("answer")];
        let provider = Scripted::new(false, vec![vec![ContentBlock::text("second answer")]]);

        let outcome = engine(provider, EngineConfig::default())
            .run(
                RunInput::new("follow up")
                    .with_prior(Some(prior))
                    .with_context("ctx one")
                    .with_context("ctx two"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let system: Vec<_> = outcome.session.system_prompts.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(system, vec!["prior base", "ctx one", "ctx two"]);
        assert_eq!(outcome.session.messages.len(), 4);
        assert_eq!(outcome.session.messages[2], Message::user("follow up"));
    }

    #[tokio::test]
    async fn caching_marks_requests_but_not_history() {
        let big = "word ".repeat(2000);
        let provider = Scripted::new(true, vec![vec![echo_call("a", "x")]]);
        let outcome = engine(provider.clone(), EngineConfig::default())
            .run(RunInput::new(big), &CancellationToken::new())
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        let first = &requests[0];
        assert_eq!(
            first.system_prompts.last().unwrap().cache_control,
            Some(CacheControl::Ephemeral)
        );
        assert_eq!(
            first.messages[0].content[0].cache_control(),
            Some(CacheControl::Ephemeral)
        );
        for message in &outcome.session.messages {
            assert!(message.content.iter().all(|b| b.cache_control().is_none()));
        }
        assert!(outcome
            .session
            .system_prompts
            .iter()
            .all(|s| s.cache_control.is_none()));
    }

    #[tokio::test]
    async fn caching_disabled_sends_plain_requests() {
        let provider = Scripted::new(true, vec![]);
        let config = EngineConfig::builder().prompt_caching(false).build();
        engine(provider.clone(), config)
            .run(RunInput::new("word ".repeat(2000)), &CancellationToken::new())
            .await
            .unwrap();
        let requests = provider.requests.lock().unwrap();
        assert!(requests[0].system_prompts[0].cache_control.is_none());
        assert!(requests[0].messages[0].content[0].cache_control().is_none());
    }

    #[tokio::test]
    async fn events_follow_processing_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let provider = Scripted::new(
            false,
            vec![vec![ContentBlock::text("looking"), echo_call("a", "hi")]],
        );
        engine(provider, EngineConfig::default())
            .with_event_sink(Arc::new(move |event| captured.lock().unwrap().push(event)))
            .run(RunInput::new("go"), &CancellationToken::new())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], EngineEvent::Text("looking".into()));
        assert!(matches!(&seen[1], EngineEvent::ToolInvocation { name, .. } if name == "echo"));
        assert_eq!(seen[2], EngineEvent::SystemContextAdded { tool: "echo".into() });
        assert!(matches!(seen[3], EngineEvent::TurnCompleted { turn: 1, .. }));
        assert_eq!(seen[4], EngineEvent::Text("done".into()));
    }
}
