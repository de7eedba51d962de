//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::types::{ToolDefinition, ToolOutput, ToolParameters};
use super::validation::validate_arguments;
use crate::error::DelveError;
use crate::provider::Backend;

/// Context available during tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    /// Id of the tool-use block being served.
    pub tool_use_id: Option<String>,
}

/// Core tool trait. Implement to expose a capability to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable description sent to the model.
    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> &ToolParameters;

    /// Backend-neutral declaration.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters().schema.clone(),
        }
    }

    /// Declaration for a specific backend. `None` hides the tool from it.
    fn declaration(&self, _backend: Backend) -> Option<ToolDefinition> {
        Some(self.definition())
    }

    /// Short progress text for the user. Must not have side effects.
    fn describe_invocation(&self, _args: &ToolArguments) -> String {
        format!("Running {}", self.name())
    }

    /// Reject malformed input before `invoke` is attempted.
    fn check_params(&self, args: &ToolArguments) -> Result<(), DelveError> {
        validate_arguments(args.raw(), &self.parameters().schema)
    }

    /// Execute the tool.
    async fn invoke(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, DelveError>;
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, DelveError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
pub struct FnTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, DelveError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn invoke(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, DelveError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}
