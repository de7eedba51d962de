//! Server tools exposed through the local [`Tool`] trait.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ServerTool, ToolServer};
use crate::error::DelveError;
use crate::provider::{google, Backend};
use crate::tools::{
    Tool, ToolArguments, ToolDefinition, ToolExecutionContext, ToolOutput, ToolParameters,
};

/// One tool advertised by a tool server.
pub struct McpTool {
    server: Arc<dyn ToolServer>,
    name: String,
    description: String,
    parameters: ToolParameters,
}

impl McpTool {
    pub fn new(server: Arc<dyn ToolServer>, tool: ServerTool) -> Self {
        let schema = match tool.input_schema {
            serde_json::Value::Object(_) => tool.input_schema,
            _ => serde_json::json!({ "type": "object", "properties": {} }),
        };
        Self {
            description: tool
                .description
                .unwrap_or_else(|| format!("Tool '{}' from {}", tool.name, server.name())),
            name: tool.name,
            parameters: ToolParameters::from_schema(schema),
            server,
        }
    }

    pub fn server_name(&self) -> &str {
        self.server.name()
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn declaration(&self, backend: Backend) -> Option<ToolDefinition> {
        let definition = self.definition();
        match backend {
            Backend::Gemini if !google::is_declarable(&definition) => None,
            _ => Some(definition),
        }
    }

    fn describe_invocation(&self, _args: &ToolArguments) -> String {
        format!("Calling {} on {}", self.name, self.server.name())
    }

    async fn invoke(
        &self,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, DelveError> {
        let outcome = self.server.call_tool(&self.name, args.raw().clone()).await?;
        if outcome.is_error {
            let message = if outcome.content.is_empty() {
                "tool server reported an error".to_string()
            } else {
                outcome.content
            };
            return Err(DelveError::tool(&self.name, message));
        }
        Ok(ToolOutput::text(outcome.content))
    }
}

impl std::fmt::Debug for McpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTool")
            .field("server", &self.server.name())
            .field("name", &self.name)
            .finish()
    }
}
