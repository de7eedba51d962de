//! Name-keyed tool lookup built once per invocation.

use std::collections::HashMap;
use std::sync::Arc;

use super::tool::Tool;
use super::types::ToolDefinition;
use crate::error::DelveError;
use crate::provider::Backend;

/// Ordered set of tools. Duplicate names are kept; lookup returns the
/// earliest registration.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        registry.extend(tools);
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let position = self.tools.len();
        self.index.entry(tool.name().to_string()).or_insert(position);
        self.tools.push(tool);
    }

    pub fn extend(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&Arc<dyn Tool>, DelveError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| DelveError::ToolNotFound(name.to_string()))
    }

    /// Declarations to send to `backend`, one per distinct name, in
    /// registration order. Tools with no declaration for the backend are omitted.
    pub fn declarations(&self, backend: Backend) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .enumerate()
            .filter(|(i, tool)| self.index.get(tool.name()) == Some(i))
            .filter_map(|(_, tool)| tool.declaration(backend))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::arguments::ToolArguments;
    use crate::tools::tool::{FnTool, ToolExecutionContext};
    use crate::tools::types::{ToolOutput, ToolParameters};
    use async_trait::async_trait;
    use serde_json::json;

    fn constant(name: &str, reply: &'static str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            name,
            "test tool",
            ToolParameters::empty(),
            move |_args, _ctx| async move { Ok(ToolOutput::text(reply)) },
        ))
    }

    struct AnthropicOnly;

    #[async_trait]
    impl Tool for AnthropicOnly {
        fn name(&self) -> &str {
            "anthropic_only"
        }
        fn description(&self) -> &str {
            "only declared for one backend"
        }
        fn parameters(&self) -> &ToolParameters {
            static PARAMS: std::sync::OnceLock<ToolParameters> = std::sync::OnceLock::new();
            PARAMS.get_or_init(ToolParameters::empty)
        }
        fn declaration(&self, backend: Backend) -> Option<ToolDefinition> {
            (backend == Backend::Anthropic).then(|| self.definition())
        }
        async fn invoke(
            &self,
            _args: &ToolArguments,
            _ctx: &ToolExecutionContext,
        ) -> Result<ToolOutput, DelveError> {
            Ok(ToolOutput::text("ok"))
        }
    }

    #[tokio::test]
    async fn first_registration_wins() {
        let registry = ToolRegistry::from_tools([
            constant("list_dir", "local"),
            constant("list_dir", "server"),
        ]);
        assert_eq!(registry.len(), 2);
        let tool = registry.lookup("list_dir").unwrap();
        let out = tool
            .invoke(&ToolArguments::new(json!({})), &ToolExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(out.content, "local");
        assert_eq!(registry.declarations(Backend::OpenAi).len(), 1);
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = ToolRegistry::from_tools([constant("read_file", "x")]);
        assert!(matches!(
            registry.lookup("delete_everything"),
            Err(DelveError::ToolNotFound(name)) if name == "delete_everything"
        ));
    }

    #[test]
    fn declarations_skip_tools_without_backend_support() {
        let registry = ToolRegistry::from_tools([constant("read_file", "x"), Arc::new(AnthropicOnly)]);
        let names = |backend| -> Vec<String> {
            registry
                .declarations(backend)
                .into_iter()
                .map(|d| d.name)
                .collect()
        };
        assert_eq!(names(Backend::Anthropic), vec!["read_file", "anthropic_only"]);
        assert_eq!(names(Backend::Gemini), vec!["read_file"]);
        // still dispatchable even when hidden from a backend
        assert!(registry.lookup("anthropic_only").is_ok());
    }
}
