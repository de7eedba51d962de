//! External tool servers.
//!
//! A tool server is an out-of-process collaborator that advertises tools and
//! runs them on request. [`ToolServer`] is the seam the rest of the crate sees;
//! the stdio/rmcp implementation lives in [`client`] behind the `mcp` feature.

pub mod bridge;
#[cfg(feature = "mcp")]
pub mod client;
pub mod server_set;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ToolServerConfig;
use crate::error::DelveError;

pub use bridge::McpTool;
#[cfg(feature = "mcp")]
pub use client::{StdioConnector, StdioToolServer};
pub use server_set::{with_tool_servers, ToolServerSet};

/// A tool as advertised by a server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Flattened result of a server-side tool call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCallOutcome {
    pub content: String,
    pub is_error: bool,
}

/// Open connection to one tool server.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Configured server name, used in logs and errors.
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ServerTool>, DelveError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallOutcome, DelveError>;

    /// Release the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<(), DelveError>;
}

/// Opens tool-server connections from configuration.
#[async_trait]
pub trait ToolServerConnector: Send + Sync {
    async fn connect(&self, config: &ToolServerConfig) -> Result<Arc<dyn ToolServer>, DelveError>;
}
