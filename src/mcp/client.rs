//! Stdio tool servers over the Model Context Protocol (rmcp).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject, ProtocolVersion,
    ResourceContents,
};
use rmcp::service::{
    ClientInitializeError, DynService, Peer, RoleClient, RunningService, ServiceError, ServiceExt,
};
use rmcp::transport::TokioChildProcess;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ServerTool, ToolCallOutcome, ToolServer, ToolServerConnector};
use crate::config::ToolServerConfig;
use crate::error::DelveError;
use crate::util::timeout::with_timeout;

type DynClientService = Box<dyn DynService<RoleClient>>;
type McpRunningService = RunningService<RoleClient, DynClientService>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A child process speaking MCP on stdin/stdout.
pub struct StdioToolServer {
    name: String,
    peer: Peer<RoleClient>,
    session: Mutex<Option<McpRunningService>>,
}

impl StdioToolServer {
    /// Spawn the configured command and complete the initialize handshake.
    pub async fn connect(config: &ToolServerConfig) -> Result<Self, DelveError> {
        let mut command = Command::new(&config.command);
        command.args(&config.args).envs(&config.env).kill_on_drop(true);

        let transport = TokioChildProcess::new(command).map_err(|error| {
            map_client_initialize_error(
                &config.name,
                ClientInitializeError::transport::<TokioChildProcess>(error, "spawn stdio transport"),
            )
        })?;

        let client_info = ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            ..Default::default()
        };
        let session = with_timeout(CONNECT_TIMEOUT, async {
            client_info
                .into_dyn()
                .serve(transport)
                .await
                .map_err(|e| map_client_initialize_error(&config.name, e))
        })
        .await?;

        debug!(server = %config.name, command = %config.command, "tool server initialized");
        Ok(Self::from_running_service(config.name.clone(), session))
    }

    fn from_running_service(name: String, session: McpRunningService) -> Self {
        Self {
            name,
            peer: session.peer().clone(),
            session: Mutex::new(Some(session)),
        }
    }
}

#[async_trait]
impl ToolServer for StdioToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ServerTool>, DelveError> {
        let tools = match self.peer.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => self
                .peer
                .list_tools(None)
                .await
                .map(|page| page.tools)
                .map_err(|e| map_service_error(&self.name, "list_tools", e))?,
            Err(e) => return Err(map_service_error(&self.name, "list_tools", e)),
        };
        Ok(tools.into_iter().map(map_server_tool).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallOutcome, DelveError> {
        let arguments = coerce_tool_arguments(arguments)?;
        let result = self
            .peer
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|e| map_service_error(&self.name, "call_tool", e))?;
        Ok(map_call_result(result))
    }

    async fn close(&self) -> Result<(), DelveError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        session.cancel().await.map_err(|e| DelveError::ToolServer {
            server: self.name.clone(),
            message: format!("shutdown failed: {e}"),
        })?;
        debug!(server = %self.name, "tool server closed");
        Ok(())
    }
}

/// Connects configured servers as stdio child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioConnector;

#[async_trait]
impl ToolServerConnector for StdioConnector {
    async fn connect(&self, config: &ToolServerConfig) -> Result<Arc<dyn ToolServer>, DelveError> {
        Ok(Arc::new(StdioToolServer::connect(config).await?))
    }
}

fn map_server_tool(tool: rmcp::model::Tool) -> ServerTool {
    ServerTool {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
    }
}

fn coerce_tool_arguments(value: serde_json::Value) -> Result<Option<JsonObject>, DelveError> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
                DelveError::InvalidArgument(format!("tool arguments must be valid JSON: {e}"))
            })?;
            coerce_tool_arguments(parsed)
        }
        other => Err(DelveError::InvalidArgument(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
    }
}

fn extract_text_content(content: &[Content]) -> Option<String> {
    let mut lines = Vec::new();
    for item in content {
        if let Some(text) = item.as_text() {
            lines.push(text.text.clone());
            continue;
        }
        if let Some(resource) = item.as_resource() {
            if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
                lines.push(text.clone());
            }
        }
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Flatten a call result to text: text items first, else structured content.
fn map_call_result(result: CallToolResult) -> ToolCallOutcome {
    let content = extract_text_content(&result.content)
        .or_else(|| result.structured_content.as_ref().map(|v| v.to_string()))
        .unwrap_or_default();
    ToolCallOutcome {
        content,
        is_error: result.is_error.unwrap_or(false),
    }
}

fn map_client_initialize_error(server: &str, error: ClientInitializeError) -> DelveError {
    let message = match error {
        ClientInitializeError::ConnectionClosed(context) => {
            format!("connection closed during initialize: {context}")
        }
        ClientInitializeError::TransportError { error, context } => {
            format!("transport error ({context}): {error}")
        }
        ClientInitializeError::JsonRpcError(error) => {
            format!("initialize JSON-RPC error {}: {}", error.code.0, error.message)
        }
        ClientInitializeError::Cancelled => "initialize cancelled".to_string(),
        other => format!("initialize failed: {other}"),
    };
    DelveError::ToolServer {
        server: server.to_string(),
        message,
    }
}

fn map_service_error(server: &str, context: &str, error: ServiceError) -> DelveError {
    let message = match error {
        ServiceError::Timeout { timeout } => return DelveError::Timeout(timeout.as_millis() as u64),
        ServiceError::McpError(error) => {
            format!("{context}: MCP error {}: {}", error.code.0, error.message)
        }
        ServiceError::TransportSend(error) => format!("{context}: transport send failed: {error}"),
        ServiceError::TransportClosed => format!("{context}: transport closed"),
        ServiceError::UnexpectedResponse => format!("{context}: unexpected response"),
        ServiceError::Cancelled { reason } => {
            let suffix = reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default();
            format!("{context}: request cancelled{suffix}")
        }
        other => format!("{context}: {other}"),
    };
    DelveError::ToolServer {
        server: server.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arguments_accept_objects_and_json_strings() {
        let from_obj = coerce_tool_arguments(json!({"q": "retry"})).unwrap().unwrap();
        assert_eq!(from_obj.get("q"), Some(&json!("retry")));

        let from_str = coerce_tool_arguments(json!(r#"{"q":"cache"}"#)).unwrap().unwrap();
        assert_eq!(from_str.get("q"), Some(&json!("cache")));

        assert!(coerce_tool_arguments(json!(null)).unwrap().is_none());
        assert!(coerce_tool_arguments(json!("  ")).unwrap().is_none());
    }

    #[test]
    fn arguments_reject_non_objects() {
        assert!(matches!(
            coerce_tool_arguments(json!(["bad"])),
            Err(DelveError::InvalidArgument(_))
        ));
        assert!(matches!(
            coerce_tool_arguments(json!(r#"{"q":"#)),
            Err(DelveError::InvalidArgument(message)) if message.contains("valid JSON")
        ));
    }

    #[test]
    fn server_tool_copies_schema() {
        let mut schema = serde_json::Map::new();
        schema.insert("type".into(), json!("object"));
        let tool = rmcp::model::Tool::new("search_docs", "Search the docs", schema);

        let mapped = map_server_tool(tool);
        assert_eq!(mapped.name, "search_docs");
        assert_eq!(mapped.description.as_deref(), Some("Search the docs"));
        assert_eq!(mapped.input_schema, json!({"type": "object"}));
    }

    #[test]
    fn call_result_is_flattened_to_text() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "first" },
                { "type": "text", "text": "second" }
            ]
        }))
        .unwrap();
        assert_eq!(
            map_call_result(result),
            ToolCallOutcome {
                content: "first\nsecond".into(),
                is_error: false
            }
        );
    }

    #[test]
    fn error_result_keeps_its_text() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{ "type": "text", "text": "index offline" }],
            "isError": true
        }))
        .unwrap();
        let outcome = map_call_result(result);
        assert!(outcome.is_error);
        assert_eq!(outcome.content, "index offline");
    }

    #[test]
    fn structured_only_result_is_serialized() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [],
            "structuredContent": { "hits": 2 }
        }))
        .unwrap();
        assert_eq!(map_call_result(result).content, r#"{"hits":2}"#);
    }

    #[test]
    fn service_timeout_maps_to_timeout() {
        let err = map_service_error(
            "docs",
            "call_tool",
            ServiceError::Timeout {
                timeout: Duration::from_millis(2750),
            },
        );
        assert!(matches!(err, DelveError::Timeout(2750)));
    }

    #[test]
    fn service_errors_name_the_server() {
        let err = map_service_error("docs", "list_tools", ServiceError::UnexpectedResponse);
        assert!(matches!(
            err,
            DelveError::ToolServer { server, message }
            if server == "docs" && message == "list_tools: unexpected response"
        ));
    }

    #[test]
    fn initialize_errors_name_the_server() {
        let err = map_client_initialize_error(
            "docs",
            ClientInitializeError::JsonRpcError(rmcp::model::ErrorData::invalid_request(
                "bad initialize payload",
                None,
            )),
        );
        assert!(matches!(
            err,
            DelveError::ToolServer { server, message }
            if server == "docs" && message.contains("bad initialize payload")
        ));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_connect() {
        let config = ToolServerConfig {
            name: "ghost".into(),
            command: "/definitely/not/a/real/binary".into(),
            args: Vec::new(),
            env: Default::default(),
            ask_tools: None,
            edit_tools: None,
        };
        let err = StdioToolServer::connect(&config).await.err().unwrap();
        assert!(matches!(err, DelveError::ToolServer { server, .. } if server == "ghost"));
    }
}
