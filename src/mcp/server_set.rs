//! A group of tool-server connections opened for one command.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{McpTool, ToolServer, ToolServerConnector};
use crate::config::{Mode, ToolServerConfig};
use crate::error::DelveError;
use crate::tools::Tool;

/// Open connections, in configuration order.
#[derive(Clone, Default)]
pub struct ToolServerSet {
    servers: Vec<(ToolServerConfig, Arc<dyn ToolServer>)>,
}

impl ToolServerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every configured server in order.
    ///
    /// If one fails, the connections opened before it are closed and the
    /// failure is returned.
    pub async fn connect_all(
        configs: &[ToolServerConfig],
        connector: &dyn ToolServerConnector,
    ) -> Result<Self, DelveError> {
        let mut set = Self::new();
        for config in configs {
            match connector.connect(config).await {
                Ok(server) => {
                    debug!(server = %config.name, "tool server connected");
                    set.servers.push((config.clone(), server));
                }
                Err(err) => {
                    warn!(server = %config.name, error = %err, "tool server failed to connect");
                    set.close_all().await;
                    return Err(match err {
                        DelveError::ToolServer { .. } => err,
                        other => DelveError::ToolServer {
                            server: config.name.clone(),
                            message: other.to_string(),
                        },
                    });
                }
            }
        }
        Ok(set)
    }

    /// Add an already-open connection.
    pub fn insert(&mut self, config: ToolServerConfig, server: Arc<dyn ToolServer>) {
        self.servers.push((config, server));
    }

    /// Tools from every server, filtered by each server's allow-list for `mode`.
    pub async fn tools(&self, mode: Mode) -> Result<Vec<Arc<dyn Tool>>, DelveError> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        for (config, server) in &self.servers {
            let advertised = server.list_tools().await?;
            let allow = config.allow_list(mode);
            let before = tools.len();
            for tool in advertised {
                if allow.is_some_and(|names| !names.iter().any(|n| *n == tool.name)) {
                    continue;
                }
                tools.push(Arc::new(McpTool::new(server.clone(), tool)));
            }
            info!(
                server = %config.name,
                %mode,
                exposed = tools.len() - before,
                "tool server tools registered"
            );
        }
        Ok(tools)
    }

    /// Close every connection. Failures are logged, never returned.
    pub async fn close_all(&self) {
        let results = join_all(self.servers.iter().map(|(_, server)| server.close())).await;
        for ((config, _), result) in self.servers.iter().zip(results) {
            if let Err(err) = result {
                warn!(server = %config.name, error = %err, "failed to close tool server");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Connect `configs`, run `body` with the open set, then close every
/// connection whatever `body` returned.
pub async fn with_tool_servers<T, F, Fut>(
    configs: &[ToolServerConfig],
    connector: &dyn ToolServerConnector,
    body: F,
) -> Result<T, DelveError>
where
    F: FnOnce(ToolServerSet) -> Fut,
    Fut: Future<Output = Result<T, DelveError>>,
{
    let set = ToolServerSet::connect_all(configs, connector).await?;
    let result = body(set.clone()).await;
    set.close_all().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{ServerTool, ToolCallOutcome};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeServer {
        name: String,
        tools: Vec<&'static str>,
        fail_close: bool,
        log: Log,
    }

    #[async_trait]
    impl ToolServer for FakeServer {
        fn name(&self) -> &str {
            &self.name
        }

        async fn list_tools(&self) -> Result<Vec<ServerTool>, DelveError> {
            Ok(self
                .tools
                .iter()
                .map(|name| ServerTool {
                    name: name.to_string(),
                    description: None,
                    input_schema: json!({"type": "object", "properties": {}}),
                })
                .collect())
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: serde_json::Value,
        ) -> Result<ToolCallOutcome, DelveError> {
            Ok(ToolCallOutcome {
                content: format!("{}:{name}", self.name),
                is_error: false,
            })
        }

        async fn close(&self) -> Result<(), DelveError> {
            self.log.lock().unwrap().push(format!("close {}", self.name));
            if self.fail_close {
                return Err(DelveError::ToolServer {
                    server: self.name.clone(),
                    message: "already gone".into(),
                });
            }
            Ok(())
        }
    }

    struct FakeConnector {
        failing: Option<&'static str>,
        log: Log,
    }

    #[async_trait]
    impl ToolServerConnector for FakeConnector {
        async fn connect(
            &self,
            config: &ToolServerConfig,
        ) -> Result<Arc<dyn ToolServer>, DelveError> {
            self.log.lock().unwrap().push(format!("open {}", config.name));
            if self.failing == Some(config.name.as_str()) {
                return Err(DelveError::Configuration("spawn failed".into()));
            }
            Ok(Arc::new(FakeServer {
                name: config.name.clone(),
                tools: vec!["search", "write_note"],
                fail_close: config.name == "flaky",
                log: self.log.clone(),
            }))
        }
    }

    fn config(name: &str) -> ToolServerConfig {
        ToolServerConfig {
            name: name.into(),
            command: "server".into(),
            args: Vec::new(),
            env: HashMap::new(),
            ask_tools: None,
            edit_tools: None,
        }
    }

    fn connector(failing: Option<&'static str>) -> (FakeConnector, Log) {
        let log = Log::default();
        (
            FakeConnector {
                failing,
                log: log.clone(),
            },
            log,
        )
    }

    #[tokio::test]
    async fn failed_connect_closes_servers_already_open() {
        let (connector, log) = connector(Some("c"));
        let err = ToolServerSet::connect_all(&[config("a"), config("b"), config("c")], &connector)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DelveError::ToolServer { ref server, .. } if server == "c"));
        let log = log.lock().unwrap();
        assert_eq!(log[..3], ["open a", "open b", "open c"]);
        assert!(log.contains(&"close a".to_string()));
        assert!(log.contains(&"close b".to_string()));
        assert!(!log.contains(&"close c".to_string()));
    }

    #[tokio::test]
    async fn allow_list_filters_per_mode() {
        let (connector, _log) = connector(None);
        let mut restricted = config("docs");
        restricted.ask_tools = Some(vec!["search".into()]);
        let set = ToolServerSet::connect_all(&[restricted], &connector).await.unwrap();

        let names = |tools: Vec<Arc<dyn Tool>>| {
            tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>()
        };
        assert_eq!(names(set.tools(Mode::Ask).await.unwrap()), vec!["search"]);
        assert_eq!(
            names(set.tools(Mode::Edit).await.unwrap()),
            vec!["search", "write_note"]
        );
    }

    #[tokio::test]
    async fn close_failures_are_swallowed() {
        let (connector, log) = connector(None);
        let set = ToolServerSet::connect_all(&[config("flaky"), config("ok")], &connector)
            .await
            .unwrap();
        assert_eq!(set.len(), 2);
        set.close_all().await;
        let log = log.lock().unwrap();
        assert!(log.contains(&"close flaky".to_string()));
        assert!(log.contains(&"close ok".to_string()));
    }

    #[tokio::test]
    async fn scoped_group_closes_when_body_fails() {
        let (connector, log) = connector(None);
        let result: Result<(), DelveError> =
            with_tool_servers(&[config("a")], &connector, |set| async move {
                assert_eq!(set.len(), 1);
                Err(DelveError::ToolNotFound("ghost".into()))
            })
            .await;

        assert!(matches!(result, Err(DelveError::ToolNotFound(_))));
        assert_eq!(*log.lock().unwrap(), vec!["open a", "close a"]);
    }
}
