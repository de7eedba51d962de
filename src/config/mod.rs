//! Configuration (layered: defaults < config file < environment < CLI flags).
//!
//! [`DelveConfig`] is built once at startup and passed down explicitly; nothing
//! here is global, so engines for different backends or modes can coexist.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use strum::{Display, EnumString};

use crate::error::DelveError;
use crate::provider::Backend;

/// Which tool set a command runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Read-only: questions about the codebase.
    Ask,
    /// Read-write: the model may change files and run checks.
    Edit,
}

/// External commands the `run_checks` tool may execute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildCommands {
    pub format: Option<String>,
    pub build: Option<String>,
    pub lint: Option<String>,
}

impl BuildCommands {
    pub fn is_empty(&self) -> bool {
        self.format.is_none() && self.build.is_none() && self.lint.is_none()
    }

    /// Configured commands in execution order, labelled.
    pub fn ordered(&self) -> Vec<(&'static str, &str)> {
        [
            ("format", self.format.as_deref()),
            ("build", self.build.as_deref()),
            ("lint", self.lint.as_deref()),
        ]
        .into_iter()
        .filter_map(|(label, cmd)| cmd.map(|c| (label, c)))
        .collect()
    }
}

/// One external tool server launched as a child process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Tools exposed in ask mode. Absent = all advertised tools.
    #[serde(default)]
    pub ask_tools: Option<Vec<String>>,
    /// Tools exposed in edit mode. Absent = all advertised tools.
    #[serde(default)]
    pub edit_tools: Option<Vec<String>>,
}

impl ToolServerConfig {
    pub fn allow_list(&self, mode: Mode) -> Option<&[String]> {
        match mode {
            Mode::Ask => self.ask_tools.as_deref(),
            Mode::Edit => self.edit_tools.as_deref(),
        }
    }
}

/// Shape of `~/.delve/config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub backend: Option<String>,
    pub model: Option<String>,
    pub max_turns: Option<usize>,
    pub token_efficient: Option<bool>,
    pub request_timeout_secs: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub build_command: Option<String>,
    pub lint_command: Option<String>,
    pub format_command: Option<String>,
    #[serde(default)]
    pub mcp_servers: Vec<ToolServerConfig>,
}

/// Resolved configuration for one invocation.
#[derive(Clone)]
pub struct DelveConfig {
    pub backend: Backend,
    pub model: Option<String>,
    pub max_turns: usize,
    pub token_efficient: bool,
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub commands: BuildCommands,
    pub tool_servers: Vec<ToolServerConfig>,
    pub workspace_root: PathBuf,
    api_keys: HashMap<Backend, String>,
    base_urls: HashMap<Backend, String>,
}

impl fmt::Debug for DelveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelveConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("max_turns", &self.max_turns)
            .field("token_efficient", &self.token_efficient)
            .field("commands", &self.commands)
            .field("tool_servers", &self.tool_servers)
            .field("workspace_root", &self.workspace_root)
            .field("api_keys", &self.api_keys.keys().collect::<Vec<_>>())
            .field("base_urls", &self.base_urls)
            .finish()
    }
}

impl Default for DelveConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Anthropic,
            model: None,
            max_turns: 50,
            token_efficient: false,
            request_timeout: Duration::from_secs(120),
            retry_attempts: 1,
            commands: BuildCommands::default(),
            tool_servers: Vec::new(),
            workspace_root: PathBuf::from("."),
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
        }
    }
}

impl DelveConfig {
    /// Defaults, then the config file (if any), then the process environment.
    pub fn load() -> Result<Self, DelveError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        if let Ok(cwd) = std::env::current_dir() {
            config.workspace_root = cwd;
        }

        let path = std::env::var("DELVE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());
        if let Some(file) = read_config_file(&path)? {
            config.apply_file(file)?;
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Layer a parsed config file over the current values.
    pub fn apply_file(&mut self, file: FileConfig) -> Result<(), DelveError> {
        if let Some(backend) = file.backend {
            self.backend = parse_backend(&backend)?;
        }
        if file.model.is_some() {
            self.model = file.model;
        }
        if let Some(n) = file.max_turns {
            self.max_turns = n.max(1);
        }
        if let Some(flag) = file.token_efficient {
            self.token_efficient = flag;
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = file.retry_attempts {
            self.retry_attempts = n.max(1);
        }
        if file.format_command.is_some() {
            self.commands.format = file.format_command;
        }
        if file.build_command.is_some() {
            self.commands.build = file.build_command;
        }
        if file.lint_command.is_some() {
            self.commands.lint = file.lint_command;
        }
        if !file.mcp_servers.is_empty() {
            self.tool_servers = file.mcp_servers;
        }
        Ok(())
    }

    /// Layer environment variables, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), DelveError> {
        let key_mappings = [
            ("ANTHROPIC_API_KEY", Backend::Anthropic),
            ("OPENAI_API_KEY", Backend::OpenAi),
            ("GOOGLE_API_KEY", Backend::Gemini),
            ("GEMINI_API_KEY", Backend::Gemini),
        ];
        for (var, backend) in key_mappings {
            if let Some(key) = lookup(var).filter(|k| !k.is_empty()) {
                self.api_keys.insert(backend, key);
            }
        }

        let url_mappings = [
            ("ANTHROPIC_BASE_URL", Backend::Anthropic),
            ("OPENAI_BASE_URL", Backend::OpenAi),
            ("GEMINI_BASE_URL", Backend::Gemini),
        ];
        for (var, backend) in url_mappings {
            if let Some(url) = lookup(var) {
                self.base_urls.insert(backend, url);
            }
        }

        if let Some(backend) = lookup("DELVE_BACKEND") {
            self.backend = parse_backend(&backend)?;
        }
        if let Some(model) = lookup("DELVE_MODEL") {
            self.model = Some(model);
        }
        if let Some(cmd) = lookup("DELVE_FORMAT_COMMAND") {
            self.commands.format = Some(cmd);
        }
        if let Some(cmd) = lookup("DELVE_BUILD_COMMAND") {
            self.commands.build = Some(cmd);
        }
        if let Some(cmd) = lookup("DELVE_LINT_COMMAND") {
            self.commands.lint = Some(cmd);
        }
        Ok(())
    }

    pub fn set_api_key(&mut self, backend: Backend, key: impl Into<String>) {
        self.api_keys.insert(backend, key.into());
    }

    pub fn api_key(&self, backend: Backend) -> Option<&str> {
        self.api_keys.get(&backend).map(String::as_str)
    }

    pub fn set_base_url(&mut self, backend: Backend, url: impl Into<String>) {
        self.base_urls.insert(backend, url.into());
    }

    pub fn base_url(&self, backend: Backend) -> Option<&str> {
        self.base_urls.get(&backend).map(String::as_str)
    }

    /// Model id for the selected backend, falling back to its default.
    pub fn model_id(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.backend.default_model())
    }
}

fn parse_backend(raw: &str) -> Result<Backend, DelveError> {
    raw.parse().map_err(|_| {
        DelveError::Configuration(format!(
            "unknown backend '{raw}' (expected anthropic, openai, or gemini)"
        ))
    })
}

fn default_config_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".delve"))
        .unwrap_or_else(|| PathBuf::from(".delve"))
        .join("config.toml")
}

/// Read and parse a config file. A missing file is not an error.
pub fn read_config_file(path: &Path) -> Result<Option<FileConfig>, DelveError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| DelveError::Configuration(format!("{}: {e}", path.display())))
}
