//! Command-line surface: `delve ask` and `delve edit`.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{DelveConfig, Mode};
use crate::engine::{Engine, EngineConfig, EngineEvent, EventSink, RunInput};
use crate::error::DelveError;
use crate::mcp::{with_tool_servers, StdioConnector};
use crate::prompts::{base_prompt, context_segment};
use crate::provider::{create_provider, Backend};
use crate::session;
use crate::tools::{local_tools, ToolRegistry, Workspace};

/// Ask questions about, or request edits to, the codebase in the current directory.
#[derive(Parser, Debug)]
#[command(name = "delve", version, about)]
pub struct Cli {
    /// Increase log output (-v: debug, -vv: trace). `DELVE_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question; files are only read
    Ask(CommandArgs),
    /// Request a change; files may be written and checks run
    Edit(CommandArgs),
}

impl Commands {
    pub fn mode(&self) -> Mode {
        match self {
            Self::Ask(_) => Mode::Ask,
            Self::Edit(_) => Mode::Edit,
        }
    }

    pub fn into_args(self) -> CommandArgs {
        match self {
            Self::Ask(args) | Self::Edit(args) => args,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommandArgs {
    /// What to ask or change
    pub prompt: String,

    /// File whose contents are added to the system prompt (repeatable)
    #[arg(short, long = "context", value_name = "FILE")]
    pub context: Vec<PathBuf>,

    /// Session file to resume from and save to
    #[arg(short, long, value_name = "PATH")]
    pub session: Option<PathBuf>,

    /// Model backend: anthropic, openai, gemini
    #[arg(short, long)]
    pub provider: Option<Backend>,

    /// Model id (defaults per backend)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Upper bound on model turns
    #[arg(long)]
    pub max_turns: Option<usize>,

    /// Enable token-efficient tool use (anthropic only)
    #[arg(long)]
    pub token_efficient: bool,

    /// Do not add prompt-cache markers
    #[arg(long)]
    pub no_cache: bool,

    /// Workspace root (defaults to the current directory)
    #[arg(short, long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,
}

impl CommandArgs {
    /// Layer flags over the loaded configuration.
    pub fn apply(&self, config: &mut DelveConfig) {
        if let Some(backend) = self.provider {
            if backend != config.backend {
                config.model = None;
            }
            config.backend = backend;
        }
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
        if let Some(max_turns) = self.max_turns {
            config.max_turns = max_turns.max(1);
        }
        if self.token_efficient {
            config.token_efficient = true;
        }
        if let Some(root) = &self.workspace {
            config.workspace_root = root.clone();
        }
    }
}

/// Filter directive for `-v` counts.
pub fn log_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "delve=debug",
        _ => "delve=trace",
    }
}

/// Prints answer text to stdout and progress to stderr.
pub fn terminal_sink() -> EventSink {
    Arc::new(|event| match event {
        EngineEvent::Text(text) => {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{text}");
            let _ = stdout.flush();
        }
        EngineEvent::ToolInvocation { description, .. } => eprintln!("> {description}"),
        EngineEvent::ToolFailed { name, message } => eprintln!("  {name} failed: {message}"),
        EngineEvent::SystemContextAdded { tool } => debug!(%tool, "system context added"),
        EngineEvent::TurnCompleted { turn, usage } => debug!(
            turn,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "turn usage"
        ),
    })
}

/// Run one `ask` or `edit` command to completion.
///
/// Tool-server connections are closed on every path out, including
/// cancellation and engine failures. The session file, if any, is written
/// only after a successful run.
pub async fn run(command: Commands, cancel: CancellationToken) -> Result<(), DelveError> {
    let mode = command.mode();
    let args = command.into_args();

    let mut config = DelveConfig::load()?;
    args.apply(&mut config);
    debug!(?config, %mode, "configuration loaded");

    let provider = create_provider(&config)?;
    let workspace = Arc::new(Workspace::new(&config.workspace_root)?);

    let mut input = RunInput::new(args.prompt.clone());
    for path in &args.context {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            DelveError::Configuration(format!("cannot read context file {}: {e}", path.display()))
        })?;
        input = input.with_context(context_segment(&path.display().to_string(), &contents));
    }
    if let Some(path) = &args.session {
        input = input.with_prior(session::load(path).await);
    }

    let local = local_tools(mode, workspace, &config.commands);
    let engine_config = EngineConfig::builder()
        .max_turns(config.max_turns)
        .prompt_caching(!args.no_cache)
        .build();

    let outcome = with_tool_servers(&config.tool_servers, &StdioConnector, |servers| async move {
        let mut registry = ToolRegistry::from_tools(local);
        registry.extend(servers.tools(mode).await?);
        info!(tools = ?registry.names(), "tools registered");

        Engine::new(provider, registry, base_prompt(mode), engine_config)
            .with_event_sink(terminal_sink())
            .run(input, &cancel)
            .await
    })
    .await?;

    info!(
        turns = outcome.turns,
        input_tokens = outcome.usage.input_tokens,
        output_tokens = outcome.usage.output_tokens,
        "run complete"
    );

    if let Some(path) = &args.session {
        session::save(path, &outcome.session).await?;
    }
    Ok(())
}
