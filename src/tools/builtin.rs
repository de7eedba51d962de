//! Built-in workspace tools.
//!
//! Every tool shares one [`Workspace`] and resolves the paths it is given
//! against it, so nothing outside the workspace root can be read or written.
//! [`local_tools`] returns the set appropriate for a [`Mode`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::{ToolOutput, ToolParameters};
use super::workspace::Workspace;
use crate::config::{BuildCommands, Mode};
use crate::error::DelveError;
use crate::prompts::context_segment;
use crate::util::text::truncate_with_note;

const READ_FILE_MAX_BYTES: usize = 262_144;
const GREP_OUTPUT_MAX_BYTES: usize = 32_768;
const CHECK_OUTPUT_MAX_BYTES: usize = 32_768;
const GREP_TIMEOUT: Duration = Duration::from_secs(30);
const CHECK_TIMEOUT: Duration = Duration::from_secs(300);

/// Schema for tools taking a single workspace path.
fn path_params(description: &str) -> ToolParameters {
    ToolParameters::object()
        .string("relative_workspace_path", description, true)
        .build()
}

/// Tools available in `mode`.
///
/// Ask mode is read-only. Edit mode adds `write_file`, and `run_checks` when
/// at least one format, build, or lint command is configured.
pub fn local_tools(
    mode: Mode,
    workspace: Arc<Workspace>,
    commands: &BuildCommands,
) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ReadFileTool::new(workspace.clone())),
        Arc::new(ListDirTool::new(workspace.clone())),
        Arc::new(GrepSearchTool::new(workspace.clone())),
    ];
    if mode == Mode::Edit {
        tools.push(Arc::new(WriteFileTool::new(workspace.clone())));
        if !commands.is_empty() {
            tools.push(Arc::new(RunChecksTool::new(workspace, commands.clone())));
        }
    }
    tools
}

// ── read_file ──────────────────────────────────────────────────────────

/// Reads a file. The model gets a short confirmation; the file body goes into
/// system context.
pub struct ReadFileTool {
    workspace: Arc<Workspace>,
    parameters: ToolParameters,
}

impl ReadFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            parameters: path_params("Path of the file to read, relative to the workspace root"),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace. Its contents are added to your system context."
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn describe_invocation(&self, args: &ToolArguments) -> String {
        format!(
            "Reading {}",
            args.get_str_opt("relative_workspace_path").unwrap_or("?")
        )
    }

    async fn invoke(
        &self,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, DelveError> {
        let relative = args.get_str("relative_workspace_path")?;
        let path = self.workspace.resolve(relative)?;
        let display = self.workspace.display(&path);

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DelveError::tool("read_file", format!("{display}: {e}")))?;

        let truncated = content.len() > READ_FILE_MAX_BYTES;
        let body = truncate_with_note(&content, READ_FILE_MAX_BYTES);
        let summary = if truncated {
            format!(
                "Read {display} ({} bytes, truncated to {READ_FILE_MAX_BYTES}); contents are in your system context.",
                content.len()
            )
        } else {
            format!(
                "Read {display} ({} bytes); contents are in your system context.",
                content.len()
            )
        };

        Ok(ToolOutput::text(summary).with_system(context_segment(&display, &body)))
    }
}

// ── list_dir ───────────────────────────────────────────────────────────

pub struct ListDirTool {
    workspace: Arc<Workspace>,
    parameters: ToolParameters,
}

impl ListDirTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            parameters: path_params("Directory to list, relative to the workspace root ('.' for the root)"),
        }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory, one per line. Directories end with '/'."
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn describe_invocation(&self, args: &ToolArguments) -> String {
        format!(
            "Listing {}",
            args.get_str_opt("relative_workspace_path").unwrap_or("?")
        )
    }

    async fn invoke(
        &self,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, DelveError> {
        let relative = args.get_str("relative_workspace_path")?;
        let path = self.workspace.resolve(relative)?;
        let list_err = |e: std::io::Error| {
            DelveError::tool("list_dir", format!("{}: {e}", self.workspace.display(&path)))
        };

        let mut read_dir = tokio::fs::read_dir(&path).await.map_err(list_err)?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(list_err)? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map_err(list_err)?.is_dir() {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        let mut listing = String::new();
        for entry in entries {
            listing.push_str(&entry);
            listing.push('\n');
        }
        Ok(ToolOutput::text(listing))
    }
}

// ── grep_search ────────────────────────────────────────────────────────

pub struct GrepSearchTool {
    workspace: Arc<Workspace>,
    parameters: ToolParameters,
}

impl GrepSearchTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            parameters: ToolParameters::object()
                .string("query", "Regular expression to search for", true)
                .string(
                    "include_pattern",
                    "Glob restricting which files are searched, e.g. '*.rs'",
                    false,
                )
                .boolean("case_sensitive", "Match case (default true)", false)
                .build(),
        }
    }
}

#[async_trait]
impl Tool for GrepSearchTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search file contents in the workspace with grep. Returns matching lines as path:line:text."
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn describe_invocation(&self, args: &ToolArguments) -> String {
        let query = args.get_str_opt("query").unwrap_or("?");
        match args.get_str_opt("include_pattern") {
            Some(glob) => format!("Searching {glob} for '{query}'"),
            None => format!("Searching for '{query}'"),
        }
    }

    async fn invoke(
        &self,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, DelveError> {
        let query = args.get_str("query")?;

        let mut command = Command::new("grep");
        command
            .current_dir(self.workspace.root())
            .args(["-rn", "--exclude-dir=.git"])
            .kill_on_drop(true);
        if !args.get_bool_opt("case_sensitive").unwrap_or(true) {
            command.arg("-i");
        }
        if let Some(glob) = args.get_str_opt("include_pattern") {
            command.arg(format!("--include={glob}"));
        }
        command.args(["-e", query, "."]);

        let output = tokio::time::timeout(GREP_TIMEOUT, command.output())
            .await
            .map_err(|_| {
                DelveError::tool(
                    "grep_search",
                    format!("search timed out after {}s", GREP_TIMEOUT.as_secs()),
                )
            })?
            .map_err(|e| DelveError::tool("grep_search", e.to_string()))?;

        match output.status.code() {
            Some(0) => {}
            Some(1) => return Ok(ToolOutput::text("No matches found.")),
            _ => {
                return Err(DelveError::tool(
                    "grep_search",
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ));
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut result = String::with_capacity(stdout.len());
        for line in stdout.lines() {
            result.push_str(line.strip_prefix("./").unwrap_or(line));
            result.push('\n');
        }
        Ok(ToolOutput::text(truncate_with_note(&result, GREP_OUTPUT_MAX_BYTES)))
    }
}

// ── write_file ─────────────────────────────────────────────────────────

pub struct WriteFileTool {
    workspace: Arc<Workspace>,
    parameters: ToolParameters,
}

impl WriteFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            parameters: ToolParameters::object()
                .string(
                    "relative_workspace_path",
                    "Path of the file to write, relative to the workspace root",
                    true,
                )
                .string("content", "Full new contents of the file", true)
                .build(),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file in the workspace, replacing it if it exists and creating parent directories as needed."
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn describe_invocation(&self, args: &ToolArguments) -> String {
        format!(
            "Writing {}",
            args.get_str_opt("relative_workspace_path").unwrap_or("?")
        )
    }

    async fn invoke(
        &self,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, DelveError> {
        let relative = args.get_str("relative_workspace_path")?;
        let content = args.get_str("content")?;
        let path = self.workspace.resolve(relative)?;
        let display = self.workspace.display(&path);

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DelveError::tool(
                    "write_file",
                    format!("failed to create directories for {display}: {e}"),
                )
            })?;
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| DelveError::tool("write_file", format!("{display}: {e}")))?;

        Ok(ToolOutput::text(format!(
            "Wrote {} bytes to {display}",
            content.len()
        )))
    }
}

// ── run_checks ─────────────────────────────────────────────────────────

/// Runs the configured format, build, and lint commands in order, stopping
/// at the first failure.
pub struct RunChecksTool {
    workspace: Arc<Workspace>,
    commands: BuildCommands,
    parameters: ToolParameters,
}

impl RunChecksTool {
    pub fn new(workspace: Arc<Workspace>, commands: BuildCommands) -> Self {
        Self {
            workspace,
            commands,
            parameters: ToolParameters::empty(),
        }
    }
}

async fn run_shell(root: &Path, command: &str) -> Result<(Option<i32>, String), DelveError> {
    let output = tokio::time::timeout(
        CHECK_TIMEOUT,
        Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(root)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| {
        DelveError::tool(
            "run_checks",
            format!("'{command}' timed out after {}s", CHECK_TIMEOUT.as_secs()),
        )
    })?
    .map_err(|e| DelveError::tool("run_checks", format!("'{command}': {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok((output.status.code(), format!("{stdout}{stderr}")))
}

#[async_trait]
impl Tool for RunChecksTool {
    fn name(&self) -> &str {
        "run_checks"
    }

    fn description(&self) -> &str {
        "Run the project's configured format, build, and lint commands. Call this after editing files."
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn describe_invocation(&self, _args: &ToolArguments) -> String {
        let labels: Vec<&str> = self.commands.ordered().iter().map(|(l, _)| *l).collect();
        format!("Running {}", labels.join(", "))
    }

    async fn invoke(
        &self,
        _args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, DelveError> {
        let mut report = String::new();
        for (label, command) in self.commands.ordered() {
            let (code, output) = run_shell(self.workspace.root(), command).await?;
            report.push_str(&format!("$ {command}\n{output}"));
            if code != Some(0) {
                let status = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                return Err(DelveError::tool(
                    "run_checks",
                    format!(
                        "{label} failed (exit {status}):\n{}",
                        truncate_with_note(&report, CHECK_OUTPUT_MAX_BYTES)
                    ),
                ));
            }
        }
        report.push_str("All checks passed.");
        Ok(ToolOutput::text(truncate_with_note(&report, CHECK_OUTPUT_MAX_BYTES)))
    }
}
