//! Convenience re-exports for common use.

pub use crate::config::{DelveConfig, Mode};
pub use crate::engine::{Engine, EngineConfig, EngineEvent, RunInput, RunOutcome};
pub use crate::error::{DelveError, Result};
pub use crate::provider::{Backend, ModelProvider};
pub use crate::session::Session;
pub use crate::tools::{local_tools, Tool, ToolArguments, ToolOutput, ToolRegistry, Workspace};
pub use crate::types::{ContentBlock, Message, Role, SystemPromptSegment, Usage};
