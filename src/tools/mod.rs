//! Tools the model can call: the trait, argument handling, the built-in
//! workspace tools, and the per-invocation registry.

pub mod arguments;
pub mod builtin;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;
pub mod workspace;

pub use arguments::ToolArguments;
pub use builtin::local_tools;
pub use registry::ToolRegistry;
pub use tool::{FnTool, Tool, ToolExecutionContext};
pub use types::{ToolDefinition, ToolOutput, ToolParameters};
pub use workspace::Workspace;
