//! delve: an LLM coding assistant for a local codebase.
//!
//! A prompt goes through the [`engine`] loop. The loop sends the conversation
//! to a [`provider`] backend, runs the [`tools`] the model asks for, and
//! feeds the results back until the model answers. Conversations can be
//! saved and resumed through [`session`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use delve::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> delve::error::Result<()> {
//! let config = DelveConfig::load()?;
//! let provider = delve::provider::create_provider(&config)?;
//! let workspace = Arc::new(Workspace::new(&config.workspace_root)?);
//! let registry = ToolRegistry::from_tools(local_tools(Mode::Ask, workspace, &config.commands));
//! let engine = Engine::new(
//!     provider,
//!     registry,
//!     delve::prompts::base_prompt(Mode::Ask),
//!     EngineConfig::default(),
//! );
//! let outcome = engine
//!     .run(RunInput::new("What does src/main.rs do?"), &CancellationToken::new())
//!     .await?;
//! println!("{}", outcome.answer());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod mcp;
pub mod prelude;
pub mod prompts;
pub mod provider;
pub mod session;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
