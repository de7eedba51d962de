//! Conversation Engine.
//!
//! Turns one user prompt into as many model turns as the model's tool calls
//! require. Each turn sends the (cache-annotated) history, appends the reply,
//! runs every requested tool in order and feeds the results back as one user
//! message. The run ends on the first reply without tool calls.

mod events;
mod runner;

pub use events::{EngineEvent, EventSink};
pub use runner::{Engine, EngineConfig, RunInput, RunOutcome, DEFAULT_MAX_TURNS};
