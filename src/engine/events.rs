//! Progress events emitted while a run is in flight.

use std::sync::Arc;

use crate::types::Usage;

/// Something the caller may want to show the user as it happens.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Assistant text, emitted as each response is processed.
    Text(String),
    /// A tool is about to run.
    ToolInvocation { name: String, description: String },
    /// A tool failed; the failure is fed back to the model.
    ToolFailed { name: String, message: String },
    /// A tool appended a system-prompt segment.
    SystemContextAdded { tool: String },
    TurnCompleted { turn: usize, usage: Usage },
}

/// Callback receiving engine events.
pub type EventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct EventEmitter {
    sink: Option<EventSink>,
}

impl EventEmitter {
    pub(crate) fn new(sink: Option<EventSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }
}
