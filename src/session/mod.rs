//! Session Store: persist and restore a whole conversation.
//!
//! File shape: `{ "state": { "messages": [...], "systemPrompts": [...] }, "savedAt": ... }`.
//! Loading never fails hard. A missing, unreadable, or malformed file means
//! "no session" and the caller starts fresh.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::strip_cache_markers;
use crate::error::DelveError;
use crate::types::{ContentBlock, Message, Role, SystemPromptSegment};

/// Full conversation state: messages plus the system prompts they ran under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub messages: Vec<Message>,
    pub system_prompts: Vec<SystemPromptSegment>,
}

impl Session {
    /// A fresh session holding only the base system prompt.
    pub fn new(base_prompt: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            system_prompts: vec![SystemPromptSegment::new(base_prompt)],
        }
    }

    /// Text of the most recent assistant message, if any.
    pub fn last_answer(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(Message::text)
    }

    /// Copy with every cache marker removed.
    pub fn without_cache_markers(&self) -> Self {
        let mut copy = self.clone();
        strip_cache_markers(&mut copy.messages, &mut copy.system_prompts);
        copy
    }

    /// Every assistant `tool_use` must be answered by exactly one
    /// `tool_result` in the user message that follows it.
    fn validate(&self) -> Result<(), String> {
        if self.system_prompts.is_empty() {
            return Err("systemPrompts is empty".into());
        }
        for (i, message) in self.messages.iter().enumerate() {
            if message.role != Role::Assistant {
                continue;
            }
            let results: Vec<&str> = match self.messages.get(i + 1) {
                Some(next) if next.role == Role::User => next
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolResult(r) => Some(r.tool_use_id.as_str()),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            };
            for tool_use in message.content.iter().filter_map(ContentBlock::as_tool_use) {
                let answers = results.iter().filter(|id| **id == tool_use.id).count();
                if answers != 1 {
                    return Err(format!(
                        "tool_use '{}' at message {i} has {answers} matching tool results",
                        tool_use.id
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
    state: Session,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Utc>>,
}

/// Load a session. Returns `None` when the file is missing or invalid.
pub async fn load(path: &Path) -> Option<Session> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no session file");
            return None;
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not read session file; starting fresh");
            return None;
        }
    };

    let file: SessionFile = match serde_json::from_str(&raw) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "invalid session file; starting fresh");
            return None;
        }
    };

    if let Err(reason) = file.state.validate() {
        warn!(path = %path.display(), reason = %reason, "invalid session file; starting fresh");
        return None;
    }

    debug!(
        path = %path.display(),
        messages = file.state.messages.len(),
        saved_at = ?file.saved_at,
        "loaded session"
    );
    Some(file.state)
}

/// Save a session, stripping cache markers. Overwrites `path`.
pub async fn save(path: &Path, session: &Session) -> Result<(), DelveError> {
    let file = SessionFile {
        state: session.without_cache_markers(),
        saved_at: Some(Utc::now()),
    };
    let json = serde_json::to_string_pretty(&file)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, json).await?;
    debug!(path = %path.display(), messages = session.messages.len(), "saved session");
    Ok(())
}
