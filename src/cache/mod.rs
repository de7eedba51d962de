//! Prompt-cache boundary placement.
//!
//! Backends with prompt caching charge less for a request prefix they have
//! seen before, up to a content block carrying a cache marker. The heuristic
//! here keeps the last system segment marked and grows at most
//! [`MAX_MESSAGE_MARKERS`] markers through the message history as it gets
//! longer, moving the newest one forward once the ceiling is reached.
//!
//! Markers live only on a working copy ([`CacheAnnotator`]). The canonical
//! history never carries them, and [`strip_cache_markers`] removes any that a
//! caller hands back.

use tracing::debug;

use crate::types::{CacheControl, ContentBlock, Message, Role, SystemPromptSegment};

/// Ceiling on concurrent markers in the message history.
pub const MAX_MESSAGE_MARKERS: usize = 3;

/// Estimated tokens since the last marker needed to place the first marker.
pub const FIRST_MARKER_THRESHOLD: usize = 1024;

/// Estimated tokens since the last marker needed to add a further marker.
pub const NEXT_MARKER_THRESHOLD: usize = 2048;

/// Rough token count: non-whitespace characters divided by four, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().filter(|c| !c.is_whitespace()).count();
    chars.div_ceil(4)
}

fn block_tokens(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text(t) => estimate_tokens(&t.text),
        ContentBlock::ToolUse(tu) => estimate_tokens(&tu.input.to_string()),
        ContentBlock::ToolResult(r) => estimate_tokens(&r.content),
    }
}

/// Marker statistics over a message history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarkerScan {
    pub markers: usize,
    /// Estimated tokens after the most recent marker (or from the start).
    pub tokens_since_marker: usize,
    /// (message index, block index) of the most recent marker.
    pub last_marker: Option<(usize, usize)>,
}

pub fn scan(messages: &[Message]) -> MarkerScan {
    let mut scan = MarkerScan::default();
    for (mi, msg) in messages.iter().enumerate() {
        for (bi, block) in msg.content.iter().enumerate() {
            scan.tokens_since_marker += block_tokens(block);
            if block.cache_control().is_some() {
                scan.markers += 1;
                scan.tokens_since_marker = 0;
                scan.last_marker = Some((mi, bi));
            }
        }
    }
    scan
}

/// Apply the marker policy to the last block of the last message, in place.
///
/// Only a trailing user message is considered. Returns whether anything changed.
pub fn apply_policy(messages: &mut [Message]) -> bool {
    let scan = scan(messages);
    let Some(last_index) = messages.len().checked_sub(1) else {
        return false;
    };
    if messages[last_index].role != Role::User {
        return false;
    }
    let Some(block_index) = messages[last_index].content.len().checked_sub(1) else {
        return false;
    };
    let target = (last_index, block_index);
    if scan.last_marker == Some(target) {
        return false;
    }

    let place = match scan.markers {
        0 => scan.tokens_since_marker > FIRST_MARKER_THRESHOLD,
        n if n < MAX_MESSAGE_MARKERS => scan.tokens_since_marker > NEXT_MARKER_THRESHOLD,
        _ => {
            if let Some((mi, bi)) = scan.last_marker {
                messages[mi].content[bi].set_cache_control(None);
            }
            true
        }
    };
    if place {
        messages[last_index].content[block_index].set_cache_control(Some(CacheControl::Ephemeral));
        debug!(
            markers = scan.markers,
            tokens_since_marker = scan.tokens_since_marker,
            "placed cache marker"
        );
    }
    place
}

/// System prompts with only the final segment marked.
pub fn annotate_system(segments: &[SystemPromptSegment]) -> Vec<SystemPromptSegment> {
    let mut out = segments.to_vec();
    for segment in &mut out {
        segment.cache_control = None;
    }
    if let Some(last) = out.last_mut() {
        last.cache_control = Some(CacheControl::Ephemeral);
    }
    out
}

/// Remove every marker from messages and system prompts.
pub fn strip_cache_markers(messages: &mut [Message], system: &mut [SystemPromptSegment]) {
    for msg in messages.iter_mut() {
        for block in &mut msg.content {
            block.set_cache_control(None);
        }
    }
    for segment in system.iter_mut() {
        segment.cache_control = None;
    }
}

/// Marked working copy of a conversation, kept alongside the canonical one.
///
/// Markers placed on earlier turns stay where they were so the prefix the
/// backend cached remains byte-identical; each new turn only decides about
/// the newest block.
#[derive(Debug, Clone, Default)]
pub struct CacheAnnotator {
    messages: Vec<Message>,
}

impl CacheAnnotator {
    /// Start from a canonical history. Any markers it carries are dropped.
    pub fn new(history: &[Message]) -> Self {
        let mut messages = history.to_vec();
        strip_cache_markers(&mut messages, &mut []);
        Self { messages }
    }

    /// Mirror a message appended to the canonical history.
    pub fn push(&mut self, message: Message) {
        let mut message = message;
        for block in &mut message.content {
            block.set_cache_control(None);
        }
        self.messages.push(message);
    }

    /// Apply the policy for this turn and return the marked messages.
    pub fn annotate(&mut self) -> &[Message] {
        apply_policy(&mut self.messages);
        &self.messages
    }

    pub fn marker_count(&self) -> usize {
        scan(&self.messages).markers
    }
}
