//! Conversation: in-process history for one agent session.
//!
//! Holds the messages exactly as they are sent to the model: the system
//! prompt first, then user, assistant, assistant-tool-call and tool-result
//! messages in the order they happened. Nothing is persisted.

use crate::inference::types::{ChatMessage, Role, ToolCall};

/// Average characters per token for prose. Conservative: overestimating is
/// safer than overflowing the context window.
const CHARS_PER_TOKEN: f64 = 3.2;

/// Role label and formatting overhead per message.
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

// ─── Conversation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    max_tool_result_chars: usize,
}

impl Conversation {
    /// Start a conversation with `system_prompt` as its first message.
    pub fn new(system_prompt: &str, max_tool_result_chars: usize) -> Self {
        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        Self {
            messages,
            max_tool_result_chars,
        }
    }

    pub fn add_user_message(&mut self, content: &str) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn add_assistant_message(&mut self, content: &str) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// Record the assistant turn that requested `calls`.
    pub fn add_tool_call_message(&mut self, calls: &[ToolCall]) {
        self.messages.push(ChatMessage::assistant_tool_calls(calls));
    }

    /// Record one tool result, truncated to the configured limit.
    pub fn add_tool_result_message(&mut self, tool_call_id: &str, tool_name: &str, result: &str) {
        let content = truncate_tool_result(result, tool_name, self.max_tool_result_chars);
        self.messages.push(ChatMessage::tool_result(tool_call_id, content));
    }

    /// Everything, in order, ready to send.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of user messages so far.
    pub fn user_turns(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    /// Rough token count of the whole history, for logging.
    pub fn estimated_tokens(&self) -> u32 {
        self.messages.iter().map(estimate_message_tokens).sum()
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn estimate_tokens(text: &str) -> u32 {
    (text.len() as f64 / CHARS_PER_TOKEN).ceil() as u32
}

fn estimate_message_tokens(message: &ChatMessage) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;
    if let Some(content) = &message.content {
        total += estimate_tokens(content);
    }
    for call in message.tool_calls.iter().flatten() {
        total += estimate_tokens(&call.function.name) + estimate_tokens(&call.function.arguments);
    }
    total
}

/// Truncate `s` to at most `max_bytes` on a UTF-8 char boundary.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn truncate_tool_result(result: &str, tool_name: &str, max_chars: usize) -> String {
    if max_chars == 0 || result.len() <= max_chars {
        return result.to_string();
    }
    tracing::warn!(
        tool = %tool_name,
        original_len = result.len(),
        truncated_to = max_chars,
        "tool result truncated"
    );
    format!(
        "{}\n\n[... truncated: showing first {max_chars} of {} chars]",
        truncate_utf8(result, max_chars),
        result.len()
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────
