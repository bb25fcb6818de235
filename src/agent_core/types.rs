//! Shared types for the agent core.

use serde::Deserialize;

use crate::inference::types::ToolCall;

/// Default bound on policy rounds within one user turn.
pub const DEFAULT_MAX_ROUNDS_PER_TURN: u32 = 10;

/// Default cap on the characters of a single tool result kept in history.
pub const DEFAULT_MAX_TOOL_RESULT_CHARS: usize = 8_000;

// ─── Decisions ──────────────────────────────────────────────────────────────

/// What the reasoning policy wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Answer the user and end the turn.
    Respond(String),
    /// Invoke these tools in order, then ask again.
    CallTools(Vec<ToolCall>),
}

// ─── Loop State ─────────────────────────────────────────────────────────────

/// Where the agent loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    AwaitingUserInput,
    PolicyDeciding,
    ToolCalling,
    RespondingToUser,
    Terminated,
}

/// Result of one completed user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The assistant reply shown to the user.
    pub reply: String,
    /// Policy rounds used, including the final one.
    pub rounds: u32,
    /// Tool invocations made during the turn.
    pub tool_calls: usize,
    /// Whether the turn was cut short by `max_rounds_per_turn`.
    pub hit_round_limit: bool,
}

// ─── Options ────────────────────────────────────────────────────────────────

/// Settings under `agent:` in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentOptions {
    /// `0` means unbounded.
    pub max_rounds_per_turn: u32,
    /// Longer tool results are truncated before entering history.
    pub max_tool_result_chars: usize,
    /// Base system prompt. The tool catalog summary is appended.
    pub system_prompt: String,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_rounds_per_turn: DEFAULT_MAX_ROUNDS_PER_TURN,
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
            system_prompt: "You are a helpful assistant. Use the available tools when they \
                            help answer the user. Only report results you actually received \
                            from tool calls."
                .to_string(),
        }
    }
}
