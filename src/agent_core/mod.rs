//! Agent Core: the conversation loop between user, policy and tools.
//!
//! Submodules:
//! - `agent_loop`: the turn state machine and its two seams (`ReasoningPolicy`, `ToolExecutor`)
//! - `conversation`: in-process message history
//! - `repl`: line-based front end with exit tokens and interrupt handling
//! - `types`: decisions, loop state, options
//! - `errors`: agent-level error types

pub mod agent_loop;
pub mod conversation;
pub mod errors;
pub mod repl;
pub mod types;

pub use agent_loop::{Agent, ReasoningPolicy, ToolExecutor};
pub use conversation::Conversation;
pub use errors::AgentError;
pub use repl::{run_chat, run_repl, ReplExit};
pub use types::{AgentOptions, AgentState, Decision, TurnOutcome};
