//! The agent loop: policy decides, tools run, repeat until the policy answers.
//!
//! ```text
//! AwaitingUserInput → PolicyDeciding → {ToolCalling → PolicyDeciding}*
//!                   → RespondingToUser → AwaitingUserInput
//! ```
//!
//! Tool failures never end a turn. They become `Error: …` tool-result
//! messages and the policy is asked again.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::conversation::Conversation;
use super::errors::AgentError;
use super::types::{AgentOptions, AgentState, Decision, TurnOutcome};
use crate::inference::types::{ChatMessage, ToolCall};
use crate::inference::InferenceError;
use crate::mcp_client::{InvocationResult, McpError, MultiServerClient, ToolRegistry};

/// Maximum "did you mean" suggestions attached to an unknown-tool result.
const MAX_SUGGESTIONS: usize = 3;

// ─── Seams ──────────────────────────────────────────────────────────────────

/// Decides the next step from the full history and the tool catalog.
#[async_trait]
pub trait ReasoningPolicy: Send + Sync {
    /// `tools` are function definitions in OpenAI shape.
    async fn decide(
        &self,
        history: &[ChatMessage],
        tools: &[Value],
    ) -> Result<Decision, InferenceError>;
}

/// Runs tool calls for the agent. Implemented by [`MultiServerClient`].
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn catalog(&self) -> Arc<ToolRegistry>;

    async fn invoke(&self, tool_name: &str, arguments: Value) -> InvocationResult;
}

#[async_trait]
impl ToolExecutor for MultiServerClient {
    fn catalog(&self) -> Arc<ToolRegistry> {
        self.get_tools()
    }

    async fn invoke(&self, tool_name: &str, arguments: Value) -> InvocationResult {
        MultiServerClient::invoke(self, tool_name, arguments).await
    }
}

// ─── Agent ──────────────────────────────────────────────────────────────────

pub struct Agent {
    policy: Arc<dyn ReasoningPolicy>,
    tools: Arc<dyn ToolExecutor>,
    conversation: Conversation,
    options: AgentOptions,
    state: AgentState,
}

impl Agent {
    /// Start a session. The system prompt is the configured base prompt plus
    /// a summary of the catalog as it is now.
    pub fn new(
        policy: Arc<dyn ReasoningPolicy>,
        tools: Arc<dyn ToolExecutor>,
        options: AgentOptions,
    ) -> Self {
        let system_prompt = build_system_prompt(&options.system_prompt, &tools.catalog());
        let conversation = Conversation::new(&system_prompt, options.max_tool_result_chars);
        Self {
            policy,
            tools,
            conversation,
            options,
            state: AgentState::AwaitingUserInput,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Mark the session finished. Further turns are still accepted; the REPL
    /// just stops asking for them.
    pub fn terminate(&mut self) {
        self.state = AgentState::Terminated;
    }

    /// Run one user turn to completion.
    ///
    /// Returns `Err` only when the policy fails. The user message stays in
    /// history either way.
    pub async fn run_turn(&mut self, user_text: &str) -> Result<TurnOutcome, AgentError> {
        self.conversation.add_user_message(user_text);

        // Re-read every turn: a reconnect may have swapped the catalog.
        let catalog = self.tools.catalog();
        let tool_defs = catalog.to_openai_tools();
        let limit = self.options.max_rounds_per_turn;

        let mut rounds: u32 = 0;
        let mut tool_calls: usize = 0;

        loop {
            if limit > 0 && rounds >= limit {
                tracing::warn!(rounds, tool_calls, "round limit reached, ending turn");
                let notice = format!(
                    "I stopped after {limit} rounds of tool calls without reaching an answer. \
                     Try narrowing the request."
                );
                return Ok(self.respond(notice, rounds, tool_calls, true));
            }
            rounds += 1;

            self.state = AgentState::PolicyDeciding;
            tracing::debug!(
                round = rounds,
                messages = self.conversation.len(),
                estimated_tokens = self.conversation.estimated_tokens(),
                "asking policy"
            );
            let decision = match self.policy.decide(self.conversation.messages(), &tool_defs).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(round = rounds, error = %e, recoverable = e.is_recoverable(), "policy failed");
                    self.state = AgentState::AwaitingUserInput;
                    return Err(e.into());
                }
            };

            let calls = match decision {
                Decision::Respond(text) => {
                    return Ok(self.respond(text, rounds, tool_calls, false));
                }
                Decision::CallTools(calls) if calls.is_empty() => {
                    return Ok(self.respond(String::new(), rounds, tool_calls, false));
                }
                Decision::CallTools(calls) => calls,
            };

            self.state = AgentState::ToolCalling;
            self.conversation.add_tool_call_message(&calls);
            for call in &calls {
                let text = self.execute(call, &catalog).await;
                self.conversation.add_tool_result_message(&call.id, &call.name, &text);
                tool_calls += 1;
            }
        }
    }

    fn respond(&mut self, reply: String, rounds: u32, tool_calls: usize, hit_round_limit: bool) -> TurnOutcome {
        self.state = AgentState::RespondingToUser;
        self.conversation.add_assistant_message(&reply);
        self.state = AgentState::AwaitingUserInput;
        tracing::info!(rounds, tool_calls, hit_round_limit, "turn complete");
        TurnOutcome {
            reply,
            rounds,
            tool_calls,
            hit_round_limit,
        }
    }

    /// Invoke one call and render the result for history.
    async fn execute(&self, call: &ToolCall, catalog: &ToolRegistry) -> String {
        let result = self.tools.invoke(&call.name, call.arguments.clone()).await;
        tracing::info!(
            tool = %call.name,
            tool_call_id = %call.id,
            correlation_id = %result.correlation_id,
            status = ?result.status(),
            elapsed_ms = result.execution_time_ms,
            "tool call finished"
        );

        let mut text = result.text();
        if let Some(McpError::ToolNotFound { name }) = result.error() {
            let similar = catalog.find_similar(name, MAX_SUGGESTIONS);
            if !similar.is_empty() {
                text.push_str(&format!(". Did you mean: {}?", similar.join(", ")));
            }
        }
        text
    }
}

fn build_system_prompt(base: &str, catalog: &ToolRegistry) -> String {
    let summary = catalog.capability_summary();
    if base.trim().is_empty() {
        summary
    } else {
        format!("{}\n\n{summary}", base.trim_end())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
