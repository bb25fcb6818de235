//! Shared types for the MCP client.
//!
//! Backend configuration, client options, and the invocation records that
//! flow between the agent loop, the client and the transport adapters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::McpError;
use crate::protocol::{CallToolResult, ResourceDescriptor, ToolDescriptor};

/// Default bound on a single tool call.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

// ─── Backend Configuration ──────────────────────────────────────────────────

/// One configured tool server.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Unique backend name (e.g., "math").
    pub name: String,
    pub transport: TransportConfig,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }
}

/// How to reach a backend.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Spawn a child process and speak line-delimited JSON-RPC on its stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    /// POST JSON-RPC to an MCP streamable-HTTP endpoint.
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl TransportConfig {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::StreamableHttp { .. } => "streamable_http",
        }
    }
}

// Env values and headers routinely carry API keys; keep them out of logs.
impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("env", &env.keys().collect::<Vec<_>>())
                .field("cwd", cwd)
                .finish(),
            TransportConfig::StreamableHttp { url, headers } => f
                .debug_struct("StreamableHttp")
                .field("url", url)
                .field("headers", &headers.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

// ─── Client Options ─────────────────────────────────────────────────────────

/// What to do when a backend fails to connect or list its tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log it, record it, and continue with a partial catalog.
    #[default]
    Skip,
    /// Close everything already connected and fail initialization.
    Abort,
}

/// What to do when two backends advertise the same tool name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// The backend later in configuration order owns the name.
    #[default]
    LastWins,
    /// Fail initialization with a config error.
    Reject,
}

/// Multi-server client behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub failure_policy: FailurePolicy,
    pub collision_policy: CollisionPolicy,
    pub call_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            collision_policy: CollisionPolicy::default(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

// ─── Catalog Entries ────────────────────────────────────────────────────────

/// A tool descriptor plus the backend that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolHandle {
    pub backend: String,
    pub descriptor: ToolDescriptor,
}

impl ToolHandle {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// A resource descriptor plus the backend that listed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceHandle {
    pub backend: String,
    pub descriptor: ResourceDescriptor,
}

// ─── Invocations ────────────────────────────────────────────────────────────

/// One tool call attempt.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub correlation_id: String,
}

impl Invocation {
    /// Create an invocation with a fresh correlation id.
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Whether an invocation succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Success,
    Error,
}

/// Outcome of exactly one [`Invocation`].
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub tool_name: String,
    pub correlation_id: String,
    pub outcome: Result<CallToolResult, McpError>,
    pub execution_time_ms: u64,
}

impl InvocationResult {
    pub fn success(invocation: &Invocation, payload: CallToolResult, elapsed_ms: u64) -> Self {
        Self {
            tool_name: invocation.tool_name.clone(),
            correlation_id: invocation.correlation_id.clone(),
            outcome: Ok(payload),
            execution_time_ms: elapsed_ms,
        }
    }

    pub fn failure(invocation: &Invocation, error: McpError, elapsed_ms: u64) -> Self {
        Self {
            tool_name: invocation.tool_name.clone(),
            correlation_id: invocation.correlation_id.clone(),
            outcome: Err(error),
            execution_time_ms: elapsed_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn status(&self) -> InvocationStatus {
        if self.is_success() {
            InvocationStatus::Success
        } else {
            InvocationStatus::Error
        }
    }

    pub fn error(&self) -> Option<&McpError> {
        self.outcome.as_ref().err()
    }

    /// Text suitable for a tool-result message.
    ///
    /// Falls back to the structured content when the payload has no text
    /// blocks. Errors render as `Error: …`.
    pub fn text(&self) -> String {
        match &self.outcome {
            Ok(payload) => {
                let text = payload.text();
                if text.is_empty() {
                    payload
                        .structured_content
                        .as_ref()
                        .map(|v| v.to_string())
                        .unwrap_or_default()
                } else {
                    text
                }
            }
            Err(e) => format!("Error: {e}"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ContentBlock;

    #[test]
    fn test_transport_config_tagged_by_transport_key() {
        let yaml = r#"
transport: stdio
command: toolbridge
args: [serve, math]
"#;
        let cfg: TransportConfig = serde_yaml::from_str(yaml).unwrap();
        match cfg {
            TransportConfig::Stdio { command, args, .. } => {
                assert_eq!(command, "toolbridge");
                assert_eq!(args, vec!["serve", "math"]);
            }
            other => panic!("expected stdio, got {other:?}"),
        }

        let yaml = "transport: streamable_http\nurl: http://localhost:8000/mcp\n";
        let cfg: TransportConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.kind(), "streamable_http");
    }

    #[test]
    fn test_debug_hides_header_values() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer s3cret".to_string());
        let cfg = TransportConfig::StreamableHttp {
            url: "http://localhost:8000/mcp".into(),
            headers,
        };
        let dbg = format!("{cfg:?}");
        assert!(dbg.contains("Authorization"));
        assert!(!dbg.contains("s3cret"));
    }

    #[test]
    fn test_client_options_defaults() {
        let opts: ClientOptions = serde_yaml::from_str("{}").unwrap();
        assert_eq!(opts.failure_policy, FailurePolicy::Skip);
        assert_eq!(opts.collision_policy, CollisionPolicy::LastWins);
        assert_eq!(opts.call_timeout_ms, 30_000);
    }

    #[test]
    fn test_invocations_get_distinct_correlation_ids() {
        let a = Invocation::new("add", serde_json::json!({}));
        let b = Invocation::new("add", serde_json::json!({}));
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_result_text_prefers_text_blocks() {
        let inv = Invocation::new("add", serde_json::json!({"a": 2, "b": 3}));
        let payload = CallToolResult {
            content: vec![ContentBlock::Text { text: "5".into() }],
            structured_content: Some(serde_json::json!({"result": 5})),
            is_error: false,
        };
        let result = InvocationResult::success(&inv, payload, 3);
        assert_eq!(result.status(), InvocationStatus::Success);
        assert_eq!(result.text(), "5");
        assert_eq!(result.correlation_id, inv.correlation_id);
    }

    #[test]
    fn test_result_text_for_error() {
        let inv = Invocation::new("nope", serde_json::json!({}));
        let result = InvocationResult::failure(
            &inv,
            McpError::ToolNotFound {
                name: "nope".into(),
            },
            0,
        );
        assert_eq!(result.status(), InvocationStatus::Error);
        assert!(result.text().starts_with("Error: unknown tool"));
    }
}
