//! MCP Client error types.
//!
//! Every fault a transport adapter can hit is converted into one of these
//! variants before it leaves the adapter.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// Backend unreachable: spawn failure, refused connection, dead process.
    #[error("cannot reach backend '{backend}': {reason}")]
    Connection { backend: String, reason: String },

    /// No response within the configured bound.
    #[error("{operation} on backend '{backend}' timed out after {timeout_ms}ms")]
    Timeout {
        backend: String,
        operation: String,
        timeout_ms: u64,
    },

    /// Tool name absent from the merged catalog.
    #[error("unknown tool: '{name}'")]
    ToolNotFound { name: String },

    /// Resource URI absent from the merged catalog.
    #[error("unknown resource: '{uri}'")]
    ResourceNotFound { uri: String },

    /// Arguments failed the tool's schema.
    #[error("invalid arguments for '{tool}': {reason}")]
    Validation { tool: String, reason: String },

    /// The tool body failed, or the server answered with an error.
    #[error("tool '{tool}' failed: {reason}")]
    Execution { tool: String, reason: String },

    /// The response envelope was malformed or the HTTP exchange was not 2xx.
    #[error("protocol error from backend '{backend}': {reason}")]
    TransportProtocol { backend: String, reason: String },

    /// Configuration error (bad config file, rejected tool name collision).
    #[error("config error: {reason}")]
    Config { reason: String },
}

impl McpError {
    /// Whether the failure is transient and a retry may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, McpError::Connection { .. } | McpError::Timeout { .. })
    }

    /// Short machine-readable kind, used in logs and tool-result messages.
    pub fn kind(&self) -> &'static str {
        match self {
            McpError::Connection { .. } => "connection_error",
            McpError::Timeout { .. } => "timeout_error",
            McpError::ToolNotFound { .. } => "tool_not_found",
            McpError::ResourceNotFound { .. } => "resource_not_found",
            McpError::Validation { .. } => "validation_error",
            McpError::Execution { .. } => "execution_error",
            McpError::TransportProtocol { .. } => "transport_protocol_error",
            McpError::Config { .. } => "config_error",
        }
    }
}
