//! Tool server error types.

use thiserror::Error;

use crate::protocol::error_codes;

/// Errors raised while serving a request.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The tool body failed. Reported to the caller as an `isError` result.
    #[error("{reason}")]
    Execution { tool: String, reason: String },

    #[error("Unknown resource: {uri}")]
    UnknownResource { uri: String },

    #[error("failed to read resource '{uri}': {reason}")]
    Resource { uri: String, reason: String },
}

impl ToolError {
    pub fn execution(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::Execution {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    /// JSON-RPC error code, for errors that become error responses.
    ///
    /// Execution failures return `None`: they travel inside a successful
    /// response as an `isError` tool result.
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            ToolError::UnknownTool { .. } | ToolError::InvalidArguments { .. } => {
                Some(error_codes::INVALID_PARAMS)
            }
            ToolError::UnknownResource { .. } => Some(error_codes::RESOURCE_NOT_FOUND),
            ToolError::Resource { .. } => Some(error_codes::INTERNAL_ERROR),
            ToolError::Execution { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_codes() {
        let unknown = ToolError::UnknownTool { name: "x".into() };
        assert_eq!(unknown.rpc_code(), Some(-32602));
        let invalid = ToolError::InvalidArguments {
            tool: "add".into(),
            reason: "missing".into(),
        };
        assert_eq!(invalid.rpc_code(), Some(-32602));
        assert_eq!(ToolError::execution("add", "boom").rpc_code(), None);
        assert_eq!(
            ToolError::UnknownResource { uri: "a://b".into() }.rpc_code(),
            Some(-32002)
        );
    }

    #[test]
    fn test_execution_display_is_bare_reason() {
        let err = ToolError::execution("get_current_weather", "city not found");
        assert_eq!(err.to_string(), "city not found");
    }
}
