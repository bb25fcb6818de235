//! JSON-RPC method dispatch for a tool server.
//!
//! Transport-agnostic: both the stdio loop and the HTTP handler feed parsed
//! messages through [`Dispatcher::handle`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use base64::Engine;
use serde_json::Value;

use super::errors::ToolError;
use super::registry::{ResourceBody, ServerRegistry, ToolBody, ToolOutput};
use super::schema;
use crate::protocol::{
    error_codes, methods, CallToolResult, ContentBlock, IncomingMessage, InitializeResult,
    ListResourcesResult, ListToolsResult, OutgoingResponse, ReadResourceResult, ResourceContents,
    ServerInfo, PROTOCOL_VERSION,
};

/// Routes requests to the registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ServerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: ServerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Handle one raw line. Returns the serialized response, if any.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let response = match serde_json::from_str::<Value>(line) {
            Ok(value) => self.handle_value(value).await?,
            Err(e) => OutgoingResponse::failure(
                Value::Null,
                error_codes::PARSE_ERROR,
                format!("Parse error: {e}"),
            ),
        };
        serialize(&response)
    }

    /// Handle one parsed JSON value that should be a single message.
    pub async fn handle_value(&self, value: Value) -> Option<OutgoingResponse> {
        let id = value.get("id").cloned();
        match serde_json::from_value::<IncomingMessage>(value) {
            Ok(message) => self.handle(message).await,
            Err(e) => Some(OutgoingResponse::failure(
                id.unwrap_or(Value::Null),
                error_codes::INVALID_REQUEST,
                format!("Invalid request: {e}"),
            )),
        }
    }

    /// Handle a message. Notifications produce no response.
    pub async fn handle(&self, message: IncomingMessage) -> Option<OutgoingResponse> {
        let Some(id) = message.id else {
            tracing::debug!(method = %message.method, "notification received");
            return None;
        };

        let result = match message.method.as_str() {
            methods::INITIALIZE => Ok(self.initialize()),
            methods::PING => Ok(serde_json::json!({})),
            methods::LIST_TOOLS => to_value(ListToolsResult {
                tools: self.registry.list_tools(),
                next_cursor: None,
            }),
            methods::CALL_TOOL => self.call_tool(message.params).await,
            methods::LIST_RESOURCES => to_value(ListResourcesResult {
                resources: self.registry.list_resources(),
                next_cursor: None,
            }),
            methods::READ_RESOURCE => self.read_resource(message.params),
            other => {
                return Some(OutgoingResponse::failure(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                ))
            }
        };

        Some(match result {
            Ok(value) => OutgoingResponse::success(id, value),
            Err((code, message)) => OutgoingResponse::failure(id, code, message),
        })
    }

    fn initialize(&self) -> Value {
        let mut capabilities = serde_json::json!({ "tools": { "listChanged": false } });
        if self.registry.has_resources() {
            capabilities["resources"] = serde_json::json!({ "listChanged": false });
        }
        serde_json::to_value(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities,
            server_info: Some(ServerInfo {
                name: self.registry.name().to_string(),
                version: self.registry.version().to_string(),
            }),
        })
        .unwrap_or_default()
    }

    /// `tools/call`: validate, execute, wrap.
    ///
    /// Unknown tools and invalid arguments become JSON-RPC errors; a failing
    /// body becomes an `isError` result.
    pub async fn call_tool(&self, params: Option<Value>) -> Result<Value, (i32, String)> {
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| (error_codes::INVALID_PARAMS, "missing tool name".to_string()))?;

        let outcome = self.execute(name, params.get("arguments")).await;
        let result = match outcome {
            Ok(output) => CallToolResult {
                content: vec![ContentBlock::Text { text: output.text }],
                structured_content: output.structured,
                is_error: false,
            },
            Err(e) => match e.rpc_code() {
                Some(code) => {
                    tracing::info!(tool = %name, error = %e, "tool call rejected");
                    return Err((code, e.to_string()));
                }
                None => {
                    tracing::warn!(tool = %name, error = %e, "tool call failed");
                    CallToolResult {
                        content: vec![ContentBlock::Text {
                            text: e.to_string(),
                        }],
                        structured_content: None,
                        is_error: true,
                    }
                }
            },
        };
        to_value(result)
    }

    async fn execute(&self, name: &str, raw_args: Option<&Value>) -> Result<ToolOutput, ToolError> {
        let tool = self.registry.tool(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })?;
        let args = schema::validate(name, &tool.params, raw_args)?;

        match &tool.body {
            ToolBody::Sync(body) => {
                let body = Arc::clone(body);
                std::panic::catch_unwind(AssertUnwindSafe(|| body(&args)))
                    .unwrap_or_else(|_| Err(ToolError::execution(name, "tool panicked")))
            }
            ToolBody::Async(body) => match tokio::spawn(body(args)).await {
                Ok(result) => result,
                Err(e) => Err(ToolError::execution(name, format!("tool task failed: {e}"))),
            },
        }
    }

    fn read_resource(&self, params: Option<Value>) -> Result<Value, (i32, String)> {
        let uri = params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str)
            .ok_or_else(|| (error_codes::INVALID_PARAMS, "missing resource uri".to_string()))?;

        let resource = self.registry.resource(uri).ok_or_else(|| {
            let e = ToolError::UnknownResource {
                uri: uri.to_string(),
            };
            (error_codes::RESOURCE_NOT_FOUND, e.to_string())
        })?;

        let body = (resource.read)().map_err(|e| {
            tracing::warn!(uri = %uri, error = %e, "resource read failed");
            (e.rpc_code().unwrap_or(error_codes::INTERNAL_ERROR), e.to_string())
        })?;

        let mime_type = resource.descriptor.mime_type.clone();
        let contents = match body {
            ResourceBody::Text(text) => ResourceContents {
                uri: uri.to_string(),
                mime_type,
                text: Some(text),
                blob: None,
            },
            ResourceBody::Bytes(bytes) => ResourceContents {
                uri: uri.to_string(),
                mime_type,
                text: None,
                blob: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            },
        };
        to_value(ReadResourceResult {
            contents: vec![contents],
        })
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, (i32, String)> {
    serde_json::to_value(value).map_err(|e| (error_codes::INTERNAL_ERROR, e.to_string()))
}

/// Serialize a response. Only fails on non-string map keys, which we never build.
pub fn serialize(response: &OutgoingResponse) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response");
            None
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
