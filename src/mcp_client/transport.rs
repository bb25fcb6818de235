//! The transport adapter contract.
//!
//! Every backend is reached through a [`Transport`]. The pipe adapter speaks
//! JSON-RPC itself through the [`RpcChannel`] seam, which carries the shared
//! MCP operations (handshake, paged listings, `tools/call`). The HTTP adapter
//! delegates the wire to `rmcp`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::errors::McpError;
use super::http::StreamableHttpTransport;
use super::stdio::StdioTransport;
use super::types::{BackendConfig, Invocation, InvocationResult, TransportConfig};
use crate::protocol::{
    error_codes, methods, CallToolResult, InitializeResult, JsonRpcResponse, ListResourcesResult,
    ListToolsResult, ReadResourceResult, ResourceContents, ResourceDescriptor, ToolDescriptor,
    PROTOCOL_VERSION,
};

/// Upper bound on `nextCursor` pages, so a misbehaving server cannot loop us.
const MAX_LIST_PAGES: usize = 64;

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport Contract ─────────────────────────────────────────────────────

/// Uniform call surface over one backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Backend name from configuration.
    fn backend(&self) -> &str;

    /// Open the channel and complete the MCP handshake. Idempotent.
    async fn connect(&self) -> Result<(), McpError>;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, McpError>;

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, McpError>;

    /// Execute one tool call. Failures are carried inside the result.
    async fn call(&self, invocation: &Invocation) -> InvocationResult;

    /// Release the process or session.
    async fn close(&self) -> Result<(), McpError>;
}

/// Builds adapters from configuration. Tests swap in spies here.
pub trait TransportFactory: Send + Sync {
    fn build(&self, config: &BackendConfig) -> Result<Arc<dyn Transport>, McpError>;
}

/// Builds the real pipe and HTTP adapters.
#[derive(Debug, Default, Clone)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn build(&self, config: &BackendConfig) -> Result<Arc<dyn Transport>, McpError> {
        match &config.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => Ok(Arc::new(StdioTransport::new(
                &config.name,
                command,
                args.clone(),
                env.clone(),
                cwd.clone(),
            ))),
            TransportConfig::StreamableHttp { url, headers } => Ok(Arc::new(
                StreamableHttpTransport::new(&config.name, url, headers)?,
            )),
        }
    }
}

// ─── Shared MCP Operations ──────────────────────────────────────────────────

/// One request/response exchange with a server, however it is carried.
#[async_trait]
pub(crate) trait RpcChannel: Send + Sync {
    fn backend(&self) -> &str;

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError>;

    async fn notify(&self, method: &str, params: Option<serde_json::Value>)
        -> Result<(), McpError>;
}

/// Perform the MCP initialization handshake.
pub(crate) async fn handshake(rpc: &dyn RpcChannel) -> Result<InitializeResult, McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let response = rpc.request(methods::INITIALIZE, Some(params)).await?;
    let result = extract_result(rpc.backend(), methods::INITIALIZE, response)?;
    let init: InitializeResult = parse_payload(rpc.backend(), methods::INITIALIZE, result)?;

    rpc.notify(methods::INITIALIZED, None).await?;

    tracing::debug!(
        backend = %rpc.backend(),
        protocol = %init.protocol_version,
        server = ?init.server_info.as_ref().map(|s| s.name.as_str()),
        "handshake complete"
    );
    Ok(init)
}

/// Collect every page of `tools/list`.
pub(crate) async fn list_all_tools(rpc: &dyn RpcChannel) -> Result<Vec<ToolDescriptor>, McpError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_LIST_PAGES {
        let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
        let response = rpc.request(methods::LIST_TOOLS, params).await?;
        let result = extract_result(rpc.backend(), methods::LIST_TOOLS, response)?;
        let page: ListToolsResult = parse_payload(rpc.backend(), methods::LIST_TOOLS, result)?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(tools),
        }
    }
    Err(McpError::TransportProtocol {
        backend: rpc.backend().to_string(),
        reason: format!("tools/list did not terminate after {MAX_LIST_PAGES} pages"),
    })
}

/// Collect every page of `resources/list`.
///
/// A server without resource support answers `-32601`; that is an empty
/// listing, not a failure.
pub(crate) async fn list_all_resources(
    rpc: &dyn RpcChannel,
) -> Result<Vec<ResourceDescriptor>, McpError> {
    let mut resources = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_LIST_PAGES {
        let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
        let response = rpc.request(methods::LIST_RESOURCES, params).await?;
        if matches!(&response.error, Some(e) if e.code == error_codes::METHOD_NOT_FOUND) {
            return Ok(resources);
        }
        let result = extract_result(rpc.backend(), methods::LIST_RESOURCES, response)?;
        let page: ListResourcesResult =
            parse_payload(rpc.backend(), methods::LIST_RESOURCES, result)?;
        resources.extend(page.resources);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(resources),
        }
    }
    Err(McpError::TransportProtocol {
        backend: rpc.backend().to_string(),
        reason: format!("resources/list did not terminate after {MAX_LIST_PAGES} pages"),
    })
}

pub(crate) async fn read_resource(
    rpc: &dyn RpcChannel,
    uri: &str,
) -> Result<Vec<ResourceContents>, McpError> {
    let response = rpc
        .request(methods::READ_RESOURCE, Some(serde_json::json!({ "uri": uri })))
        .await?;
    let result = extract_result(rpc.backend(), uri, response)?;
    let read: ReadResourceResult = parse_payload(rpc.backend(), methods::READ_RESOURCE, result)?;
    Ok(read.contents)
}

/// Run `tools/call` and fold every failure into the result.
pub(crate) async fn call_tool(rpc: &dyn RpcChannel, invocation: &Invocation) -> InvocationResult {
    let start = Instant::now();
    let outcome = call_tool_inner(rpc, invocation).await;
    let elapsed = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(payload) => InvocationResult::success(invocation, payload, elapsed),
        Err(e) => InvocationResult::failure(invocation, e, elapsed),
    }
}

async fn call_tool_inner(
    rpc: &dyn RpcChannel,
    invocation: &Invocation,
) -> Result<CallToolResult, McpError> {
    let params = serde_json::json!({
        "name": invocation.tool_name,
        "arguments": invocation.arguments,
    });
    let response = rpc.request(methods::CALL_TOOL, Some(params)).await?;
    let result = extract_result(rpc.backend(), &invocation.tool_name, response)?;
    let payload: CallToolResult = parse_payload(rpc.backend(), methods::CALL_TOOL, result)?;
    reject_tool_error(&invocation.tool_name, payload)
}

/// An `isError` payload becomes an execution error carrying its text.
pub(crate) fn reject_tool_error(tool: &str, payload: CallToolResult) -> Result<CallToolResult, McpError> {
    if payload.is_error {
        let text = payload.text();
        return Err(McpError::Execution {
            tool: tool.to_string(),
            reason: if text.is_empty() {
                "tool reported an error".into()
            } else {
                text
            },
        });
    }
    Ok(payload)
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
///
/// `subject` names what was being asked for (a tool name or a method) and is
/// carried into validation and execution errors.
pub fn extract_result(
    backend: &str,
    subject: &str,
    response: JsonRpcResponse,
) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(if err.code == error_codes::INVALID_PARAMS {
            McpError::Validation {
                tool: subject.to_string(),
                reason: err.message,
            }
        } else {
            McpError::Execution {
                tool: subject.to_string(),
                reason: format!("[{}] {}", err.code, err.message),
            }
        });
    }

    response.result.ok_or_else(|| McpError::TransportProtocol {
        backend: backend.to_string(),
        reason: "response missing both result and error".into(),
    })
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    backend: &str,
    method: &str,
    value: serde_json::Value,
) -> Result<T, McpError> {
    serde_json::from_value(value).map_err(|e| McpError::TransportProtocol {
        backend: backend.to_string(),
        reason: format!("malformed {method} result: {e}"),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
