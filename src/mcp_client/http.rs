//! Streamable-HTTP transport on `rmcp`'s client.
//!
//! `rmcp` owns the wire (POSTs, the `Mcp-Session-Id`, event-stream bodies).
//! This adapter keeps one running client per backend and maps its errors
//! into [`McpError`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{CallToolRequestParam, ReadResourceRequestParam};
use rmcp::service::{Peer, RunningService, ServiceError};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use super::errors::McpError;
use super::transport::{reject_tool_error, Transport};
use super::types::{Invocation, InvocationResult};
use crate::protocol::{
    error_codes, methods, CallToolResult, ContentBlock, ResourceContents, ResourceDescriptor,
    ToolDescriptor,
};

type McpClient = RunningService<RoleClient, ()>;

/// TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the `initialize` exchange.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// MCP over streamable HTTP.
pub struct StreamableHttpTransport {
    backend: String,
    url: String,
    http: reqwest::Client,
    client: Mutex<Option<McpClient>>,
}

impl StreamableHttpTransport {
    /// Build the adapter. Fails on header names or values HTTP cannot carry.
    pub fn new(
        backend: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| McpError::Config {
                reason: format!("backend '{backend}': invalid header name '{key}': {e}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| McpError::Config {
                reason: format!("backend '{backend}': invalid value for header '{key}': {e}"),
            })?;
            header_map.insert(name, value);
        }

        // No whole-request timeout: the server-push stream stays open.
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(header_map)
            .build()
            .map_err(|e| McpError::Config {
                reason: format!("backend '{backend}': failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            backend: backend.to_string(),
            url: url.to_string(),
            http,
            client: Mutex::new(None),
        })
    }

    /// A handle on the running client, without holding the lock across calls.
    async fn peer(&self) -> Result<Peer<RoleClient>, McpError> {
        self.client
            .lock()
            .await
            .as_ref()
            .map(|client| client.peer().clone())
            .ok_or_else(|| McpError::Connection {
                backend: self.backend.clone(),
                reason: "not connected".into(),
            })
    }

    fn protocol_error(&self, reason: impl Into<String>) -> McpError {
        McpError::TransportProtocol {
            backend: self.backend.clone(),
            reason: reason.into(),
        }
    }

    /// `subject` is the tool name or method that was asked for.
    fn map_service_error(&self, subject: &str, e: ServiceError) -> McpError {
        match e {
            ServiceError::McpError(err) if err.code.0 == error_codes::INVALID_PARAMS => {
                McpError::Validation {
                    tool: subject.to_string(),
                    reason: err.message.into_owned(),
                }
            }
            ServiceError::McpError(err) => McpError::Execution {
                tool: subject.to_string(),
                reason: format!("[{}] {}", err.code.0, err.message),
            },
            ServiceError::TransportClosed => McpError::Connection {
                backend: self.backend.clone(),
                reason: "transport closed".into(),
            },
            ServiceError::TransportSend(e) => McpError::Connection {
                backend: self.backend.clone(),
                reason: format!("{}: {e}", self.url),
            },
            other => self.protocol_error(format!("{subject}: {other}")),
        }
    }

    /// Re-read an `rmcp` model value as this crate's protocol type.
    fn convert<T: DeserializeOwned>(&self, method: &str, value: impl Serialize) -> Result<T, McpError> {
        serde_json::to_value(value)
            .and_then(serde_json::from_value)
            .map_err(|e| self.protocol_error(format!("malformed {method} result: {e}")))
    }

    async fn call_inner(&self, invocation: &Invocation) -> Result<CallToolResult, McpError> {
        let arguments = match &invocation.arguments {
            serde_json::Value::Object(map) => Some(map.clone()),
            serde_json::Value::Null => None,
            other => {
                return Err(McpError::Validation {
                    tool: invocation.tool_name.clone(),
                    reason: format!("arguments must be an object, got {other}"),
                })
            }
        };

        let peer = self.peer().await?;
        let result = peer
            .call_tool(CallToolRequestParam {
                name: Cow::Owned(invocation.tool_name.clone()),
                arguments,
            })
            .await
            .map_err(|e| self.map_service_error(&invocation.tool_name, e))?;

        let payload = CallToolResult {
            content: self
                .convert::<Option<Vec<ContentBlock>>>(methods::CALL_TOOL, &result.content)?
                .unwrap_or_default(),
            structured_content: result.structured_content,
            is_error: result.is_error.unwrap_or(false),
        };
        reject_tool_error(&invocation.tool_name, payload)
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn backend(&self) -> &str {
        &self.backend
    }

    async fn connect(&self) -> Result<(), McpError> {
        let mut slot = self.client.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let config = StreamableHttpClientTransportConfig::with_uri(self.url.as_str());
        let transport = StreamableHttpClientTransport::with_client(self.http.clone(), config);
        let client = tokio::time::timeout(INIT_TIMEOUT, ().serve(transport))
            .await
            .map_err(|_| McpError::Timeout {
                backend: self.backend.clone(),
                operation: methods::INITIALIZE.into(),
                timeout_ms: INIT_TIMEOUT.as_millis() as u64,
            })?
            .map_err(|e| McpError::Connection {
                backend: self.backend.clone(),
                reason: format!("{}: {e}", self.url),
            })?;

        *slot = Some(client);
        tracing::info!(backend = %self.backend, url = %self.url, "connected to tool server");
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let tools = self
            .peer()
            .await?
            .list_all_tools()
            .await
            .map_err(|e| self.map_service_error(methods::LIST_TOOLS, e))?;

        Ok(tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.name.into_owned(),
                description: tool.description.map(Cow::into_owned).unwrap_or_default(),
                input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, McpError> {
        match self.peer().await?.list_all_resources().await {
            Ok(resources) => resources
                .into_iter()
                .map(|resource| self.convert(methods::LIST_RESOURCES, resource))
                .collect(),
            // Tools-only servers.
            Err(ServiceError::McpError(err)) if err.code.0 == error_codes::METHOD_NOT_FOUND => {
                Ok(Vec::new())
            }
            Err(e) => Err(self.map_service_error(methods::LIST_RESOURCES, e)),
        }
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, McpError> {
        let read = self
            .peer()
            .await?
            .read_resource(ReadResourceRequestParam { uri: uri.to_string() })
            .await
            .map_err(|e| self.map_service_error(uri, e))?;
        self.convert(methods::READ_RESOURCE, read.contents)
    }

    async fn call(&self, invocation: &Invocation) -> InvocationResult {
        let start = Instant::now();
        let outcome = self.call_inner(invocation).await;
        let elapsed = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(payload) => InvocationResult::success(invocation, payload, elapsed),
            Err(e) => InvocationResult::failure(invocation, e, elapsed),
        }
    }

    /// Cancel the running client; `rmcp` ends the session on the way out.
    async fn close(&self) -> Result<(), McpError> {
        let Some(client) = self.client.lock().await.take() else {
            return Ok(());
        };
        client.cancel().await.map_err(|e| McpError::Connection {
            backend: self.backend.clone(),
            reason: format!("client task failed: {e}"),
        })?;
        tracing::debug!(backend = %self.backend, "session closed");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, Bytes};
    use axum::http::{HeaderMap as RequestHeaders, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::StreamExt;
    use serde_json::{json, Value};

    /// A minimal remote tool server. `initialize` needs the `x-api-key`
    /// header; `tools/call` answers over an event stream whose frame is cut
    /// inside the `°` of "°C", with a pause between the two halves.
    async fn handle(headers: RequestHeaders, Json(message): Json<Value>) -> Response {
        let Some(id) = message.get("id").cloned() else {
            return StatusCode::ACCEPTED.into_response();
        };
        match message["method"].as_str() {
            Some("initialize") => {
                if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("secret") {
                    return StatusCode::UNAUTHORIZED.into_response();
                }
                let mut response = Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": "2025-03-26",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "remote", "version": "0.1.0"}
                    }
                }))
                .into_response();
                response
                    .headers_mut()
                    .insert("mcp-session-id", "s-1".parse().unwrap());
                response
            }
            Some("tools/call") if message["params"]["name"] == "strict" => Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32602, "message": "'a' must be a number"}
            }))
            .into_response(),
            Some("tools/call") => {
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"content": [{"type": "text", "text": "Temperature: 11.5°C"}], "isError": false}
                });
                let frame = format!("event: message\ndata: {reply}\n\n").into_bytes();
                let cut = frame.iter().position(|b| *b == 0xC2).unwrap() + 1;
                let (head, tail) = frame.split_at(cut);
                let halves = vec![(0, head.to_vec()), (50, tail.to_vec())];
                let body = futures::stream::iter(halves).then(|(pause, bytes)| async move {
                    tokio::time::sleep(Duration::from_millis(pause)).await;
                    Ok::<_, std::io::Error>(Bytes::from(bytes))
                });
                Response::builder()
                    .header("content-type", "text/event-stream")
                    .body(Body::from_stream(body))
                    .unwrap()
            }
            _ => Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "method not found"}
            }))
            .into_response(),
        }
    }

    async fn spawn_remote() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, Router::new().route("/mcp", post(handle))).await;
        });
        format!("http://{addr}/mcp")
    }

    fn keyed() -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("x-api-key".to_string(), "secret".to_string());
        headers
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let err = StreamableHttpTransport::new("weather", "http://localhost:1/mcp", &headers)
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Config { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        // Bind then drop to get a port nothing is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            StreamableHttpTransport::new("weather", &format!("http://{addr}/mcp"), &BTreeMap::new())
                .unwrap();
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, McpError::Connection { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_rejected_initialize_fails_connect() {
        let url = spawn_remote().await;
        let transport = StreamableHttpTransport::new("weather", &url, &BTreeMap::new()).unwrap();
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, McpError::Connection { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks_survives() {
        let url = spawn_remote().await;
        let transport = StreamableHttpTransport::new("weather", &url, &keyed()).unwrap();
        transport.connect().await.unwrap();

        let inv = Invocation::new("get_current_weather", json!({"city": "Oslo"}));
        let payload = transport.call(&inv).await.outcome.unwrap();
        assert_eq!(payload.text(), "Temperature: 11.5°C");

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_params_reply_is_validation_error() {
        let url = spawn_remote().await;
        let transport = StreamableHttpTransport::new("weather", &url, &keyed()).unwrap();
        transport.connect().await.unwrap();

        let result = transport.call(&Invocation::new("strict", json!({"a": "x"}))).await;
        match result.outcome {
            Err(McpError::Validation { tool, reason }) => {
                assert_eq!(tool, "strict");
                assert!(reason.contains("must be a number"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_tools_only_server_lists_no_resources() {
        let url = spawn_remote().await;
        let transport = StreamableHttpTransport::new("weather", &url, &keyed()).unwrap();
        transport.connect().await.unwrap();
        assert!(transport.list_resources().await.unwrap().is_empty());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_before_connect_fails_fast() {
        let transport =
            StreamableHttpTransport::new("weather", "http://127.0.0.1:9/mcp", &BTreeMap::new())
                .unwrap();
        let inv = Invocation::new("get_current_weather", json!({"city": "Paris"}));
        let result = transport.call(&inv).await;
        assert!(matches!(result.outcome, Err(McpError::Connection { .. })));
    }
}
