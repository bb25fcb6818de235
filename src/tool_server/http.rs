//! Serve a registry over MCP streamable HTTP.
//!
//! `POST /mcp` takes one JSON-RPC message (or a batch). Responses come back
//! as a single-event `text/event-stream` body when the client accepts it,
//! otherwise as plain JSON. `initialize` issues an `Mcp-Session-Id`;
//! `DELETE /mcp` ends the session.

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::dispatch::Dispatcher;
use crate::protocol::{error_codes, methods, OutgoingResponse, SESSION_HEADER};

/// Shared state for HTTP handlers.
struct AppState {
    dispatcher: Dispatcher,
    sessions: Mutex<HashSet<String>>,
}

/// Build the `/mcp` router.
pub fn router(dispatcher: Dispatcher) -> Router {
    let state = Arc::new(AppState {
        dispatcher,
        sessions: Mutex::new(HashSet::new()),
    });
    Router::new()
        .route("/mcp", post(post_handler).delete(delete_handler))
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve_http<F>(dispatcher: Dispatcher, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve_listener(dispatcher, listener, shutdown).await
}

/// Serve on an already bound listener. Tests bind `127.0.0.1:0` and pass it here.
pub async fn serve_listener<F>(
    dispatcher: Dispatcher,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr()?;
    tracing::info!(
        server = %dispatcher.registry().name(),
        addr = %local,
        "serving streamable HTTP on /mcp"
    );
    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn post_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let wants_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));
    let session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            let resp = OutgoingResponse::failure(
                Value::Null,
                error_codes::PARSE_ERROR,
                format!("Parse error: {e}"),
            );
            return (StatusCode::BAD_REQUEST, axum::Json(resp)).into_response();
        }
    };

    let (messages, batch) = match value {
        Value::Array(items) => (items, true),
        single => (vec![single], false),
    };

    let opens_session = messages
        .iter()
        .any(|m| m.get("method").and_then(Value::as_str) == Some(methods::INITIALIZE));

    if let Some(id) = &session {
        if !opens_session && !state.sessions.lock().await.contains(id) {
            return (StatusCode::NOT_FOUND, "unknown session").into_response();
        }
    }

    let mut responses = Vec::new();
    for message in messages {
        if let Some(resp) = state.dispatcher.handle_value(message).await {
            responses.push(resp);
        }
    }

    let issued = if opens_session {
        let id = Uuid::new_v4().to_string();
        state.sessions.lock().await.insert(id.clone());
        tracing::debug!(session = %id, "session opened");
        Some(id)
    } else {
        None
    };

    // Notifications only: nothing to return.
    if responses.is_empty() {
        return with_session(StatusCode::ACCEPTED.into_response(), issued.as_deref());
    }

    let payload = if batch {
        serde_json::to_string(&responses)
    } else {
        serde_json::to_string(&responses[0])
    };
    let payload = match payload {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let response = if wants_stream {
        (
            [(header::CONTENT_TYPE, "text/event-stream"), (header::CACHE_CONTROL, "no-cache")],
            format!("event: message\ndata: {payload}\n\n"),
        )
            .into_response()
    } else {
        ([(header::CONTENT_TYPE, "application/json")], payload).into_response()
    };
    with_session(response, issued.as_deref())
}

async fn delete_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> StatusCode {
    let Some(id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST;
    };
    if state.sessions.lock().await.remove(id) {
        tracing::debug!(session = %id, "session closed");
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

fn with_session(mut response: Response, session: Option<&str>) -> Response {
    if let Some(value) = session.and_then(|s| HeaderValue::from_str(s).ok()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::http::StreamableHttpTransport;
    use crate::mcp_client::{McpError, Transport};
    use crate::tool_server::registry::{ParamSpec, ParamType, ServerRegistry, ToolEntry, ToolOutput};
    use std::collections::BTreeMap;

    async fn spawn_server() -> SocketAddr {
        let registry = ServerRegistry::new("demo").with_tool(ToolEntry::sync(
            "shout",
            "Upper-case the text.",
            vec![ParamSpec::required("text", ParamType::String, "")],
            |args| Ok(ToolOutput::text(args.string("text")?.to_uppercase())),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_listener(
            Dispatcher::new(registry),
            listener,
            std::future::pending(),
        ));
        addr
    }

    #[tokio::test]
    async fn test_client_round_trip_over_sse() {
        let addr = spawn_server().await;
        let transport =
            StreamableHttpTransport::new("demo", &format!("http://{addr}/mcp"), &BTreeMap::new())
                .unwrap();
        transport.connect().await.unwrap();

        let tools = transport.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "shout");

        let inv = crate::mcp_client::Invocation::new("shout", serde_json::json!({"text": "hi"}));
        let result = transport.call(&inv).await;
        assert_eq!(result.text(), "HI");

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_plain_json_when_stream_not_accepted() {
        let addr = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/mcp"))
            .header("accept", "application/json")
            .json(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.headers().get(SESSION_HEADER).is_some());
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "application/json"
        );
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["result"]["serverInfo"]["name"], "demo");
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_body() {
        let addr = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/mcp"))
            .json(&serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let addr = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/mcp"))
            .header(SESSION_HEADER, "no-such-session")
            .json(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let addr = spawn_server().await;
        let transport =
            StreamableHttpTransport::new("demo", &format!("http://{addr}/mcp"), &BTreeMap::new())
                .unwrap();
        transport.connect().await.unwrap();
        transport.close().await.unwrap();

        let inv = crate::mcp_client::Invocation::new("shout", serde_json::json!({"text": "x"}));
        let result = transport.call(&inv).await;
        assert!(matches!(result.outcome, Err(McpError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let addr = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/mcp"))
            .header("content-type", "application/json")
            .body("{oops")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], -32700);
    }
}
