//! End-to-end round trips through `MultiServerClient`: the built binary as a
//! stdio backend, and an in-process streamable-HTTP weather server.

use std::collections::{BTreeMap, HashMap};

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use toolbridge::mcp_client::{BackendConfig, ClientOptions, McpError, MultiServerClient, TransportConfig};
use toolbridge::servers::weather::{self, WeatherConfig};
use toolbridge::tool_server::http::serve_listener;
use toolbridge::tool_server::Dispatcher;

fn binary_backend(name: &str, server: &str, env: BTreeMap<String, String>) -> BackendConfig {
    BackendConfig::new(
        name,
        TransportConfig::Stdio {
            command: env!("CARGO_BIN_EXE_toolbridge").into(),
            args: vec!["serve".into(), server.into()],
            env,
            cwd: None,
        },
    )
}

async fn text_of(client: &MultiServerClient, tool: &str, args: serde_json::Value) -> String {
    let result = client.invoke(tool, args).await;
    result.outcome.expect("tool call failed").text()
}

#[tokio::test]
async fn pipe_round_trip_math() {
    let client = MultiServerClient::initialize(
        vec![binary_backend("math", "math", BTreeMap::new())],
        ClientOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(client.get_tools().len(), 6);
    assert_eq!(text_of(&client, "add", json!({"a": 2, "b": 3})).await, "5");
    assert_eq!(text_of(&client, "divide", json!({"a": 1, "b": 0})).await, "inf");
    assert_eq!(text_of(&client, "sqrt", json!({"value": -1})).await, "nan");

    let bad = client.invoke("add", json!({"a": "two", "b": 3})).await;
    assert!(matches!(bad.outcome, Err(McpError::Validation { .. })));

    assert!(client.shutdown().await.is_empty());
}

#[tokio::test]
async fn failed_backend_leaves_others_available() {
    let broken = BackendConfig::new(
        "broken",
        TransportConfig::Stdio {
            command: "/nonexistent/toolbridge-server".into(),
            args: vec![],
            env: BTreeMap::new(),
            cwd: None,
        },
    );
    let client = MultiServerClient::initialize(
        vec![broken, binary_backend("math", "math", BTreeMap::new())],
        ClientOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(client.startup_failures().len(), 1);
    assert_eq!(client.startup_failures()[0].backend, "broken");
    assert_eq!(client.connected_backends(), vec!["math".to_string()]);
    assert_eq!(text_of(&client, "multiply", json!({"a": 4, "b": 2.5})).await, "10");

    client.shutdown().await;
}

#[tokio::test]
async fn pipe_round_trip_expenses() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = BTreeMap::new();
    env.insert(
        "EXPENSES_DB_PATH".to_string(),
        dir.path().join("expenses.db").to_string_lossy().into_owned(),
    );
    let client = MultiServerClient::initialize(
        vec![binary_backend("expenses", "expenses", env)],
        ClientOptions::default(),
    )
    .await
    .unwrap();

    let added = text_of(
        &client,
        "add_expense",
        json!({"date": "2024-03-02", "amount": 12.5, "category": "food"}),
    )
    .await;
    assert!(added.contains("success"));

    let listed: serde_json::Value = serde_json::from_str(
        &text_of(
            &client,
            "get_expenses",
            json!({"start_date": "2024-03-01", "end_date": "2024-03-31"}),
        )
        .await,
    )
    .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["category"], "food");

    let bad_date = client
        .invoke(
            "get_expenses",
            json!({"start_date": "March", "end_date": "2024-03-31"}),
        )
        .await;
    assert!(matches!(bad_date.outcome, Err(McpError::Validation { .. })));

    let categories = client.read_resource("expense://categories").await.unwrap();
    assert_eq!(categories[0].mime_type.as_deref(), Some("application/json"));
    assert!(categories[0].text.as_deref().unwrap().contains("food"));

    client.shutdown().await;
}

// ─── Streamable HTTP ─────────────────────────────────────────────────────────

async fn mock_weather_api() -> String {
    async fn weather(Query(q): Query<HashMap<String, String>>) -> (StatusCode, Json<serde_json::Value>) {
        match q.get("q").map(String::as_str) {
            Some("Paris,FR") => (
                StatusCode::OK,
                Json(json!({
                    "weather": [{"description": "clear sky"}],
                    "main": {"temp": 18.2, "humidity": 40},
                    "wind": {"speed": 2.6}
                })),
            ),
            _ => (StatusCode::NOT_FOUND, Json(json!({"message": "city not found"}))),
        }
    }
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, Router::new().route("/weather", get(weather))).await;
    });
    format!("http://{addr}")
}

async fn weather_server(api_base: String) -> String {
    let registry = weather::registry(WeatherConfig {
        api_key: Some("test-key".into()),
        base_url: api_base,
    })
    .unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_listener(Dispatcher::new(registry), listener, std::future::pending()));
    format!("http://{addr}/mcp")
}

fn http_backend(url: String) -> BackendConfig {
    BackendConfig::new(
        "weather",
        TransportConfig::StreamableHttp {
            url,
            headers: BTreeMap::new(),
        },
    )
}

#[tokio::test]
async fn stream_round_trip_weather() {
    let url = weather_server(mock_weather_api().await).await;
    let client = MultiServerClient::initialize(vec![http_backend(url)], ClientOptions::default())
        .await
        .unwrap();

    let result = client
        .invoke("get_current_weather", json!({"city": "Paris", "country": "FR"}))
        .await;
    let payload = result.outcome.unwrap();
    let text = payload.text();
    assert!(text.contains("Temperature: 18.2°C"), "{text}");
    assert!(text.contains("Humidity: 40%"), "{text}");
    assert_eq!(payload.structured_content.unwrap()["humidity"], 40.0);

    let unknown = client
        .invoke("get_current_weather", json!({"city": "Atlantis", "country": "XX"}))
        .await;
    match unknown.outcome {
        Err(McpError::Execution { reason, .. }) => assert!(reason.contains("city not found")),
        other => panic!("expected Execution, got {other:?}"),
    }

    client.shutdown().await;
}

#[tokio::test]
async fn weather_api_outage_is_an_error_result() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_api = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);

    let url = weather_server(dead_api).await;
    let client = MultiServerClient::initialize(vec![http_backend(url)], ClientOptions::default())
        .await
        .unwrap();

    let result = client
        .invoke("get_current_weather", json!({"city": "Paris", "country": "FR"}))
        .await;
    assert!(matches!(result.outcome, Err(McpError::Execution { .. })));

    client.shutdown().await;
}
