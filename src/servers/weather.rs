//! Current-weather tool backed by an OpenWeatherMap-compatible API.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::tool_server::{ParamSpec, ParamType, ServerRegistry, ToolEntry, ToolError, ToolOutput};

/// Public OpenWeatherMap endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Upstream request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("OPEN_WEATHER_API_KEY is not set")]
    MissingApiKey,

    #[error("weather service unreachable: {reason}")]
    Network { reason: String },

    #[error("weather service timed out after {}s", REQUEST_TIMEOUT.as_secs())]
    Timeout,

    #[error("weather service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected weather response: {reason}")]
    Malformed { reason: String },
}

impl From<reqwest::Error> for WeatherError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            WeatherError::Timeout
        } else if e.is_decode() {
            WeatherError::Malformed {
                reason: e.to_string(),
            }
        } else {
            WeatherError::Network {
                reason: e.to_string(),
            }
        }
    }
}

/// Where and how to query the weather API.
#[derive(Clone)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl WeatherConfig {
    /// Read `OPEN_WEATHER_API_KEY` and, optionally, `OPEN_WEATHER_BASE_URL`.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPEN_WEATHER_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            base_url: std::env::var("OPEN_WEATHER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        }
    }
}

impl std::fmt::Debug for WeatherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ─── Upstream Payload ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OwmResponse {
    weather: Vec<OwmCondition>,
    main: OwmMain,
    wind: OwmWind,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwmError {
    #[serde(default)]
    message: String,
}

/// Current conditions for one city.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentWeather {
    pub description: String,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
}

impl CurrentWeather {
    pub fn report(&self, city: &str, country: &str) -> String {
        format!(
            "Current weather in {city}, {country}:\n\
             Description: {}\n\
             Temperature: {}°C\n\
             Humidity: {}%\n\
             Wind Speed: {} m/s",
            self.description, self.temperature, self.humidity, self.wind_speed
        )
    }
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct WeatherClient {
    http: reqwest::Client,
    config: WeatherConfig,
}

impl WeatherClient {
    pub fn new(config: WeatherConfig) -> Result<Self, WeatherError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("toolbridge-weather/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WeatherError::Network {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, config })
    }

    pub async fn current(&self, city: &str, country: &str) -> Result<CurrentWeather, WeatherError> {
        let api_key = self.config.api_key.as_deref().ok_or(WeatherError::MissingApiKey)?;
        let url = format!("{}/weather", self.config.base_url.trim_end_matches('/'));
        let query = format!("{city},{country}");

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("q", query.as_str()), ("appid", api_key), ("units", "metric")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OwmError>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(WeatherError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let payload: OwmResponse = response.json().await?;
        let description = payload
            .weather
            .into_iter()
            .next()
            .map(|c| c.description)
            .ok_or_else(|| WeatherError::Malformed {
                reason: "no weather conditions in response".into(),
            })?;

        Ok(CurrentWeather {
            description,
            temperature: payload.main.temp,
            humidity: payload.main.humidity,
            wind_speed: payload.wind.speed,
        })
    }
}

/// The weather server: `get_current_weather(city, country)`.
pub fn registry(config: WeatherConfig) -> Result<ServerRegistry, WeatherError> {
    if config.api_key.is_none() {
        tracing::warn!("OPEN_WEATHER_API_KEY is not set; weather calls will fail");
    }
    let client = std::sync::Arc::new(WeatherClient::new(config)?);

    let tool = ToolEntry::asynchronous(
        "get_current_weather",
        "Get current weather for a city.",
        vec![
            ParamSpec::required("city", ParamType::String, "City name (e.g. London)"),
            ParamSpec::required("country", ParamType::String, "Country code (e.g. GB)"),
        ],
        move |args| {
            let client = std::sync::Arc::clone(&client);
            async move {
                let city = args.string("city")?;
                let country = args.string("country")?;
                let weather = client.current(city, country).await.map_err(|e| {
                    tracing::warn!(city = %city, country = %country, error = %e, "weather lookup failed");
                    ToolError::execution("get_current_weather", e.to_string())
                })?;
                Ok(ToolOutput::text(weather.report(city, country)).with_structured(
                    serde_json::json!({
                        "description": weather.description,
                        "temperature": weather.temperature,
                        "humidity": weather.humidity,
                        "wind_speed": weather.wind_speed,
                    }),
                ))
            }
        },
    );

    Ok(ServerRegistry::new("weather").with_tool(tool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn mock_owm() -> String {
        async fn weather(Query(q): Query<HashMap<String, String>>) -> (StatusCode, Json<serde_json::Value>) {
            assert_eq!(q.get("units").map(String::as_str), Some("metric"));
            match q.get("q").map(String::as_str) {
                Some("London,GB") => (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "weather": [{"description": "light rain"}],
                        "main": {"temp": 11.5, "humidity": 87},
                        "wind": {"speed": 4.1}
                    })),
                ),
                _ => (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({"cod": "404", "message": "city not found"})),
                ),
            }
        }
        let app = Router::new().route("/weather", get(weather));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn config(base_url: String) -> WeatherConfig {
        WeatherConfig {
            api_key: Some("test-key".into()),
            base_url,
        }
    }

    #[tokio::test]
    async fn test_known_city() {
        let client = WeatherClient::new(config(mock_owm().await)).unwrap();
        let weather = client.current("London", "GB").await.unwrap();
        assert_eq!(weather.description, "light rain");
        assert_eq!(weather.humidity, 87.0);

        let report = weather.report("London", "GB");
        assert!(report.contains("Temperature: 11.5°C"));
        assert!(report.contains("Humidity: 87%"));
        assert!(report.contains("Wind Speed: 4.1 m/s"));
    }

    #[tokio::test]
    async fn test_unknown_city_is_status_error() {
        let client = WeatherClient::new(config(mock_owm().await)).unwrap();
        match client.current("Atlantis", "XX").await.unwrap_err() {
            WeatherError::Status { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "city not found");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = WeatherClient::new(config(format!("http://{addr}"))).unwrap();
        let err = client.current("London", "GB").await.unwrap_err();
        assert!(matches!(err, WeatherError::Network { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let client = WeatherClient::new(WeatherConfig {
            api_key: None,
            base_url: "http://127.0.0.1:9".into(),
        })
        .unwrap();
        assert!(matches!(
            client.current("London", "GB").await.unwrap_err(),
            WeatherError::MissingApiKey
        ));
    }

    #[tokio::test]
    async fn test_tool_failure_is_error_result() {
        let dispatcher = crate::tool_server::Dispatcher::new(registry(config(mock_owm().await)).unwrap());
        let result = dispatcher
            .call_tool(Some(serde_json::json!({
                "name": "get_current_weather",
                "arguments": {"city": "Atlantis", "country": "XX"}
            })))
            .await
            .unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("city not found"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let dbg = format!("{:?}", config("http://x".into()));
        assert!(!dbg.contains("test-key"));
    }
}
