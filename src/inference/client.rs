//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests and turns the reply into a
//! [`Decision`] for the agent loop. Works against Groq by default and any
//! other host that speaks the Chat Completions API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use uuid::Uuid;

use super::config::ModelConfig;
use super::errors::InferenceError;
use super::types::{ChatCompletionRequest, ChatMessage, Completion, ToolCall};
use crate::agent_core::{Decision, ReasoningPolicy};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// First retry delay; doubles on each further attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for the chat-completions endpoint.
pub struct InferenceClient {
    http: HttpClient,
    config: ModelConfig,
    api_key: Option<String>,
}

impl InferenceClient {
    /// Build a client. Does NOT check connectivity; that happens on the first
    /// request.
    pub fn from_config(config: ModelConfig) -> Result<Self, InferenceError> {
        config.validate()?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let api_key = config.resolved_api_key();
        if api_key.is_none() {
            tracing::warn!(
                base_url = %config.base_url,
                "no API key configured; requests are sent unauthenticated"
            );
        }

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.config.system_prompt.as_deref()
    }

    // ─── Chat Completion ─────────────────────────────────────────────────

    /// Send the conversation and return the model's complete reply.
    ///
    /// Retriable failures are retried up to `max_retries` times with
    /// exponential backoff.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<Completion, InferenceError> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_request(messages, tools).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retriable() && attempt < self.config.max_retries => {
                    let delay = RETRY_BACKOFF * 2u32.saturating_pow(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "inference request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempt a single request.
    async fn try_request(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<Completion, InferenceError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let has_tools = !tools.is_empty();

        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            tools: has_tools.then(|| tools.to_vec()),
            tool_choice: has_tools.then(|| "auto".to_string()),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        // Metadata only; the body can be large.
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = tools.len(),
            "=== LLM REQUEST ==="
        );

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.request_timeout_secs,
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.request_timeout_secs,
                }
            } else {
                InferenceError::MalformedResponse {
                    reason: format!("failed to read response body: {e}"),
                }
            }
        })?;

        let completion = parse_completion(&body_text)?;
        tracing::info!(
            finish_reason = completion.finish_reason.as_deref().unwrap_or("none"),
            tool_calls = completion.tool_calls.len(),
            content_len = completion.content.as_deref().map(str::len).unwrap_or(0),
            "=== LLM RESPONSE ==="
        );
        Ok(completion)
    }
}

#[async_trait]
impl ReasoningPolicy for InferenceClient {
    async fn decide(
        &self,
        history: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<Decision, InferenceError> {
        let completion = self.chat_completion(history, tools).await?;
        if completion.tool_calls.is_empty() {
            Ok(Decision::Respond(completion.content.unwrap_or_default()))
        } else {
            Ok(Decision::CallTools(completion.tool_calls))
        }
    }
}

// ─── Response Parsing ────────────────────────────────────────────────────────

/// Parse a chat-completions response body.
pub fn parse_completion(body: &str) -> Result<Completion, InferenceError> {
    #[derive(Deserialize)]
    struct Response {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: Message,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct Message {
        content: Option<String>,
        tool_calls: Option<Vec<RawToolCall>>,
    }

    #[derive(Deserialize)]
    struct RawToolCall {
        id: Option<String>,
        function: RawFunction,
    }

    #[derive(Deserialize)]
    struct RawFunction {
        name: String,
        #[serde(default)]
        arguments: Option<String>,
    }

    let resp: Response =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to parse completion: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::MalformedResponse {
            reason: "empty choices array".into(),
        })?;

    let content = choice
        .message
        .content
        .map(|c| strip_reasoning(&c))
        .filter(|c| !c.is_empty());

    let mut tool_calls = Vec::new();
    for tc in choice.message.tool_calls.unwrap_or_default() {
        let raw = tc.function.arguments.unwrap_or_default();
        let arguments = if raw.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&raw).map_err(|e| InferenceError::ToolCallParseError {
                raw_response: raw.clone(),
                reason: format!("invalid JSON in arguments for '{}': {e}", tc.function.name),
            })?
        };
        tool_calls.push(ToolCall {
            id: tc.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            name: tc.function.name,
            arguments,
        });
    }

    let finish_reason = if tool_calls.is_empty() {
        choice.finish_reason
    } else {
        Some("tool_calls".into())
    };

    Ok(Completion {
        content,
        tool_calls,
        finish_reason,
    })
}

/// Drop a leading `<think>…</think>` block emitted by reasoning models.
fn strip_reasoning(text: &str) -> String {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<think>") {
        return match rest.find("</think>") {
            Some(end) => rest[end + "</think>".len()..].trim().to_string(),
            // Unterminated: the model ran out of tokens while thinking.
            None => String::new(),
        };
    }
    text.trim().to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
