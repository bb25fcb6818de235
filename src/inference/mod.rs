//! Inference client: OpenAI-compatible chat completions.
//!
//! The client speaks the Chat Completions API with native tool calling, so
//! the model behind it is a config change, not a code change. It implements
//! the agent loop's `ReasoningPolicy`.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

pub use client::InferenceClient;
pub use config::ModelConfig;
pub use errors::InferenceError;
pub use types::{ChatMessage, Completion, Role, ToolCall};
