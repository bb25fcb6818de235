//! MCP Client: one uniform call surface over many tool servers.
//!
//! This module handles:
//! - Spawning tool servers as child processes (stdio pipes)
//! - Talking to remote tool servers over streamable HTTP
//! - Tool discovery and merging into one flat namespace
//! - Tool call routing, validation, and timeouts
//! - Reconnect and deterministic shutdown
//!
//! The agent loop uses [`MultiServerClient`] to dispatch the tool calls the
//! reasoning policy asks for.

pub mod client;
pub mod errors;
pub mod http;
pub mod registry;
pub mod stdio;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{BackendFailure, MultiServerClient};
pub use errors::McpError;
pub use registry::{BackendListing, ToolRegistry};
pub use transport::{DefaultTransportFactory, Transport, TransportFactory};
pub use types::{
    BackendConfig, ClientOptions, CollisionPolicy, FailurePolicy, Invocation, InvocationResult,
    InvocationStatus, ToolHandle, TransportConfig,
};
