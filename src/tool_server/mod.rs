//! Tool server: hosts named tools and resources over one transport.
//!
//! A server is an explicit [`ServerRegistry`] of tagged entries, a
//! transport-agnostic [`Dispatcher`], and one of two front ends:
//! line-delimited JSON-RPC on stdio, or MCP streamable HTTP via axum.

pub mod dispatch;
pub mod errors;
pub mod http;
pub mod registry;
pub mod schema;
pub mod stdio;

pub use dispatch::Dispatcher;
pub use errors::ToolError;
pub use registry::{
    Arguments, Entry, ParamSpec, ParamType, ResourceBody, ResourceEntry, ServerRegistry, ToolBody,
    ToolEntry, ToolOutput,
};
