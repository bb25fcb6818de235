//! Explicit registry of everything a server exposes.
//!
//! Tools and resources share one closed [`Entry`] tag, keyed by tool name or
//! resource URI. The registry is built once at startup and never mutated
//! while serving.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::errors::ToolError;
use crate::protocol::{ResourceDescriptor, ToolDescriptor};

// ─── Parameters ──────────────────────────────────────────────────────────────

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Any JSON number; integers are accepted.
    Number,
    Integer,
    String,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// One declared parameter. The input schema is generated from these.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &str, ty: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    /// An optional parameter. `default` is applied when the caller omits it.
    pub fn optional(name: &str, ty: ParamType, description: &str, default: Option<Value>) -> Self {
        Self {
            name: name.to_string(),
            ty,
            description: description.to_string(),
            required: false,
            default,
        }
    }
}

/// Build a JSON Schema object from parameter specs.
pub fn input_schema(params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    for param in params {
        let mut prop = Map::new();
        prop.insert("type".into(), Value::from(param.ty.as_str()));
        if !param.description.is_empty() {
            prop.insert("description".into(), Value::from(param.description.clone()));
        }
        if let Some(default) = &param.default {
            prop.insert("default".into(), default.clone());
        }
        properties.insert(param.name.clone(), Value::Object(prop));
    }
    let required: Vec<Value> = params
        .iter()
        .filter(|p| p.required)
        .map(|p| Value::from(p.name.clone()))
        .collect();

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// ─── Arguments ───────────────────────────────────────────────────────────────

/// Validated call arguments, with defaults applied.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    tool: String,
    values: Map<String, Value>,
}

impl Arguments {
    pub fn new(tool: &str, values: Map<String, Value>) -> Self {
        Self {
            tool: tool.to_string(),
            values,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    fn missing(&self, name: &str) -> ToolError {
        ToolError::InvalidArguments {
            tool: self.tool.clone(),
            reason: format!("missing required field '{name}'"),
        }
    }

    pub fn number(&self, name: &str) -> Result<f64, ToolError> {
        self.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| self.missing(name))
    }

    pub fn string(&self, name: &str) -> Result<&str, ToolError> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| self.missing(name))
    }

    pub fn opt_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }
}

// ─── Tool Bodies ─────────────────────────────────────────────────────────────

/// What a tool body returns: a human-readable text plus optional structure.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub structured: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
        }
    }

    /// Serialize `value` as both the text block and the structured content.
    pub fn json(value: Value) -> Self {
        Self {
            text: value.to_string(),
            structured: Some(value),
        }
    }

    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured = Some(value);
        self
    }
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>>;

type SyncFn = dyn Fn(&Arguments) -> Result<ToolOutput, ToolError> + Send + Sync;
type AsyncFn = dyn Fn(Arguments) -> ToolFuture + Send + Sync;

/// A tool implementation.
#[derive(Clone)]
pub enum ToolBody {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl std::fmt::Debug for ToolBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolBody::Sync(_) => f.write_str("ToolBody::Sync"),
            ToolBody::Async(_) => f.write_str("ToolBody::Async"),
        }
    }
}

// ─── Entries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ToolEntry {
    pub descriptor: ToolDescriptor,
    pub params: Vec<ParamSpec>,
    pub body: ToolBody,
}

impl ToolEntry {
    /// A tool whose body runs inline on the serving task.
    pub fn sync<F>(name: &str, description: &str, params: Vec<ParamSpec>, body: F) -> Self
    where
        F: Fn(&Arguments) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
    {
        Self::build(name, description, params, ToolBody::Sync(Arc::new(body)))
    }

    /// A tool whose body awaits I/O.
    pub fn asynchronous<F, Fut>(name: &str, description: &str, params: Vec<ParamSpec>, body: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let boxed: Arc<AsyncFn> =
            Arc::new(move |args: Arguments| Box::pin(body(args)) as ToolFuture);
        Self::build(name, description, params, ToolBody::Async(boxed))
    }

    fn build(name: &str, description: &str, params: Vec<ParamSpec>, body: ToolBody) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: name.to_string(),
                description: description.to_string(),
                input_schema: input_schema(&params),
            },
            params,
            body,
        }
    }
}

/// The body of a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceBody {
    Text(String),
    Bytes(Vec<u8>),
}

type ReadFn = dyn Fn() -> Result<ResourceBody, ToolError> + Send + Sync;

#[derive(Clone)]
pub struct ResourceEntry {
    pub descriptor: ResourceDescriptor,
    pub read: Arc<ReadFn>,
}

impl ResourceEntry {
    pub fn new<F>(uri: &str, name: &str, mime_type: &str, description: &str, read: F) -> Self
    where
        F: Fn() -> Result<ResourceBody, ToolError> + Send + Sync + 'static,
    {
        Self {
            descriptor: ResourceDescriptor {
                uri: uri.to_string(),
                name: name.to_string(),
                description: (!description.is_empty()).then(|| description.to_string()),
                mime_type: Some(mime_type.to_string()),
            },
            read: Arc::new(read),
        }
    }
}

impl std::fmt::Debug for ResourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Everything a server can expose.
#[derive(Debug, Clone)]
pub enum Entry {
    Tool(ToolEntry),
    Resource(ResourceEntry),
}

impl Entry {
    fn key(&self) -> &str {
        match self {
            Entry::Tool(tool) => &tool.descriptor.name,
            Entry::Resource(resource) => &resource.descriptor.uri,
        }
    }
}

// ─── ServerRegistry ──────────────────────────────────────────────────────────

/// Name → entry map for one server.
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    name: String,
    version: String,
    entries: BTreeMap<String, Entry>,
}

impl ServerRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Add an entry. A later entry with the same key replaces the earlier one.
    pub fn with(mut self, entry: Entry) -> Self {
        if let Some(previous) = self.entries.insert(entry.key().to_string(), entry) {
            tracing::warn!(server = %self.name, key = %previous.key(), "entry registered twice, keeping the later one");
        }
        self
    }

    pub fn with_tool(self, tool: ToolEntry) -> Self {
        self.with(Entry::Tool(tool))
    }

    pub fn with_resource(self, resource: ResourceEntry) -> Self {
        self.with(Entry::Resource(resource))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Tool descriptors, ordered by name. No side effects.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools().map(|t| t.descriptor.clone()).collect()
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.entries
            .values()
            .filter_map(|entry| match entry {
                Entry::Resource(resource) => Some(resource.descriptor.clone()),
                Entry::Tool(_) => None,
            })
            .collect()
    }

    pub fn tool(&self, name: &str) -> Option<&ToolEntry> {
        match self.entries.get(name) {
            Some(Entry::Tool(tool)) => Some(tool),
            _ => None,
        }
    }

    pub fn resource(&self, uri: &str) -> Option<&ResourceEntry> {
        match self.entries.get(uri) {
            Some(Entry::Resource(resource)) => Some(resource),
            _ => None,
        }
    }

    pub fn has_resources(&self) -> bool {
        self.entries
            .values()
            .any(|entry| matches!(entry, Entry::Resource(_)))
    }

    fn tools(&self) -> impl Iterator<Item = &ToolEntry> {
        self.entries.values().filter_map(|entry| match entry {
            Entry::Tool(tool) => Some(tool),
            Entry::Resource(_) => None,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> ToolEntry {
        ToolEntry::sync(
            "echo",
            "Echo the message.",
            vec![
                ParamSpec::required("message", ParamType::String, "Text to echo"),
                ParamSpec::optional("times", ParamType::Integer, "", Some(Value::from(1))),
            ],
            |args| Ok(ToolOutput::text(args.string("message")?)),
        )
    }

    #[test]
    fn test_input_schema_from_params() {
        let schema = echo().descriptor.input_schema;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["message"]["type"], "string");
        assert_eq!(schema["properties"]["times"]["default"], 1);
        assert_eq!(schema["required"], serde_json::json!(["message"]));
    }

    #[test]
    fn test_list_tools_ordered_by_name() {
        let zeta = ToolEntry::sync("zeta", "", Vec::new(), |_| Ok(ToolOutput::text("z")));
        let registry = ServerRegistry::new("test").with_tool(zeta).with_tool(echo());
        let names: Vec<_> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "zeta"]);
    }

    #[test]
    fn test_tools_and_resources_share_the_map() {
        let registry = ServerRegistry::new("test").with_tool(echo()).with_resource(
            ResourceEntry::new("demo://greeting", "greeting", "text/plain", "", || {
                Ok(ResourceBody::Text("hi".into()))
            }),
        );
        assert!(registry.tool("echo").is_some());
        assert!(registry.tool("demo://greeting").is_none());
        assert!(registry.resource("demo://greeting").is_some());
        assert_eq!(registry.list_tools().len(), 1);
        assert_eq!(registry.list_resources().len(), 1);
        assert!(registry.has_resources());
    }

    #[test]
    fn test_later_registration_replaces() {
        let other = ToolEntry::sync("echo", "Second.", Vec::new(), |_| Ok(ToolOutput::text("")));
        let registry = ServerRegistry::new("test").with_tool(echo()).with_tool(other);
        assert_eq!(registry.tool("echo").unwrap().descriptor.description, "Second.");
    }

    #[test]
    fn test_arguments_treat_null_as_absent() {
        let mut values = Map::new();
        values.insert("category".into(), Value::Null);
        let args = Arguments::new("summarize_expenses", values);
        assert!(args.opt_string("category").is_none());
        assert!(matches!(
            args.string("category"),
            Err(ToolError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_tool_output_json() {
        let out = ToolOutput::json(serde_json::json!({"status": "success", "id": 1}));
        assert_eq!(out.structured.as_ref().unwrap()["id"], 1);
        assert!(out.text.contains("\"status\":\"success\""));
    }
}
