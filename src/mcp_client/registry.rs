//! Tool registry: merges tool catalogs across all backends into one flat
//! namespace.
//!
//! Provides:
//! - Tool lookup by name, with the owning backend
//! - The collision policy for names advertised by more than one backend
//! - Structural validation of a tool call against the advertised schema
//! - Serialization of tools into the OpenAI function-calling format
//! - "Did you mean" suggestions for unknown names

use std::collections::BTreeMap;

use super::errors::McpError;
use super::types::{CollisionPolicy, ResourceHandle, ToolHandle};
use crate::protocol::{ResourceDescriptor, ToolDescriptor};

/// Everything one backend advertised during discovery.
#[derive(Debug, Clone, Default)]
pub struct BackendListing {
    pub backend: String,
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Merged catalog across all connected backends.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    /// `tool_name → handle`, ordered by name.
    tools: BTreeMap<String, ToolHandle>,
    /// `uri → handle`.
    resources: BTreeMap<String, ResourceHandle>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge listings in configuration order.
    ///
    /// Rebuilding from the ordered listings (rather than patching in place)
    /// keeps `last_wins` ownership stable when a single backend reconnects.
    pub fn from_listings(
        listings: &[BackendListing],
        policy: CollisionPolicy,
    ) -> Result<Self, McpError> {
        let mut registry = Self::new();
        for listing in listings {
            registry.register_backend_tools(&listing.backend, listing.tools.clone(), policy)?;
            registry.register_backend_resources(&listing.backend, listing.resources.clone());
        }
        Ok(registry)
    }

    /// Register the tools of one backend.
    ///
    /// Under [`CollisionPolicy::Reject`] nothing is inserted when any name is
    /// already owned by another backend. Returns the names that were taken
    /// over from other backends.
    pub fn register_backend_tools(
        &mut self,
        backend: &str,
        tools: Vec<ToolDescriptor>,
        policy: CollisionPolicy,
    ) -> Result<Vec<String>, McpError> {
        let collisions: Vec<(String, String)> = tools
            .iter()
            .filter_map(|tool| {
                self.tools
                    .get(&tool.name)
                    .filter(|existing| existing.backend != backend)
                    .map(|existing| (tool.name.clone(), existing.backend.clone()))
            })
            .collect();

        if policy == CollisionPolicy::Reject {
            if let Some((name, owner)) = collisions.first() {
                return Err(McpError::Config {
                    reason: format!(
                        "tool '{name}' is advertised by both '{owner}' and '{backend}'"
                    ),
                });
            }
        }

        for (name, owner) in &collisions {
            tracing::warn!(
                tool = %name,
                previous = %owner,
                backend = %backend,
                "tool name collision, later backend wins"
            );
        }

        for tool in tools {
            self.tools.insert(
                tool.name.clone(),
                ToolHandle {
                    backend: backend.to_string(),
                    descriptor: tool,
                },
            );
        }

        Ok(collisions.into_iter().map(|(name, _)| name).collect())
    }

    /// Register the resources of one backend. Later backends win on URI clashes.
    pub fn register_backend_resources(&mut self, backend: &str, resources: Vec<ResourceDescriptor>) {
        for resource in resources {
            if let Some(existing) = self.resources.get(&resource.uri) {
                if existing.backend != backend {
                    tracing::warn!(
                        uri = %resource.uri,
                        previous = %existing.backend,
                        backend = %backend,
                        "resource URI collision, later backend wins"
                    );
                }
            }
            self.resources.insert(
                resource.uri.clone(),
                ResourceHandle {
                    backend: backend.to_string(),
                    descriptor: resource,
                },
            );
        }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolHandle> {
        self.tools.get(name)
    }

    /// Get the backend that owns a tool.
    pub fn backend_for(&self, tool_name: &str) -> Option<&str> {
        self.tools.get(tool_name).map(|h| h.backend.as_str())
    }

    /// Look up a resource by URI.
    pub fn resource(&self, uri: &str) -> Option<&ResourceHandle> {
        self.resources.get(uri)
    }

    /// All tool handles, ordered by name.
    pub fn handles(&self) -> impl Iterator<Item = &ToolHandle> {
        self.tools.values()
    }

    /// All resource handles, ordered by URI.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.resources.values()
    }

    /// Sorted tool names.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Sorted, deduplicated names of backends that own at least one tool.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.values().map(|h| h.backend.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Validate a tool call: tool exists and required arguments are present.
    ///
    /// This is a basic structural check. Type checking and defaults are the
    /// server's job.
    pub fn validate_tool_call(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<(), McpError> {
        let handle = self.get(tool_name).ok_or_else(|| McpError::ToolNotFound {
            name: tool_name.to_string(),
        })?;

        let Some(args_obj) = arguments.as_object() else {
            return Err(McpError::Validation {
                tool: tool_name.to_string(),
                reason: "arguments must be a JSON object".into(),
            });
        };

        if let Some(required) = handle
            .descriptor
            .input_schema
            .get("required")
            .and_then(|r| r.as_array())
        {
            for field_name in required.iter().filter_map(|f| f.as_str()) {
                if !args_obj.contains_key(field_name) {
                    return Err(McpError::Validation {
                        tool: tool_name.to_string(),
                        reason: format!("missing required field: '{field_name}'"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Generate a concise capability summary for the system prompt.
    pub fn capability_summary(&self) -> String {
        if self.is_empty() {
            return "No tools are currently available.".to_string();
        }

        let backend_names = self.backend_names();
        let backend_parts: Vec<String> = backend_names
            .iter()
            .map(|name| {
                let tools: Vec<&str> = self
                    .tools
                    .values()
                    .filter(|h| &h.backend == name)
                    .map(|h| h.name())
                    .collect();
                format!("{name} ({})", tools.join(", "))
            })
            .collect();

        let mut summary = format!(
            "Available tools ({} across {} servers): {}.",
            self.len(),
            backend_names.len(),
            backend_parts.join("; "),
        );

        if !self.resources.is_empty() {
            let uris: Vec<&str> = self.resources.keys().map(String::as_str).collect();
            summary.push_str(&format!("\nReadable resources: {}.", uris.join(", ")));
        }

        summary
    }

    /// Serialize all tool definitions into OpenAI function-calling format.
    ///
    /// Used to populate the `tools` field in chat completion requests.
    pub fn to_openai_tools(&self) -> Vec<serde_json::Value> {
        self.tools
            .values()
            .map(|handle| {
                let parameters = if handle.descriptor.input_schema.is_object() {
                    handle.descriptor.input_schema.clone()
                } else {
                    serde_json::json!({"type": "object", "properties": {}})
                };
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": handle.descriptor.name,
                        "description": handle.descriptor.description,
                        "parameters": parameters,
                    }
                })
            })
            .collect()
    }

    /// Find up to `max_results` tool names most similar to `name`, best first.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let mut scored: Vec<(String, f64)> = self
            .tools
            .keys()
            .map(|candidate| (candidate.clone(), similarity(name, candidate)))
            .filter(|(_, score)| *score > 0.3) // floor
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored.into_iter().map(|(name, _)| name).collect()
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let m = a_bytes.len();
    let n = b_bytes.len();

    // Use single-row DP for O(min(m,n)) space
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a_bytes[i - 1] != b_bytes[j - 1]);
            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity between two strings (0.0 = completely different, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    let dist = levenshtein(a, b);
    1.0 - (dist as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
