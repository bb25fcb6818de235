//! Multi-server client: high-level interface for tool execution.
//!
//! Owns one transport adapter per configured backend, merges their catalogs
//! into one [`ToolRegistry`], and routes each invocation to the owning
//! adapter. This is the primary API used by the agent loop.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Mutex;

use super::errors::McpError;
use super::registry::{BackendListing, ToolRegistry};
use super::transport::{DefaultTransportFactory, Transport, TransportFactory};
use super::types::{BackendConfig, ClientOptions, FailurePolicy, Invocation, InvocationResult};
use crate::protocol::ResourceContents;

/// A backend that could not be brought up or shut down cleanly.
#[derive(Debug, Clone)]
pub struct BackendFailure {
    pub backend: String,
    pub error: McpError,
}

// ─── MultiServerClient ──────────────────────────────────────────────────────

/// Client that manages multiple backends and routes tool calls.
pub struct MultiServerClient {
    /// Backend configurations, in configuration order.
    configs: Vec<BackendConfig>,
    options: ClientOptions,
    factory: Arc<dyn TransportFactory>,
    /// Connected adapters by backend name.
    adapters: RwLock<HashMap<String, Arc<dyn Transport>>>,
    /// Per-config discovery results, parallel to `configs`.
    listings: Mutex<Vec<Option<BackendListing>>>,
    /// Current merged catalog. Swapped whole on reconnect.
    catalog: RwLock<Arc<ToolRegistry>>,
    /// Backends that failed during `initialize`.
    startup_failures: Vec<BackendFailure>,
}

impl MultiServerClient {
    /// Connect every configured backend and build the merged catalog.
    pub async fn initialize(
        configs: Vec<BackendConfig>,
        options: ClientOptions,
    ) -> Result<Self, McpError> {
        Self::initialize_with(configs, options, Arc::new(DefaultTransportFactory)).await
    }

    /// Like [`initialize`](Self::initialize), with a custom adapter factory.
    pub async fn initialize_with(
        configs: Vec<BackendConfig>,
        options: ClientOptions,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, McpError> {
        let mut seen = HashSet::new();
        for config in &configs {
            if !seen.insert(config.name.as_str()) {
                return Err(McpError::Config {
                    reason: format!("backend '{}' is configured more than once", config.name),
                });
            }
        }

        // Discover concurrently; merge in configuration order below.
        let outcomes = join_all(
            configs
                .iter()
                .map(|config| connect_backend(factory.as_ref(), config, options.call_timeout_ms)),
        )
        .await;

        let mut adapters: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        let mut listings: Vec<Option<BackendListing>> = Vec::with_capacity(configs.len());
        let mut failures = Vec::new();

        for (config, outcome) in configs.iter().zip(outcomes) {
            match outcome {
                Ok((adapter, listing)) => {
                    tracing::info!(
                        backend = %config.name,
                        transport = config.transport.kind(),
                        tools = listing.tools.len(),
                        resources = listing.resources.len(),
                        "backend connected"
                    );
                    adapters.insert(config.name.clone(), adapter);
                    listings.push(Some(listing));
                }
                Err(error) => {
                    tracing::warn!(backend = %config.name, error = %error, "backend failed to start");
                    failures.push(BackendFailure {
                        backend: config.name.clone(),
                        error,
                    });
                    listings.push(None);
                }
            }
        }

        if options.failure_policy == FailurePolicy::Abort {
            if let Some(first) = failures.into_iter().next() {
                close_all(adapters).await;
                return Err(first.error);
            }
            failures = Vec::new();
        }

        let merged: Vec<BackendListing> = listings.iter().flatten().cloned().collect();
        let registry = match ToolRegistry::from_listings(&merged, options.collision_policy) {
            Ok(registry) => registry,
            Err(e) => {
                close_all(adapters).await;
                return Err(e);
            }
        };

        tracing::info!(
            tools = registry.len(),
            backends = adapters.len(),
            failed = failures.len(),
            "tool catalog ready"
        );

        Ok(Self {
            configs,
            options,
            factory,
            adapters: RwLock::new(adapters),
            listings: Mutex::new(listings),
            catalog: RwLock::new(Arc::new(registry)),
            startup_failures: failures,
        })
    }

    // ─── Catalog ─────────────────────────────────────────────────────────

    /// Read-only snapshot of the merged catalog.
    pub fn get_tools(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.catalog.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn adapter(&self, backend: &str) -> Option<Arc<dyn Transport>> {
        self.adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(backend)
            .cloned()
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Execute a tool call, routing to the owning backend.
    pub async fn invoke(&self, tool_name: &str, arguments: serde_json::Value) -> InvocationResult {
        self.dispatch(&Invocation::new(tool_name, arguments)).await
    }

    /// Execute a prepared invocation.
    ///
    /// Steps:
    /// 1. Validate the tool exists and required arguments are present
    /// 2. Find the owning adapter
    /// 3. Forward the call, bounded by the call timeout
    pub async fn dispatch(&self, invocation: &Invocation) -> InvocationResult {
        let start = Instant::now();
        let catalog = self.get_tools();

        if let Err(e) = catalog.validate_tool_call(&invocation.tool_name, &invocation.arguments) {
            tracing::info!(tool = %invocation.tool_name, error = %e, "tool call rejected before dispatch");
            return InvocationResult::failure(invocation, e, 0);
        }

        let Some(backend) = catalog.backend_for(&invocation.tool_name) else {
            let error = McpError::ToolNotFound {
                name: invocation.tool_name.clone(),
            };
            return InvocationResult::failure(invocation, error, 0);
        };

        let Some(adapter) = self.adapter(backend) else {
            let error = McpError::Connection {
                backend: backend.to_string(),
                reason: "backend is not connected".into(),
            };
            return InvocationResult::failure(invocation, error, elapsed_ms(start));
        };

        let timeout = Duration::from_millis(self.options.call_timeout_ms);
        let result = match tokio::time::timeout(timeout, adapter.call(invocation)).await {
            Ok(result) => result,
            Err(_) => InvocationResult::failure(
                invocation,
                McpError::Timeout {
                    backend: backend.to_string(),
                    operation: format!("tools/call {}", invocation.tool_name),
                    timeout_ms: self.options.call_timeout_ms,
                },
                elapsed_ms(start),
            ),
        };

        match result.error() {
            None => tracing::info!(
                tool = %result.tool_name,
                backend = %backend,
                correlation_id = %result.correlation_id,
                elapsed_ms = result.execution_time_ms,
                "tool call succeeded"
            ),
            Some(e) => tracing::warn!(
                tool = %result.tool_name,
                backend = %backend,
                correlation_id = %result.correlation_id,
                kind = e.kind(),
                error = %e,
                "tool call failed"
            ),
        }
        result
    }

    /// Read a resource from the backend that listed it.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, McpError> {
        let catalog = self.get_tools();
        let handle = catalog.resource(uri).ok_or_else(|| McpError::ResourceNotFound {
            uri: uri.to_string(),
        })?;
        let adapter = self
            .adapter(&handle.backend)
            .ok_or_else(|| McpError::Connection {
                backend: handle.backend.clone(),
                reason: "backend is not connected".into(),
            })?;

        let timeout = Duration::from_millis(self.options.call_timeout_ms);
        tokio::time::timeout(timeout, adapter.read_resource(uri))
            .await
            .map_err(|_| McpError::Timeout {
                backend: handle.backend.clone(),
                operation: format!("resources/read {uri}"),
                timeout_ms: self.options.call_timeout_ms,
            })?
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Close, reconnect and re-list one backend, then rebuild the catalog.
    ///
    /// Returns the number of tools the backend now advertises.
    pub async fn reconnect(&self, backend: &str) -> Result<usize, McpError> {
        let index = self
            .configs
            .iter()
            .position(|c| c.name == backend)
            .ok_or_else(|| McpError::Config {
                reason: format!("no configuration for backend '{backend}'"),
            })?;

        // Held across the rebuild so concurrent reconnects serialize.
        let mut listings = self.listings.lock().await;

        let old = self
            .adapters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(backend);
        if let Some(old) = old {
            if let Err(e) = old.close().await {
                tracing::warn!(backend = %backend, error = %e, "error closing backend before reconnect");
            }
        }

        let (adapter, listing) = match connect_backend(
            self.factory.as_ref(),
            &self.configs[index],
            self.options.call_timeout_ms,
        )
        .await
        {
            Ok(connected) => connected,
            Err(e) => {
                listings[index] = None;
                self.rebuild_catalog(&listings)?;
                return Err(e);
            }
        };
        let tool_count = listing.tools.len();

        let mut candidate = listings.clone();
        candidate[index] = Some(listing);
        if let Err(e) = self.rebuild_catalog(&candidate) {
            let _ = adapter.close().await;
            listings[index] = None;
            self.rebuild_catalog(&listings)?;
            return Err(e);
        }
        *listings = candidate;

        self.adapters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(backend.to_string(), adapter);

        tracing::info!(backend = %backend, tools = tool_count, "backend reconnected");
        Ok(tool_count)
    }

    fn rebuild_catalog(&self, listings: &[Option<BackendListing>]) -> Result<(), McpError> {
        let merged: Vec<BackendListing> = listings.iter().flatten().cloned().collect();
        let registry = ToolRegistry::from_listings(&merged, self.options.collision_policy)?;
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(registry);
        Ok(())
    }

    /// Close every adapter, collecting failures rather than stopping at the first.
    pub async fn shutdown(&self) -> Vec<BackendFailure> {
        let adapters: HashMap<String, Arc<dyn Transport>> =
            std::mem::take(&mut *self.adapters.write().unwrap_or_else(|e| e.into_inner()));
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(ToolRegistry::new());

        let failures = close_all(adapters).await;
        if failures.is_empty() {
            tracing::info!("all backends shut down");
        }
        failures
    }

    // ─── Status ──────────────────────────────────────────────────────────

    /// Backends that failed during initialization (empty under `abort`).
    pub fn startup_failures(&self) -> &[BackendFailure] {
        &self.startup_failures
    }

    /// Names of connected backends, sorted.
    pub fn connected_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Names of all configured backends, in configuration order.
    pub fn configured_backends(&self) -> Vec<&str> {
        self.configs.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Build, connect and list one backend. The adapter is closed on failure.
///
/// The handshake is bounded by the adapter itself; the listing phase is
/// bounded by `list_timeout_ms`.
async fn connect_backend(
    factory: &dyn TransportFactory,
    config: &BackendConfig,
    list_timeout_ms: u64,
) -> Result<(Arc<dyn Transport>, BackendListing), McpError> {
    let adapter = factory.build(config)?;

    let listing = async {
        let tools = adapter.list_tools().await?;
        let resources = match adapter.list_resources().await {
            Ok(resources) => resources,
            Err(e) => {
                tracing::warn!(backend = %config.name, error = %e, "resource listing failed, continuing without resources");
                Vec::new()
            }
        };
        Ok::<_, McpError>(BackendListing {
            backend: config.name.clone(),
            tools,
            resources,
        })
    };

    let discovered = async {
        adapter.connect().await?;
        tokio::time::timeout(Duration::from_millis(list_timeout_ms), listing)
            .await
            .map_err(|_| McpError::Timeout {
                backend: config.name.clone(),
                operation: "discovery".into(),
                timeout_ms: list_timeout_ms,
            })?
    }
    .await;

    match discovered {
        Ok(listing) => Ok((adapter, listing)),
        Err(e) => {
            let _ = adapter.close().await;
            Err(e)
        }
    }
}

async fn close_all(adapters: HashMap<String, Arc<dyn Transport>>) -> Vec<BackendFailure> {
    let results = join_all(adapters.into_iter().map(|(name, adapter)| async move {
        let outcome = adapter.close().await;
        (name, outcome)
    }))
    .await;

    results
        .into_iter()
        .filter_map(|(backend, outcome)| {
            outcome.err().map(|error| {
                tracing::warn!(backend = %backend, error = %error, "error closing backend");
                BackendFailure { backend, error }
            })
        })
        .collect()
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ─── Tests ───────────────────────────────────────────────────────────────────
