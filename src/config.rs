//! Application configuration loading.
//!
//! One YAML (or JSON) file holds the model endpoint, agent options, client
//! options and the ordered `backends` mapping. `${VAR}` and
//! `${VAR:-default}` are resolved from the environment before parsing.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::AgentOptions;
use crate::inference::ModelConfig;
use crate::mcp_client::{BackendConfig, ClientOptions, TransportConfig};

/// Overrides the config lookup when set.
pub const CONFIG_ENV: &str = "TOOLBRIDGE_CONFIG";

/// File names searched for, walking upward from the working directory.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["toolbridge.yaml", "toolbridge.yml", "toolbridge.json"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found (set --config or TOOLBRIDGE_CONFIG, or add toolbridge.yaml under {})", searched_from.display())]
    NotFound { searched_from: PathBuf },

    #[error("failed to read {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// The whole config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub agent: AgentOptions,
    pub client: ClientOptions,
    /// In file order. Collision resolution depends on it.
    #[serde(deserialize_with = "ordered_backends")]
    pub backends: Vec<BackendConfig>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate().map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })?;
        if self.client.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "client.call_timeout_ms must be positive".into(),
            });
        }
        for backend in &self.backends {
            if let TransportConfig::Stdio { command, .. } = &backend.transport {
                if command.trim().is_empty() {
                    return Err(ConfigError::Invalid {
                        reason: format!("backend '{}' has an empty command", backend.name),
                    });
                }
            }
        }
        Ok(())
    }

    /// Commands that talk to tool servers need at least one.
    pub fn require_backends(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "no backends configured".into(),
            });
        }
        Ok(())
    }
}

/// Deserialize the `backends` mapping, keeping file order.
fn ordered_backends<'de, D>(deserializer: D) -> Result<Vec<BackendConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    struct BackendsVisitor;

    impl<'de> Visitor<'de> for BackendsVisitor {
        type Value = Vec<BackendConfig>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping of backend name to transport settings")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut backends: Vec<BackendConfig> = Vec::new();
            while let Some((name, transport)) = map.next_entry::<String, TransportConfig>()? {
                if backends.iter().any(|b| b.name == name) {
                    return Err(de::Error::custom(format!("duplicate backend '{name}'")));
                }
                backends.push(BackendConfig::new(name, transport));
            }
            Ok(backends)
        }
    }

    deserializer.deserialize_any(BackendsVisitor)
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Resolve the config path.
///
/// Order: the explicit path, then `TOOLBRIDGE_CONFIG`, then the first
/// `toolbridge.{yaml,yml,json}` found walking upward from `start`.
pub fn find_config_path(explicit: Option<&Path>, start: &Path) -> Result<PathBuf, ConfigError> {
    // 1. Explicit flag
    if let Some(path) = explicit {
        return existing(path.to_path_buf());
    }

    // 2. Env var
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return existing(PathBuf::from(path));
    }

    // 3. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound {
        searched_from: start.to_path_buf(),
    })
}

fn existing(path: PathBuf) -> Result<PathBuf, ConfigError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(ConfigError::Read {
            reason: "file does not exist".into(),
            path,
        })
    }
}

/// Read, interpolate, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let config = parse_config(&raw)?;
    tracing::debug!(
        path = %path.display(),
        backends = config.backends.len(),
        model = %config.model.model,
        "config loaded"
    );
    Ok(config)
}

/// Parse config text. YAML is a superset of JSON, so both work.
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    let config: AppConfig = serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset variables become empty strings.
fn resolve_var_expr(expr: &str) -> String {
    if let Some((var_name, default)) = expr.split_once(":-") {
        std::env::var(var_name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
