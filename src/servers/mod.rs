//! Built-in tool servers, runnable with `toolbridge serve <name>`.

pub mod expenses;
pub mod math;
pub mod weather;

use std::fmt;
use std::str::FromStr;

use crate::tool_server::ServerRegistry;

/// The servers this binary can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinServer {
    Math,
    Weather,
    Expenses,
}

impl BuiltinServer {
    pub const ALL: [BuiltinServer; 3] = [Self::Math, Self::Weather, Self::Expenses];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Math => "math",
            Self::Weather => "weather",
            Self::Expenses => "expenses",
        }
    }

    /// Build the registry, reading any settings from the environment.
    pub fn registry(&self) -> Result<ServerRegistry, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            Self::Math => math::registry(),
            Self::Weather => weather::registry(weather::WeatherConfig::from_env())?,
            Self::Expenses => expenses::registry(expenses::ExpensesConfig::from_env())?,
        })
    }
}

impl fmt::Display for BuiltinServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinServer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|server| server.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown server '{s}' (expected math, weather or expenses)"))
    }
}
