//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that end a turn or the session.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The reasoning policy failed.
    #[error("{0}")]
    Policy(#[from] InferenceError),

    /// Reading input or writing output failed.
    #[error("terminal I/O failed: {reason}")]
    Io { reason: String },
}

impl AgentError {
    /// Whether the REPL should report the error and keep going.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AgentError::Policy(e) => e.is_recoverable(),
            AgentError::Io { .. } => false,
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Io {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability_follows_policy_error() {
        let transient = AgentError::from(InferenceError::Timeout { duration_secs: 60 });
        assert!(transient.is_recoverable());

        let auth = AgentError::from(InferenceError::HttpError {
            status: 401,
            body: String::new(),
        });
        assert!(!auth.is_recoverable());

        let io = AgentError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"));
        assert!(!io.is_recoverable());
    }
}
