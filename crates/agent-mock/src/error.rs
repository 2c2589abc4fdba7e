//! Error types for the mock agent implementation.

use kubeboot_agent::{AgentError, AgentErrorKind};
use thiserror::Error;

/// Error type for the mock agent implementation.
#[derive(Debug, Error)]
pub enum Error {
    /// Returned when the script marks a call as failing.
    #[error("Mock agent call failed: {0}")]
    CallFailed(String),

    /// Returned for every call when the script marks the agent unreachable.
    #[error("Mock agent unreachable")]
    Unreachable,

    /// Error when loading or parsing the agent config file.
    #[error("Agent config file error: {0}")]
    ConfigFile(String),
}

impl AgentError for Error {
    fn kind(&self) -> AgentErrorKind {
        match self {
            Self::CallFailed(_) => AgentErrorKind::Failed,
            Self::Unreachable => AgentErrorKind::Unreachable,
            Self::ConfigFile(_) => AgentErrorKind::Other,
        }
    }
}
