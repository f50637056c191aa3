//! # AgentX Error Types
//!
//! Centralized error handling for the orchestration core. Component
//! errors convert into [`AgentxError`] with `?`.

use agentx_memory::MemoryError;
use agentx_scheduler::{DispatchError, QueueError, RegistryError};
use agentx_traits::BackendError;
use agentx_types::{AgentError, EmbeddingError};
use thiserror::Error;

/// Result type alias for AgentX operations
pub type Result<T> = std::result::Result<T, AgentxError>;

#[derive(Error, Debug)]
pub enum AgentxError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Orchestrator lifecycle errors (not expected task failures)
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentxError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn orchestrator(msg: impl Into<String>) -> Self {
        Self::Orchestrator(msg.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let err: AgentxError = QueueError::QueueFull { max_size: 3 }.into();
        assert!(err.to_string().contains("full"));

        let err: AgentxError = MemoryError::EmbeddingUnavailable(EmbeddingError::unavailable("down")).into();
        assert!(matches!(err, AgentxError::Memory(_)));

        assert!(AgentxError::configuration("bad").is_configuration());
    }
}
