use std::time::Duration;
use thiserror::Error;

/// Failure reported for one agent execution.
///
/// `Timeout` is kept distinct from `Execution` so callers can tell a slow
/// agent from a failing one; the retry policy treats both the same.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent execution failed: {0}")]
    Execution(String),

    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Agent execution cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
