use agentx_traits::BackendError;
use agentx_types::EmbeddingError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryError {
    /// The embedding provider failed; nothing was written.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(#[from] EmbeddingError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Invalid memory configuration: {0}")]
    InvalidConfig(String),
}
