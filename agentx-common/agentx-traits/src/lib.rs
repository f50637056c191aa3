pub mod agent;
pub mod embedding;
pub mod memory;
pub mod source;

#[cfg(feature = "test-utils")]
pub mod mock;

pub use agent::AgentProvider;
pub use embedding::{cosine_similarity, EmbeddingProvider};
pub use memory::{BackendError, MemoryBackend};
pub use source::EventSource;
