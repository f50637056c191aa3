use async_trait::async_trait;
use agentx_types::{InteractionType, MemoryEntry, MemoryId, ScoredEntry};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Memory backend error: {0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Durable storage for memory entries with a vector index.
///
/// Backends do not enforce any size bound; the memory store does. Write
/// methods take `&mut self` because the store serializes them behind its
/// own lock.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn insert(&mut self, entry: MemoryEntry) -> Result<(), BackendError>;

    async fn remove(&mut self, id: &str) -> Result<Option<MemoryEntry>, BackendError>;

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, BackendError>;

    async fn len(&self) -> Result<usize, BackendError>;

    /// Oldest entry by `created_at`; insertion order breaks ties.
    async fn oldest(&self) -> Result<Option<MemoryEntry>, BackendError>;

    /// Newest first, optionally restricted to one interaction type.
    async fn recent(
        &self,
        limit: usize,
        interaction_type: Option<&InteractionType>,
    ) -> Result<Vec<MemoryEntry>, BackendError>;

    /// Entries whose cosine similarity to `query` is at least `threshold`,
    /// best match first, at most `limit` of them.
    async fn nearest(
        &self,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, BackendError>;

    /// Deletes entries of one type created before `cutoff` and returns their ids.
    async fn remove_older_than(
        &mut self,
        interaction_type: &InteractionType,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MemoryId>, BackendError>;
}
