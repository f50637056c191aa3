//! The memory store.
//!
//! Every entry is embedded before it is stored. The number of stored
//! entries never exceeds `max_entries`: a write evicts the oldest entries
//! and then inserts while holding the backend's write lock, so readers never
//! observe more than the bound. A write whose eviction fails stores nothing.

use agentx_traits::{EmbeddingProvider, MemoryBackend};
use agentx_types::{embedding_text, InteractionType, MemoryEntry, MemoryId, ScoredEntry};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::InMemoryBackend;
use crate::config::MemoryConfig;
use crate::error::MemoryError;

pub type Result<T> = std::result::Result<T, MemoryError>;

pub struct MemoryStore {
    config: MemoryConfig,
    backend: RwLock<Box<dyn MemoryBackend>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MemoryStore {
    /// Store with a process-local backend.
    pub fn new(config: MemoryConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::with_backend(config, embedder, Box::new(InMemoryBackend::new()))
    }

    pub fn with_backend(
        config: MemoryConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        backend: Box<dyn MemoryBackend>,
    ) -> Result<Self> {
        config.validate()?;
        debug!(
            backend = backend.name(),
            max_entries = config.max_entries,
            "Memory store ready"
        );
        Ok(Self {
            config,
            backend: RwLock::new(backend),
            embedder,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Embeds and stores one interaction, evicting the oldest entries if the
    /// store is full.
    ///
    /// Fails with `EmbeddingUnavailable` if the embedding provider fails;
    /// nothing is stored in that case.
    pub async fn record(
        &self,
        interaction_type: InteractionType,
        content: Value,
        metadata: HashMap<String, String>,
    ) -> Result<MemoryId> {
        let embedding = self.embed(&embedding_text(&content)).await?;

        let mut backend = self.backend.write().await;

        // make room first: a failed eviction must leave the new entry unwritten
        while backend.len().await? >= self.config.max_entries {
            let Some(oldest) = backend.oldest().await? else {
                break;
            };
            backend.remove(&oldest.id).await?;
            debug!(
                evicted = %oldest.id,
                interaction_type = %oldest.interaction_type,
                "Evicted oldest memory entry"
            );
        }

        let entry = MemoryEntry::new(interaction_type, content, embedding, metadata);
        let id = entry.id.clone();
        backend.insert(entry).await?;

        debug!(id = %id, "Recorded memory entry");
        Ok(id)
    }

    /// Records one conversational turn.
    pub async fn record_conversation(
        &self,
        role: &str,
        message: &str,
    ) -> Result<MemoryId> {
        let mut metadata = HashMap::new();
        metadata.insert("role".to_string(), role.to_string());
        self.record(
            InteractionType::Conversation,
            Value::String(format!("{}: {}", role, message)),
            metadata,
        )
        .await
    }

    /// Entries whose similarity to `query` is at least the configured
    /// threshold, best first. An empty result is not an error.
    pub async fn search_similar(&self, query: &str, limit: usize) -> Result<Vec<ScoredEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(query).await?;
        let backend = self.backend.read().await;
        let hits = backend
            .nearest(&query_embedding, self.config.similarity_threshold, limit)
            .await?;
        Ok(hits)
    }

    /// Newest entries first, optionally of one interaction type.
    pub async fn recent(
        &self,
        limit: usize,
        interaction_type: Option<&InteractionType>,
    ) -> Result<Vec<MemoryEntry>> {
        let backend = self.backend.read().await;
        Ok(backend.recent(limit, interaction_type).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let backend = self.backend.read().await;
        Ok(backend.get(id).await?)
    }

    pub async fn len(&self) -> Result<usize> {
        let backend = self.backend.read().await;
        Ok(backend.len().await?)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drops conversation entries older than `conversation_max_age`.
    pub async fn purge_expired_conversations(&self) -> Result<usize> {
        let max_age = chrono::Duration::from_std(self.config.conversation_max_age)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut backend = self.backend.write().await;
        let removed = backend
            .remove_older_than(&InteractionType::Conversation, cutoff)
            .await?;
        if !removed.is_empty() {
            debug!(count = removed.len(), "Purged expired conversation entries");
        }
        Ok(removed.len())
    }

    /// Recent conversation as `timestamp: text` lines, newest first.
    pub async fn conversation_context(&self, limit: usize) -> Result<String> {
        let entries = self
            .recent(limit, Some(&InteractionType::Conversation))
            .await?;
        Ok(entries
            .iter()
            .map(|e| format!("{}: {}", e.created_at.to_rfc3339(), e.text()))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.embedder.embed(text).await?;
        let expected = self.embedder.dimension();
        if embedding.len() != expected {
            return Err(agentx_types::EmbeddingError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            }
            .into());
        }
        Ok(embedding)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
