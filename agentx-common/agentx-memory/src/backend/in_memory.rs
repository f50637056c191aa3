use async_trait::async_trait;
use agentx_traits::{BackendError, MemoryBackend};
use agentx_types::{InteractionType, MemoryEntry, MemoryId, ScoredEntry};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::rank_by_similarity;

/// Process-local backend; entries are kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: VecDeque<MemoryEntry>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn insert(&mut self, entry: MemoryEntry) -> Result<(), BackendError> {
        if self.entries.iter().any(|e| e.id == entry.id) {
            return Err(BackendError::new(format!("duplicate memory id {}", entry.id)));
        }
        self.entries.push_back(entry);
        Ok(())
    }

    async fn remove(&mut self, id: &str) -> Result<Option<MemoryEntry>, BackendError> {
        let pos = self.entries.iter().position(|e| e.id == id);
        Ok(pos.and_then(|i| self.entries.remove(i)))
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, BackendError> {
        Ok(self.entries.iter().find(|e| e.id == id).cloned())
    }

    async fn len(&self) -> Result<usize, BackendError> {
        Ok(self.entries.len())
    }

    async fn oldest(&self) -> Result<Option<MemoryEntry>, BackendError> {
        // min_by_key returns the first minimum, so insertion order breaks ties
        Ok(self.entries.iter().min_by_key(|e| e.created_at).cloned())
    }

    async fn recent(
        &self,
        limit: usize,
        interaction_type: Option<&InteractionType>,
    ) -> Result<Vec<MemoryEntry>, BackendError> {
        let mut matching: Vec<&MemoryEntry> = self
            .entries
            .iter()
            .rev()
            .filter(|e| interaction_type.map_or(true, |t| &e.interaction_type == t))
            .collect();
        // stable: equal timestamps stay newest-inserted first
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching.into_iter().take(limit).cloned().collect())
    }

    async fn nearest(
        &self,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, BackendError> {
        Ok(rank_by_similarity(self.entries.iter(), query, threshold, limit))
    }

    async fn remove_older_than(
        &mut self,
        interaction_type: &InteractionType,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MemoryId>, BackendError> {
        let mut removed = Vec::new();
        self.entries.retain(|e| {
            let expired = &e.interaction_type == interaction_type && e.created_at < cutoff;
            if expired {
                removed.push(e.id.clone());
            }
            !expired
        });
        Ok(removed)
    }
}
