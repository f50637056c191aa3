use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::MemoryError;

pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;
pub const DEFAULT_CONVERSATION_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const DEFAULT_CONTEXT_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Hard bound on stored entries; the oldest is evicted beyond it.
    pub max_entries: usize,
    /// Minimum cosine similarity for `search_similar` hits.
    pub similarity_threshold: f32,
    /// Conversation entries older than this are dropped by the purge.
    pub conversation_max_age: Duration,
    /// How many similar past interactions are attached to new tasks.
    pub context_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            conversation_max_age: DEFAULT_CONVERSATION_MAX_AGE,
            context_limit: DEFAULT_CONTEXT_LIMIT,
        }
    }
}

impl MemoryConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_conversation_max_age(mut self, max_age: Duration) -> Self {
        self.conversation_max_age = max_age;
        self
    }

    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.max_entries == 0 {
            return Err(MemoryError::InvalidConfig("max_entries must be >= 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(MemoryError::InvalidConfig(format!(
                "similarity_threshold must be within [-1, 1] (got {})",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = MemoryConfig::default();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.similarity_threshold, 0.8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        assert!(MemoryConfig::default().with_max_entries(0).validate().is_err());
        assert!(MemoryConfig::default()
            .with_similarity_threshold(1.5)
            .validate()
            .is_err());
    }
}
