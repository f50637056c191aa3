use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type MemoryId = String;

/// What kind of interaction a memory entry records.
///
/// Only `Conversation` entries are subject to the age-based purge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InteractionType {
    Conversation,
    ScanReport,
    TaskResult,
    TaskFailure,
    Custom(String),
}

impl InteractionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Conversation => "conversation",
            Self::ScanReport => "scan_report",
            Self::TaskResult => "task_result",
            Self::TaskFailure => "task_failure",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for InteractionType {
    fn from(s: &str) -> Self {
        match s {
            "conversation" => Self::Conversation,
            "scan_report" => Self::ScanReport,
            "task_result" => Self::TaskResult,
            "task_failure" => Self::TaskFailure,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for InteractionType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<InteractionType> for String {
    fn from(t: InteractionType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded interaction together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryId,
    pub interaction_type: InteractionType,
    pub content: serde_json::Value,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(
        interaction_type: InteractionType,
        content: serde_json::Value,
        embedding: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            interaction_type,
            content,
            embedding,
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn text(&self) -> String {
        embedding_text(&self.content)
    }
}

/// Search hit with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub similarity: f32,
}

/// Text handed to the embedding provider for a piece of content.
/// Strings are embedded verbatim, everything else as compact JSON.
pub fn embedding_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_type_round_names() {
        assert_eq!(InteractionType::from("conversation"), InteractionType::Conversation);
        assert_eq!(
            InteractionType::from("audit_note"),
            InteractionType::Custom("audit_note".into())
        );
        assert_eq!(String::from(InteractionType::TaskFailure), "task_failure");
    }

    #[test]
    fn test_embedding_text() {
        assert_eq!(embedding_text(&serde_json::json!("hello")), "hello");
        assert_eq!(embedding_text(&serde_json::json!({"a": 1})), "{\"a\":1}");
    }
}
