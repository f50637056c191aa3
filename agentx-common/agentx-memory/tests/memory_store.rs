use agentx_memory::{InMemoryBackend, MemoryConfig, MemoryError, MemoryStore, SqliteBackend};
use agentx_traits::mock::MockEmbeddingProvider;
use agentx_traits::{BackendError, MemoryBackend};
use agentx_types::{InteractionType, MemoryEntry, MemoryId, ScoredEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn embedder() -> MockEmbeddingProvider {
    let embedder = MockEmbeddingProvider::new().with_dimension(3);
    embedder.preset("sql injection in login form", vec![1.0, 0.0, 0.0]);
    embedder.preset("sql injection in search form", vec![0.95, 0.05, 0.0]);
    embedder.preset("slow page load", vec![0.0, 1.0, 0.0]);
    embedder.preset("broken unit test", vec![0.0, 0.0, 1.0]);
    embedder.preset("A", vec![1.0, 0.0, 0.0]);
    embedder.preset("B", vec![0.0, 1.0, 0.0]);
    embedder.preset("C", vec![0.0, 0.0, 1.0]);
    embedder
}

fn store(config: MemoryConfig, embedder: &MockEmbeddingProvider) -> MemoryStore {
    MemoryStore::new(config, Arc::new(embedder.clone())).unwrap()
}

async fn record_text(store: &MemoryStore, text: &str) -> String {
    store
        .record(InteractionType::ScanReport, json!(text), HashMap::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn oldest_entry_is_evicted_at_capacity() {
    let embedder = embedder();
    let store = store(MemoryConfig::default().with_max_entries(2), &embedder);

    let a = record_text(&store, "A").await;
    let b = record_text(&store, "B").await;
    let c = record_text(&store, "C").await;

    assert_eq!(store.len().await.unwrap(), 2);
    assert!(store.get(&a).await.unwrap().is_none());
    assert!(store.get(&b).await.unwrap().is_some());
    assert!(store.get(&c).await.unwrap().is_some());
}

#[tokio::test]
async fn similar_search_filters_by_threshold() {
    let embedder = embedder();
    let store = store(MemoryConfig::default(), &embedder);

    record_text(&store, "sql injection in login form").await;
    record_text(&store, "slow page load").await;
    record_text(&store, "broken unit test").await;

    let hits = store
        .search_similar("sql injection in search form", 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.text(), "sql injection in login form");
    assert!(hits[0].similarity >= 0.8);
}

#[tokio::test]
async fn similar_search_on_empty_store_is_empty() {
    let embedder = embedder();
    let store = store(MemoryConfig::default(), &embedder);

    let hits = store.search_similar("slow page load", 3).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn failed_embedding_stores_nothing() {
    let embedder = embedder();
    let store = store(MemoryConfig::default(), &embedder);

    embedder.will_fail("model offline");
    let err = store
        .record(InteractionType::TaskResult, json!("A"), HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::EmbeddingUnavailable(_)));
    assert!(store.is_empty().await.unwrap());

    // one-shot failure; the next write succeeds
    record_text(&store, "A").await;
    assert_eq!(store.len().await.unwrap(), 1);
}

#[tokio::test]
async fn unavailable_embedder_fails_search() {
    let embedder = embedder();
    let store = store(MemoryConfig::default(), &embedder);
    record_text(&store, "A").await;

    embedder.set_unavailable(true);
    let err = store.search_similar("A", 1).await.unwrap_err();
    assert!(matches!(err, MemoryError::EmbeddingUnavailable(_)));
}

#[tokio::test]
async fn wrong_dimension_is_rejected() {
    let embedder = embedder();
    embedder.preset("short", vec![1.0]);
    let store = store(MemoryConfig::default(), &embedder);

    let err = store
        .record(InteractionType::TaskResult, json!("short"), HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::EmbeddingUnavailable(_)));
    assert!(store.is_empty().await.unwrap());
}

#[tokio::test]
async fn recent_is_newest_first_and_filtered() {
    let embedder = embedder();
    let store = store(MemoryConfig::default(), &embedder);

    store.record_conversation("user", "scan the site").await.unwrap();
    record_text(&store, "A").await;
    store.record_conversation("agent", "scan queued").await.unwrap();

    let all = store.recent(10, None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].text(), "agent: scan queued");

    let conversation = store
        .recent(10, Some(&InteractionType::Conversation))
        .await
        .unwrap();
    assert_eq!(conversation.len(), 2);

    let context = store.conversation_context(1).await.unwrap();
    assert!(context.ends_with(": agent: scan queued"));
    assert_eq!(context.lines().count(), 1);
}

#[tokio::test]
async fn purge_drops_only_expired_conversations() {
    let embedder = embedder();
    let config = MemoryConfig::default().with_conversation_max_age(Duration::from_millis(20));
    let store = store(config, &embedder);

    store.record_conversation("user", "hello").await.unwrap();
    record_text(&store, "A").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.record_conversation("user", "still here").await.unwrap();

    let purged = store.purge_expired_conversations().await.unwrap();
    assert_eq!(purged, 1);
    assert_eq!(store.len().await.unwrap(), 2);
}

#[tokio::test]
async fn concurrent_writers_respect_bound() {
    let embedder = embedder();
    let store = Arc::new(store(MemoryConfig::default().with_max_entries(5), &embedder));

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .record(InteractionType::TaskResult, json!({ "n": i }), HashMap::new())
                .await
                .unwrap();
            assert!(store.len().await.unwrap() <= 5);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.len().await.unwrap(), 5);
}

#[tokio::test]
async fn sqlite_backend_keeps_bound() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = embedder();
    let backend = SqliteBackend::open(dir.path().join("memory.db")).unwrap();
    let store = MemoryStore::with_backend(
        MemoryConfig::default().with_max_entries(2),
        Arc::new(embedder.clone()),
        Box::new(backend),
    )
    .unwrap();

    let a = record_text(&store, "A").await;
    record_text(&store, "B").await;
    record_text(&store, "C").await;

    assert_eq!(store.len().await.unwrap(), 2);
    assert!(store.get(&a).await.unwrap().is_none());

    let hits = store.search_similar("C", 1).await.unwrap();
    assert_eq!(hits[0].entry.text(), "C");
}

/// In-memory backend whose deletes always fail
struct NoRemoveBackend(InMemoryBackend);

#[async_trait]
impl MemoryBackend for NoRemoveBackend {
    fn name(&self) -> &str {
        "no-remove"
    }

    async fn insert(&mut self, entry: MemoryEntry) -> Result<(), BackendError> {
        self.0.insert(entry).await
    }

    async fn remove(&mut self, _id: &str) -> Result<Option<MemoryEntry>, BackendError> {
        Err(BackendError::new("remove failed"))
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, BackendError> {
        self.0.get(id).await
    }

    async fn len(&self) -> Result<usize, BackendError> {
        self.0.len().await
    }

    async fn oldest(&self) -> Result<Option<MemoryEntry>, BackendError> {
        self.0.oldest().await
    }

    async fn recent(
        &self,
        limit: usize,
        interaction_type: Option<&InteractionType>,
    ) -> Result<Vec<MemoryEntry>, BackendError> {
        self.0.recent(limit, interaction_type).await
    }

    async fn nearest(
        &self,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, BackendError> {
        self.0.nearest(query, threshold, limit).await
    }

    async fn remove_older_than(
        &mut self,
        _interaction_type: &InteractionType,
        _cutoff: DateTime<Utc>,
    ) -> Result<Vec<MemoryId>, BackendError> {
        Err(BackendError::new("remove failed"))
    }
}

#[tokio::test]
async fn failed_eviction_stores_nothing() {
    let embedder = embedder();
    let store = MemoryStore::with_backend(
        MemoryConfig::default().with_max_entries(1),
        Arc::new(embedder.clone()),
        Box::new(NoRemoveBackend(InMemoryBackend::new())),
    )
    .unwrap();

    let a = record_text(&store, "A").await;
    let err = store
        .record(InteractionType::ScanReport, json!("B"), HashMap::new())
        .await
        .unwrap_err();

    assert_eq!(err, MemoryError::Backend(BackendError::new("remove failed")));
    assert_eq!(store.len().await.unwrap(), 1);
    assert!(store.get(&a).await.unwrap().is_some());
}
