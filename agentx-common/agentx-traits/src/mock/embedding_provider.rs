//! # Mock Embedding Provider
//!
//! 嵌入服务的 Mock 实现，用于测试相似度检索。

use async_trait::async_trait;
use agentx_types::EmbeddingError;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;

/// Mock 嵌入服务
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimension: usize,
    presets: Arc<Mutex<HashMap<String, Vec<f32>>>>,
    fail_next: Arc<Mutex<Option<String>>>,
    unavailable: Arc<Mutex<bool>>,
    call_count: Arc<Mutex<usize>>,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self {
            dimension: 8,
            presets: Arc::new(Mutex::new(HashMap::new())),
            fail_next: Arc::new(Mutex::new(None)),
            unavailable: Arc::new(Mutex::new(false)),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// 预设文本的嵌入向量
    pub fn preset(&self, text: impl Into<String>, embedding: Vec<f32>) {
        self.presets.lock().insert(text.into(), embedding);
    }

    /// 下一次调用失败
    pub fn will_fail(&self, message: impl Into<String>) {
        *self.fail_next.lock() = Some(message.into());
    }

    /// 持续不可用，直到再次设置为 false
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }

    /// 基于文本哈希生成确定性的单位向量
    fn deterministic_embedding(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let hash = hasher.finish();

        let mut embedding: Vec<f32> = (0..self.dimension)
            .map(|i| (((hash.wrapping_add(i as u64) % 1000) as f32) / 1000.0) * 2.0 - 1.0)
            .collect();

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        *self.call_count.lock() += 1;

        if let Some(msg) = self.fail_next.lock().take() {
            return Err(EmbeddingError::unavailable(msg));
        }
        if *self.unavailable.lock() {
            return Err(EmbeddingError::unavailable("mock provider offline"));
        }

        if let Some(preset) = self.presets.lock().get(text) {
            return Ok(preset.clone());
        }

        Ok(self.deterministic_embedding(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic() {
        let mock = MockEmbeddingProvider::new();

        let a = mock.embed("hello").await.unwrap();
        let b = mock.embed("hello").await.unwrap();
        let c = mock.embed("world").await.unwrap();

        assert_eq!(a.len(), 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_preset_and_failure() {
        let mock = MockEmbeddingProvider::new().with_dimension(3);
        mock.preset("x", vec![1.0, 0.0, 0.0]);

        assert_eq!(mock.embed("x").await.unwrap(), vec![1.0, 0.0, 0.0]);

        mock.will_fail("boom");
        assert!(mock.embed("x").await.is_err());
        assert!(mock.embed("x").await.is_ok());

        mock.set_unavailable(true);
        assert!(mock.embed("x").await.is_err());
    }
}
