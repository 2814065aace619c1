use async_trait::async_trait;
use dashmap::DashMap;
use extract::ProviderError;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::embeddings::EmbeddingProvider;

/// Embedding provider decorator that remembers vectors by text hash.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    embeddings: DashMap<String, Vec<f32>>,
    max_entries: usize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, max_entries: usize) -> Self {
        Self {
            inner,
            embeddings: DashMap::new(),
            max_entries,
        }
    }

    fn insert(&self, key: String, embedding: Vec<f32>) {
        if self.max_entries == 0 {
            return;
        }
        if self.embeddings.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self.embeddings.iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.embeddings.remove(&key);
            }
        }
        self.embeddings.insert(key, embedding);
    }

    fn hash_text(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            embeddings_cached: self.embeddings.len(),
        }
    }

    pub fn clear(&self) {
        self.embeddings.clear();
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let key = Self::hash_text(text);
        if let Some(hit) = self.embeddings.get(&key) {
            return Ok(hit.value().clone());
        }

        let embedding = self.inner.embed(text).await?;
        self.insert(key, embedding.clone());
        Ok(embedding)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub embeddings_cached: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl EmbeddingProvider for Counting {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32])
        }
    }

    #[tokio::test]
    async fn test_repeated_text_is_embedded_once() {
        let inner = Arc::new(Counting(AtomicUsize::new(0)));
        let cache = CachedEmbedder::new(inner.clone(), 8);

        cache.embed("repo rate").await.unwrap();
        cache.embed("repo rate").await.unwrap();
        cache.embed("home loan").await.unwrap();

        assert_eq!(inner.0.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().embeddings_cached, 2);
    }

    #[tokio::test]
    async fn test_eviction_keeps_size_bounded() {
        let cache = CachedEmbedder::new(Arc::new(Counting(AtomicUsize::new(0))), 4);
        for i in 0..10 {
            cache.embed(&format!("text {}", i)).await.unwrap();
        }
        assert!(cache.stats().embeddings_cached <= 4);
    }
}
