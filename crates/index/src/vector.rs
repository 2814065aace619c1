use async_trait::async_trait;
use extract::{ProviderError, ProviderKind};
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A chunk returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Add or replace a chunk's vector, keyed by chunk id.
    async fn add(&self, chunk: Chunk, vector: Vec<f32>) -> Result<(), ProviderError>;

    /// Top `k` chunks, descending by similarity.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, ProviderError>;

    async fn len(&self) -> Result<usize, ProviderError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[derive(Default)]
struct Entries {
    chunks: Vec<(Chunk, Vec<f32>)>,
    positions: HashMap<String, usize>,
}

/// Exact cosine search over vectors held in memory.
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: RwLock<Entries>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn add(&self, chunk: Chunk, vector: Vec<f32>) -> Result<(), ProviderError> {
        let mut entries = self.entries.write().await;

        if let Some((_, existing)) = entries.chunks.first() {
            if existing.len() != vector.len() {
                return Err(ProviderError::failed(
                    ProviderKind::VectorIndex,
                    format!("dimension mismatch: index holds {}, got {}", existing.len(), vector.len()),
                ));
            }
        }

        match entries.positions.get(&chunk.chunk_id).copied() {
            Some(pos) => entries.chunks[pos] = (chunk, vector),
            None => {
                let pos = entries.chunks.len();
                entries.positions.insert(chunk.chunk_id.clone(), pos);
                entries.chunks.push((chunk, vector));
            }
        }

        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, ProviderError> {
        let entries = self.entries.read().await;

        let mut scored: Vec<ScoredChunk> = entries
            .chunks
            .iter()
            .map(|(chunk, stored)| ScoredChunk {
                chunk: chunk.clone(),
                score: cosine_similarity(vector, stored),
            })
            .collect();

        // Ties resolve by chunk id so equal scores rank the same way every run
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        scored.truncate(k);

        Ok(scored)
    }

    async fn len(&self) -> Result<usize, ProviderError> {
        Ok(self.entries.read().await.chunks.len())
    }
}
