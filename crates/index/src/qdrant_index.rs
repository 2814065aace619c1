use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::{ProviderError, ProviderKind};
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::OnceCell;

use crate::vector::{ScoredChunk, VectorIndex};

/// Vector index backed by a Qdrant collection over its REST API.
pub struct QdrantIndex {
    base_url: String,
    client: reqwest::Client,
    collection_name: String,
    // Created on first insert, once the embedding dimension is known
    collection_ready: OnceCell<()>,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct CollectionList {
    result: CollectionListResult,
}

#[derive(Deserialize)]
struct CollectionListResult {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    payload: ChunkPayload,
}

#[derive(Serialize, Deserialize)]
struct ChunkPayload {
    chunk_id: String,
    doc_id: String,
    text: String,
    source: String,
    page: u32,
    offset_start: usize,
    offset_end: usize,
}

impl QdrantIndex {
    pub fn new(base_url: String, collection_name: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            collection_name,
            collection_ready: OnceCell::new(),
        }
    }

    /// Create the collection if it does not exist yet
    pub async fn init_collection(&self, dimension: usize) -> Result<()> {
        let url = format!("{}/collections", self.base_url);
        let response = self.client.get(&url).send().await
            .context("Failed to list Qdrant collections")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to list collections: {}", response.status());
        }

        let info: CollectionList = response.json().await?;
        let exists = info.result.collections.iter()
            .any(|c| c.name == self.collection_name);

        if exists {
            tracing::debug!(collection = %self.collection_name, "Collection already exists");
            return Ok(());
        }

        let url = format!("{}/collections/{}", self.base_url, self.collection_name);
        let create_req = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine".to_string(),
            },
        };

        let response = self.client
            .put(&url)
            .json(&create_req)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to create collection: {}", error_text);
        }

        tracing::info!(collection = %self.collection_name, dimension, "Collection created");
        Ok(())
    }

    async fn upsert(&self, chunk: Chunk, vector: Vec<f32>) -> Result<()> {
        let dimension = vector.len();
        self.collection_ready
            .get_or_try_init(|| self.init_collection(dimension))
            .await?;

        let payload = ChunkPayload {
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id,
            text: chunk.text,
            source: chunk.source,
            page: chunk.page,
            offset_start: chunk.offset.0,
            offset_end: chunk.offset.1,
        };
        let payload = match serde_json::to_value(payload)? {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };

        let point = Point {
            id: Self::point_id(&chunk.chunk_id)?,
            vector,
            payload,
        };

        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection_name
        );

        let response = self.client
            .put(&url)
            .json(&UpsertPoints { points: vec![point] })
            .send()
            .await
            .context("Failed to send upsert request to Qdrant")?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to upsert point: {}", error_text);
        }

        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let url = format!("{}/collections/{}/points/search", self.base_url, self.collection_name);

        let body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true
        });

        let response = self.client.post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send search request to Qdrant")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Qdrant search failed: {}", error_text);
        }

        let result: SearchResponse = response.json().await
            .context("Failed to parse Qdrant response")?;

        Ok(result
            .result
            .into_iter()
            .map(|hit| {
                let p = hit.payload;
                ScoredChunk {
                    chunk: Chunk {
                        doc_id: p.doc_id,
                        chunk_id: p.chunk_id,
                        text: p.text,
                        source: p.source,
                        page: p.page,
                        offset: (p.offset_start, p.offset_end),
                    },
                    score: hit.score,
                }
            })
            .collect())
    }

    async fn points_count(&self) -> Result<usize> {
        let url = format!("{}/collections/{}", self.base_url, self.collection_name);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            anyhow::bail!("Failed to get collection info: {}", response.status());
        }

        let info: serde_json::Value = response.json().await?;
        Ok(info["result"]["points_count"].as_u64().unwrap_or(0) as usize)
    }

    /// Chunk ids are hex digests; their first 8 bytes make a stable point id
    fn point_id(chunk_id: &str) -> Result<u64> {
        let prefix = chunk_id.get(..16).context("Chunk id too short for a point id")?;
        u64::from_str_radix(prefix, 16).context("Chunk id is not hexadecimal")
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn add(&self, chunk: Chunk, vector: Vec<f32>) -> Result<(), ProviderError> {
        self.upsert(chunk, vector)
            .await
            .map_err(|e| ProviderError::failed(ProviderKind::VectorIndex, e))
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, ProviderError> {
        self.search(vector, k)
            .await
            .map_err(|e| ProviderError::failed(ProviderKind::VectorIndex, e))
    }

    async fn len(&self) -> Result<usize, ProviderError> {
        self.points_count()
            .await
            .map_err(|e| ProviderError::failed(ProviderKind::VectorIndex, e))
    }
}
