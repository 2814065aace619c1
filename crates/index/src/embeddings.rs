use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::{ProviderError, ProviderKind};
use serde::{Deserialize, Serialize};

/// Text to fixed-dimension vector. Indexing and querying must share one model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Call Ollama's embeddings endpoint for one text.
    pub async fn fetch_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .context("Failed to send request to Ollama embeddings")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embeddings returned {}: {}", status, body.trim());
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to decode Ollama embeddings response")?;
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let embedding = self
            .fetch_embedding(text)
            .await
            .map_err(|e| ProviderError::failed(ProviderKind::Embedding, e))?;
        if embedding.is_empty() {
            return Err(ProviderError::malformed(
                ProviderKind::Embedding,
                format!("model {} returned an empty vector", self.model),
            ));
        }
        Ok(embedding)
    }
}
