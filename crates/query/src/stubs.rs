//! Deterministic stand-ins for the external providers, for tests and demos.

use async_trait::async_trait;
use extract::{
    CompletionProvider, CompletionRequest, Entity, ExtractionProvider, ExtractionResult, ProviderError,
    ProviderKind, Relationship,
};
use index::{EmbeddingProvider, GraphStats, GraphStore, ScoredChunk, Subgraph, VectorIndex};
use ingest::Chunk;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
    Delay(Duration, String),
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    reply: Reply,
}

/// Completion provider answering from prompt-substring rules, first match
/// wins. Unmatched prompts fail. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    rules: Vec<Rule>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(mut self, needle: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            reply,
        });
        self
    }

    pub fn reply(self, needle: &str, text: &str) -> Self {
        self.rule(needle, Reply::Text(text.to_string()))
    }

    pub fn fail(self, needle: &str, message: &str) -> Self {
        self.rule(needle, Reply::Fail(message.to_string()))
    }

    /// Reply with `text` after sleeping for `delay`.
    pub fn delay(self, needle: &str, delay: Duration, text: &str) -> Self {
        self.rule(needle, Reply::Delay(delay, text.to_string()))
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Recorded requests whose prompt contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.prompt.contains(needle))
            .count()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let reply = self
            .rules
            .iter()
            .find(|rule| request.prompt.contains(&rule.needle))
            .map(|rule| rule.reply.clone());

        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(ProviderError::failed(ProviderKind::Completion, message)),
            Some(Reply::Delay(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(ProviderError::failed(ProviderKind::Completion, "no scripted reply")),
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "by", "for", "how", "in", "is", "it", "of", "on", "the", "to", "what", "will",
];

/// Bag-of-words embedder: each token is hashed into a fixed number of
/// buckets. Texts sharing words end up with high cosine similarity.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dimensions as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

fn stem(token: &str) -> &str {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        &token[..token.len() - 1]
    } else {
        token
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vector = vec![0.0; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() || STOP_WORDS.contains(&token) {
                continue;
            }
            vector[self.bucket(stem(token))] += 1.0;
        }
        Ok(vector)
    }
}

/// Extraction provider returning canned results.
///
/// `extract` merges every registered result whose needle occurs in the text.
/// `extract_mentions` returns the known names found in the question,
/// case-insensitively, in registration order.
#[derive(Debug, Default)]
pub struct ScriptedExtractor {
    extractions: Vec<(String, ExtractionResult)>,
    known_mentions: Vec<String>,
    fail_mentions: bool,
    extract_calls: AtomicUsize,
    mention_calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extraction(mut self, needle: &str, result: ExtractionResult) -> Self {
        self.extractions.push((needle.to_string(), result));
        self
    }

    pub fn mentions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_mentions.extend(names.into_iter().map(Into::into));
        self
    }

    /// Make every mention extraction fail.
    pub fn failing_mentions(mut self) -> Self {
        self.fail_mentions = true;
        self
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    pub fn mention_calls(&self) -> usize {
        self.mention_calls.load(Ordering::SeqCst)
    }
}

/// Shorthand for building canned extraction results.
pub fn extraction(entities: &[(&str, &str)], relationships: &[(&str, &str, &str)]) -> ExtractionResult {
    ExtractionResult {
        entities: entities.iter().map(|(name, ty)| Entity::new(*name, *ty)).collect(),
        relationships: relationships
            .iter()
            .map(|(source, relation, target)| Relationship::new(*source, *relation, *target))
            .collect(),
    }
}

#[async_trait]
impl ExtractionProvider for ScriptedExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ProviderError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        let mut merged = ExtractionResult::default();
        for (needle, result) in &self.extractions {
            if text.contains(needle.as_str()) {
                merged.entities.extend(result.entities.iter().cloned());
                merged.relationships.extend(result.relationships.iter().cloned());
            }
        }
        Ok(merged)
    }

    async fn extract_mentions(&self, question: &str) -> Result<Vec<String>, ProviderError> {
        self.mention_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mentions {
            return Err(ProviderError::failed(ProviderKind::Extraction, "mention extraction unavailable"));
        }
        let question = question.to_lowercase();
        Ok(self
            .known_mentions
            .iter()
            .filter(|name| question.contains(&name.to_lowercase()))
            .cloned()
            .collect())
    }
}

/// Vector index wrapper counting calls, for asserting which paths ran.
pub struct CountingVectorIndex {
    inner: Arc<dyn VectorIndex>,
    adds: AtomicUsize,
    queries: AtomicUsize,
}

impl CountingVectorIndex {
    pub fn new(inner: Arc<dyn VectorIndex>) -> Self {
        Self {
            inner,
            adds: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for CountingVectorIndex {
    async fn add(&self, chunk: Chunk, vector: Vec<f32>) -> Result<(), ProviderError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add(chunk, vector).await
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, ProviderError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(vector, k).await
    }

    async fn len(&self) -> Result<usize, ProviderError> {
        self.inner.len().await
    }
}

/// Graph store wrapper counting reads and writes separately.
pub struct CountingGraphStore {
    inner: Arc<dyn GraphStore>,
    writes: AtomicUsize,
    reads: AtomicUsize,
}

impl CountingGraphStore {
    pub fn new(inner: Arc<dyn GraphStore>) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphStore for CountingGraphStore {
    async fn upsert_entity(&self, entity: Entity) -> Result<(), ProviderError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_entity(entity).await
    }

    async fn upsert_relationship(&self, relationship: Relationship) -> Result<(), ProviderError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_relationship(relationship).await
    }

    async fn find_entity(&self, name: &str) -> Result<Option<Entity>, ProviderError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_entity(name).await
    }

    async fn neighbors(&self, entity: &Entity, hops: usize) -> Result<Subgraph, ProviderError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.neighbors(entity, hops).await
    }

    async fn stats(&self) -> Result<GraphStats, ProviderError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::cosine_similarity;

    #[tokio::test]
    async fn test_hashing_embedder_prefers_shared_words() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("What is the new repo rate?").await.unwrap();
        let close = embedder.embed("RBI cut the repo rate by 0.25%.").await.unwrap();
        let far = embedder.embed("Weather forecast for the weekend").await.unwrap();

        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn test_scripted_completion_first_rule_wins() {
        let llm = ScriptedCompletion::new().reply("repo", "first").reply("rate", "second");
        let reply = llm.complete(&CompletionRequest::judgment("repo rate")).await.unwrap();
        assert_eq!(reply, "first");

        let err = llm.complete(&CompletionRequest::judgment("weather")).await.unwrap_err();
        assert_eq!(err.provider(), ProviderKind::Completion);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_extractor_matches_mentions_case_insensitively() {
        let extractor = ScriptedExtractor::new().mentions(["RBI", "Home Loan"]);
        let mentions = extractor.extract_mentions("how are rbi and home loans connected?").await.unwrap();
        assert_eq!(mentions, vec!["RBI", "Home Loan"]);
    }
}
