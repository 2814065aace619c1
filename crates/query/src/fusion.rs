use extract::{with_timeout, CompletionProvider, CompletionRequest, ProviderError, ProviderKind};
use futures::future::join_all;
use index::{EmbeddingProvider, ScoredChunk, VectorIndex};
use ingest::Chunk;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RagConfig;

/// A chunk as seen by one query: similarity score plus fusion bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Best similarity seen across query variants.
    pub score: f32,
    /// Number of query variants that retrieved this chunk.
    pub votes: usize,
    /// 1-based position after fusion. `None` when only one list was retrieved.
    pub fusion_rank: Option<usize>,
}

impl RetrievedChunk {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }
}

fn build_expansion_prompt(question: &str, count: usize) -> String {
    format!(
        "Generate {} different search queries that would help answer the question below. \
         Vary the wording and focus. Return one query per line with no numbering or commentary.\n\n\
         Question: {}",
        count, question
    )
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return stripped.trim_start();
        }
    }
    line
}

/// Parse paraphrases from a completion reply: one per line, list markers and
/// quotes removed, duplicates and restatements of the original dropped.
pub fn parse_variants(reply: &str, original: &str, limit: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(original.trim().to_lowercase());

    let mut variants = Vec::new();
    for line in reply.lines() {
        if variants.len() >= limit {
            break;
        }
        let variant = strip_list_marker(line).trim_matches(['"', '\'']).trim();
        if variant.is_empty() || !seen.insert(variant.to_lowercase()) {
            continue;
        }
        variants.push(variant.to_string());
    }
    variants
}

/// Rank-vote fusion over per-variant result lists.
///
/// A chunk's votes are the number of lists it appears in. Ordering is votes
/// descending, then best rank in any single list, then chunk id, so the
/// result is fully determined by the input lists.
pub fn fuse(lists: &[Vec<ScoredChunk>], limit: usize) -> Vec<RetrievedChunk> {
    struct Tally {
        chunk: Chunk,
        score: f32,
        votes: usize,
        best_rank: usize,
    }

    let mut tallies: HashMap<String, Tally> = HashMap::new();
    for list in lists {
        let mut counted: HashSet<&str> = HashSet::new();
        for (rank, hit) in list.iter().enumerate() {
            if !counted.insert(hit.chunk.chunk_id.as_str()) {
                continue;
            }
            tallies
                .entry(hit.chunk.chunk_id.clone())
                .and_modify(|t| {
                    t.votes += 1;
                    t.best_rank = t.best_rank.min(rank);
                    t.score = t.score.max(hit.score);
                })
                .or_insert_with(|| Tally {
                    chunk: hit.chunk.clone(),
                    score: hit.score,
                    votes: 1,
                    best_rank: rank,
                });
        }
    }

    let mut ranked: Vec<Tally> = tallies.into_values().collect();
    ranked.sort_by(|a, b| {
        b.votes
            .cmp(&a.votes)
            .then(a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });

    let fused = lists.len() > 1;
    ranked
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, t)| RetrievedChunk {
            chunk: t.chunk,
            score: t.score,
            votes: t.votes,
            fusion_rank: fused.then_some(i + 1),
        })
        .collect()
}

/// Expands a question into paraphrases and retrieves one ranked list per variant.
pub struct FusionRetriever<'a> {
    config: &'a RagConfig,
    llm: &'a dyn CompletionProvider,
    embedder: &'a dyn EmbeddingProvider,
    vectors: &'a dyn VectorIndex,
}

impl<'a> FusionRetriever<'a> {
    pub fn new(
        config: &'a RagConfig,
        llm: &'a dyn CompletionProvider,
        embedder: &'a dyn EmbeddingProvider,
        vectors: &'a dyn VectorIndex,
    ) -> Self {
        Self {
            config,
            llm,
            embedder,
            vectors,
        }
    }

    /// The original question followed by up to `fusion_variants` paraphrases.
    /// Expansion is best-effort: any failure leaves just the original.
    pub async fn expand(&self, question: &str) -> Vec<String> {
        let mut queries = vec![question.to_string()];
        if !self.config.fusion_enabled || self.config.fusion_variants == 0 {
            return queries;
        }

        let request = CompletionRequest::judgment(build_expansion_prompt(
            question,
            self.config.fusion_variants,
        ));
        match with_timeout(
            ProviderKind::Completion,
            self.config.provider_timeout(),
            self.llm.complete(&request),
        )
        .await
        {
            Ok(reply) => {
                let variants = parse_variants(&reply, question, self.config.fusion_variants);
                if variants.len() < self.config.fusion_variants {
                    debug!(
                        requested = self.config.fusion_variants,
                        received = variants.len(),
                        "Fewer paraphrases than requested"
                    );
                }
                queries.extend(variants);
            }
            Err(e) => warn!(error = %e, "Query expansion failed, using original question only"),
        }
        queries
    }

    async fn search(&self, query: &str, timeout: Duration) -> Result<Vec<ScoredChunk>, ProviderError> {
        let vector = with_timeout(ProviderKind::Embedding, timeout, self.embedder.embed(query)).await?;
        with_timeout(
            ProviderKind::VectorIndex,
            timeout,
            self.vectors.query(&vector, self.config.top_k),
        )
        .await
    }

    /// Query the index once per variant, concurrently. Variants whose
    /// embedding or search fails contribute no list.
    pub async fn retrieve(&self, queries: &[String]) -> Vec<Vec<ScoredChunk>> {
        let timeout = self.config.provider_timeout();
        let results = join_all(queries.iter().map(|q| self.search(q, timeout))).await;

        results
            .into_iter()
            .zip(queries)
            .filter_map(|(result, query)| match result {
                Ok(hits) => Some(hits),
                Err(e) => {
                    warn!(query = %query, error = %e, "Vector retrieval failed for query variant");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::{HashingEmbedder, ScriptedCompletion};
    use index::MemoryVectorIndex;

    fn hit(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                doc_id: "doc".to_string(),
                chunk_id: id.to_string(),
                text: format!("text of {}", id),
                source: "doc.txt".to_string(),
                page: 1,
                offset: (0, 10),
            },
            score,
        }
    }

    fn ids(fused: &[RetrievedChunk]) -> Vec<&str> {
        fused.iter().map(|c| c.chunk_id()).collect()
    }

    #[test]
    fn test_fuse_orders_by_votes_then_rank_then_id() {
        let lists = vec![
            vec![hit("a", 0.9), hit("b", 0.8), hit("c", 0.7)],
            vec![hit("c", 0.95), hit("b", 0.6)],
            vec![hit("d", 0.99), hit("c", 0.5)],
        ];
        let fused = fuse(&lists, 10);

        // c: 3 votes; b: 2 votes; a and d: 1 vote, best rank 0, tie broken by id
        assert_eq!(ids(&fused), vec!["c", "b", "a", "d"]);
        assert_eq!(fused[0].votes, 3);
        assert_eq!(fused[0].score, 0.95);
        assert_eq!(fused[0].fusion_rank, Some(1));
    }

    #[test]
    fn test_fuse_is_independent_of_list_order() {
        let lists = vec![
            vec![hit("x", 0.9), hit("y", 0.8)],
            vec![hit("y", 0.9), hit("x", 0.8)],
        ];
        let reversed: Vec<_> = lists.iter().rev().cloned().collect();

        assert_eq!(ids(&fuse(&lists, 5)), vec!["x", "y"]);
        assert_eq!(fuse(&lists, 5), fuse(&reversed, 5));
    }

    #[test]
    fn test_fuse_counts_duplicates_in_one_list_once() {
        let lists = vec![vec![hit("a", 0.9), hit("a", 0.9)], vec![hit("b", 0.5)]];
        let fused = fuse(&lists, 5);
        assert_eq!(fused[0].votes, 1);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_single_list_has_no_fusion_rank() {
        let fused = fuse(&[vec![hit("a", 0.9), hit("b", 0.8)]], 1);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].fusion_rank, None);
    }

    #[test]
    fn test_parse_variants_cleans_lines() {
        let reply = "1. What did RBI do to rates?\n- \"Repo rate change\"\n\nwhat is the new repo rate?\n2) Repo rate change";
        let variants = parse_variants(reply, "What is the new repo rate?", 5);
        assert_eq!(variants, vec!["What did RBI do to rates?", "Repo rate change"]);
    }

    #[tokio::test]
    async fn test_expansion_failure_keeps_original() {
        let config = RagConfig::default();
        let llm = ScriptedCompletion::new().fail("search queries", "model unavailable");
        let embedder = HashingEmbedder::default();
        let vectors = MemoryVectorIndex::new();
        let retriever = FusionRetriever::new(&config, &llm, &embedder, &vectors);

        assert_eq!(retriever.expand("What is the repo rate?").await, vec!["What is the repo rate?"]);
    }

    #[tokio::test]
    async fn test_disabled_fusion_makes_no_call() {
        let config = RagConfig { fusion_enabled: false, ..RagConfig::default() };
        let llm = ScriptedCompletion::new();
        let embedder = HashingEmbedder::default();
        let vectors = MemoryVectorIndex::new();
        let retriever = FusionRetriever::new(&config, &llm, &embedder, &vectors);

        assert_eq!(retriever.expand("q").await.len(), 1);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_returns_one_list_per_variant() {
        let config = RagConfig::default();
        let llm = ScriptedCompletion::new().reply("search queries", "repo rate cut\nhome loan rates");
        let embedder = HashingEmbedder::default();
        let vectors = MemoryVectorIndex::new();
        for (i, text) in ["RBI cut the repo rate", "Home loan rates fall"].iter().enumerate() {
            let mut chunk = hit(&format!("c{}", i), 0.0).chunk;
            chunk.text = text.to_string();
            let vector = embedder.embed(text).await.unwrap();
            vectors.add(chunk, vector).await.unwrap();
        }
        let retriever = FusionRetriever::new(&config, &llm, &embedder, &vectors);

        let queries = retriever.expand("What is the repo rate?").await;
        assert_eq!(queries.len(), 3);
        let lists = retriever.retrieve(&queries).await;
        assert_eq!(lists.len(), 3);
        assert_eq!(lists[1][0].chunk.chunk_id, "c0");
    }
}
