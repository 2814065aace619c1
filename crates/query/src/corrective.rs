use extract::{with_timeout, CompletionProvider, CompletionRequest, ProviderKind};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::RagConfig;
use crate::fusion::RetrievedChunk;

/// Characters of a chunk shown to the relevance judge.
pub const MAX_JUDGED_CHARS: usize = 500;

fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn build_relevance_prompt(question: &str, chunk_text: &str) -> String {
    format!(
        "Is the following document excerpt relevant to answering the question?\n\n\
         Question: {}\n\n\
         Excerpt: {}\n\n\
         Answer only yes or no.",
        question,
        excerpt(chunk_text, MAX_JUDGED_CHARS)
    )
}

fn is_affirmative(reply: &str) -> bool {
    let reply = reply.trim().to_lowercase();
    let first = reply
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");
    match first {
        "yes" => true,
        "no" => false,
        _ => reply.contains("yes"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub kept: Vec<RetrievedChunk>,
    pub judged: usize,
    pub rejected: usize,
    /// Every candidate was rejected and the top-ranked one was kept anyway.
    pub fell_back: bool,
}

pub struct RelevanceFilter<'a> {
    config: &'a RagConfig,
    llm: &'a dyn CompletionProvider,
}

impl<'a> RelevanceFilter<'a> {
    pub fn new(config: &'a RagConfig, llm: &'a dyn CompletionProvider) -> Self {
        Self { config, llm }
    }

    async fn judge(&self, question: &str, candidate: &RetrievedChunk) -> bool {
        let request = CompletionRequest::judgment(build_relevance_prompt(question, &candidate.chunk.text));
        match with_timeout(
            ProviderKind::Completion,
            self.config.provider_timeout(),
            self.llm.complete(&request),
        )
        .await
        {
            Ok(reply) => is_affirmative(&reply),
            Err(e) => {
                warn!(chunk_id = %candidate.chunk_id(), error = %e, "Relevance judgment failed, keeping chunk");
                true
            }
        }
    }

    /// Judge each candidate on its own, keep the relevant ones in their
    /// original order, truncated to `depth`.
    pub async fn filter(&self, question: &str, candidates: Vec<RetrievedChunk>, depth: usize) -> FilterOutcome {
        if !self.config.relevance_filter || candidates.is_empty() {
            let mut kept = candidates;
            kept.truncate(depth);
            return FilterOutcome {
                kept,
                judged: 0,
                rejected: 0,
                fell_back: false,
            };
        }

        let verdicts = join_all(candidates.iter().map(|c| self.judge(question, c))).await;
        let judged = candidates.len();
        let rejected = verdicts.iter().filter(|relevant| !**relevant).count();

        let top = candidates.first().cloned();
        let mut kept: Vec<RetrievedChunk> = candidates
            .into_iter()
            .zip(&verdicts)
            .filter_map(|(chunk, relevant)| relevant.then_some(chunk))
            .take(depth)
            .collect();

        let mut fell_back = false;
        if kept.is_empty() && self.config.filter_fallback_top1 {
            if let Some(top) = top {
                debug!(chunk_id = %top.chunk_id(), "All candidates rejected, keeping top-ranked chunk");
                kept.push(top);
                fell_back = true;
            }
        }

        FilterOutcome {
            kept,
            judged,
            rejected,
            fell_back,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::ScriptedCompletion;
    use ingest::Chunk;

    fn candidate(id: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                doc_id: "doc".to_string(),
                chunk_id: id.to_string(),
                text: text.to_string(),
                source: "doc.txt".to_string(),
                page: 1,
                offset: (0, text.len()),
            },
            score: 0.5,
            votes: 1,
            fusion_rank: None,
        }
    }

    fn kept_ids(outcome: &FilterOutcome) -> Vec<&str> {
        outcome.kept.iter().map(|c| c.chunk_id()).collect()
    }

    #[test]
    fn test_affirmative_parsing() {
        assert!(is_affirmative("Yes."));
        assert!(is_affirmative("  yes, it mentions the rate"));
        assert!(!is_affirmative("No. Nothing about yes-men here"));
        assert!(is_affirmative("The answer is yes"));
        assert!(!is_affirmative("irrelevant"));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let text = "é".repeat(600);
        assert_eq!(excerpt(&text, MAX_JUDGED_CHARS).chars().count(), 500);
        assert_eq!(excerpt("short", MAX_JUDGED_CHARS), "short");
    }

    #[tokio::test]
    async fn test_irrelevant_chunks_are_dropped_in_order() {
        let config = RagConfig::default();
        let llm = ScriptedCompletion::new()
            .reply("Excerpt: weather", "no")
            .reply("Excerpt:", "yes");
        let filter = RelevanceFilter::new(&config, &llm);
        let candidates = vec![
            candidate("a", "repo rate cut"),
            candidate("b", "weather is sunny"),
            candidate("c", "home loans cheaper"),
        ];

        let outcome = filter.filter("repo rate?", candidates, 5).await;
        assert_eq!(kept_ids(&outcome), vec!["a", "c"]);
        assert_eq!(outcome.judged, 3);
        assert_eq!(outcome.rejected, 1);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_all_rejected_falls_back_to_top_one() {
        let config = RagConfig::default();
        let llm = ScriptedCompletion::new().reply("Excerpt:", "no");
        let filter = RelevanceFilter::new(&config, &llm);
        let candidates = vec![candidate("a", "one"), candidate("b", "two")];

        let outcome = filter.filter("q", candidates, 3).await;
        assert_eq!(kept_ids(&outcome), vec!["a"]);
        assert!(outcome.fell_back);
    }

    #[tokio::test]
    async fn test_strict_filtering_can_return_empty() {
        let config = RagConfig { filter_fallback_top1: false, ..RagConfig::default() };
        let llm = ScriptedCompletion::new().reply("Excerpt:", "no");
        let filter = RelevanceFilter::new(&config, &llm);

        let outcome = filter.filter("q", vec![candidate("a", "one")], 3).await;
        assert!(outcome.kept.is_empty());
        assert!(!outcome.fell_back);
    }

    #[tokio::test]
    async fn test_judgment_failures_fail_open() {
        let config = RagConfig::default();
        let llm = ScriptedCompletion::new().fail("Excerpt:", "timeout talking to model");
        let filter = RelevanceFilter::new(&config, &llm);
        let candidates = vec![candidate("a", "one"), candidate("b", "two"), candidate("c", "three")];

        let outcome = filter.filter("q", candidates, 2).await;
        assert_eq!(kept_ids(&outcome), vec!["a", "b"]);
        assert_eq!(outcome.rejected, 0);
    }

    #[tokio::test]
    async fn test_disabled_filter_only_truncates() {
        let config = RagConfig { relevance_filter: false, ..RagConfig::default() };
        let llm = ScriptedCompletion::new();
        let filter = RelevanceFilter::new(&config, &llm);
        let candidates = vec![candidate("a", "one"), candidate("b", "two")];

        let outcome = filter.filter("q", candidates, 1).await;
        assert_eq!(kept_ids(&outcome), vec!["a"]);
        assert_eq!(llm.call_count(), 0);
    }
}
