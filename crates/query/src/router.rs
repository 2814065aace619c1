use extract::{with_timeout, CompletionProvider, CompletionRequest, ProviderKind};
use tracing::{debug, warn};

use crate::config::{RagConfig, RetrievalMode};

fn build_routing_prompt(question: &str) -> String {
    format!(
        r#"Classify how this question should be answered.

- vector: needs specific facts, numbers or quotes from documents
- graph: asks about relationships or connections between entities
- hybrid: needs both facts and relationships

Question: {}

Reply with exactly one word: vector, graph or hybrid."#,
        question
    )
}

/// Pick the mode named earliest in a classifier reply.
pub fn parse_mode(reply: &str) -> Option<RetrievalMode> {
    let reply = reply.to_lowercase();
    [RetrievalMode::Vector, RetrievalMode::Graph, RetrievalMode::Hybrid]
        .into_iter()
        .filter_map(|mode| reply.find(mode.as_str()).map(|pos| (pos, mode)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, mode)| mode)
}

pub struct QueryRouter<'a> {
    config: &'a RagConfig,
    llm: &'a dyn CompletionProvider,
}

impl<'a> QueryRouter<'a> {
    pub fn new(config: &'a RagConfig, llm: &'a dyn CompletionProvider) -> Self {
        Self { config, llm }
    }

    /// Decide the retrieval mode. Never fails: classifier problems fall back
    /// to the configured default.
    pub async fn route(&self, question: &str, forced: Option<RetrievalMode>) -> RetrievalMode {
        let mode = match forced {
            Some(mode) => mode,
            None if self.config.classify_queries => self.classify(question).await,
            None => self.config.default_mode,
        };

        if !self.config.graph_enabled && mode.uses_graph() {
            debug!(requested = %mode, "Graph retrieval disabled, using vector mode");
            return RetrievalMode::Vector;
        }
        mode
    }

    async fn classify(&self, question: &str) -> RetrievalMode {
        let request = CompletionRequest::judgment(build_routing_prompt(question));
        let reply = with_timeout(
            ProviderKind::Completion,
            self.config.provider_timeout(),
            self.llm.complete(&request),
        )
        .await;

        match reply {
            Ok(reply) => match parse_mode(&reply) {
                Some(mode) => mode,
                None => {
                    warn!(reply = %reply.trim(), "Unrecognized routing reply, using default mode");
                    self.config.default_mode
                }
            },
            Err(e) => {
                warn!(error = %e, "Query classification failed, using default mode");
                self.config.default_mode
            }
        }
    }
}
