use ingest::ChunkerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which evidence sources a query draws on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Vector,
    Graph,
    Hybrid,
}

impl RetrievalMode {
    pub fn uses_vector(self) -> bool {
        matches!(self, Self::Vector | Self::Hybrid)
    }

    pub fn uses_graph(self) -> bool {
        matches!(self, Self::Graph | Self::Hybrid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Graph => "graph",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How query complexity is estimated for adaptive depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityJudge {
    Heuristic,
    Llm,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Settings shared by ingestion and querying. Built once at startup,
/// validated, then shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Hits fetched from the vector index per query variant.
    pub top_k: usize,

    pub adaptive_depth: bool,
    pub complexity_judge: ComplexityJudge,
    pub depth_min: usize,
    pub depth_default: usize,
    pub depth_max: usize,

    pub fusion_enabled: bool,
    /// Paraphrases requested in addition to the original question.
    pub fusion_variants: usize,

    pub relevance_filter: bool,
    /// Keep the top-ranked candidate when every candidate is judged irrelevant.
    pub filter_fallback_top1: bool,
    /// Candidates handed to the filter, as a multiple of the target depth.
    pub filter_headroom: usize,

    pub default_mode: RetrievalMode,
    /// Let the completion model pick the mode instead of always using `default_mode`.
    pub classify_queries: bool,
    pub graph_enabled: bool,
    pub graph_hops: usize,
    /// Question mentions resolved against the graph, at most.
    pub mention_limit: usize,

    /// Composed context size limit, in characters.
    pub context_budget: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub provider_timeout_ms: u64,

    pub system_prompt_vector: String,
    pub system_prompt_graph: String,
    pub system_prompt_hybrid: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 5,
            adaptive_depth: true,
            complexity_judge: ComplexityJudge::Heuristic,
            depth_min: 3,
            depth_default: 5,
            depth_max: 8,
            fusion_enabled: true,
            fusion_variants: 3,
            relevance_filter: true,
            filter_fallback_top1: true,
            filter_headroom: 2,
            default_mode: RetrievalMode::Hybrid,
            classify_queries: false,
            graph_enabled: true,
            graph_hops: 1,
            mention_limit: 10,
            context_budget: 12_000,
            max_tokens: 1000,
            temperature: 0.1,
            provider_timeout_ms: 30_000,
            system_prompt_vector: "You are a precise assistant analyzing documents. \
                Quote the documents when possible."
                .to_string(),
            system_prompt_graph: "You are a knowledge graph expert. Use the entity \
                relationships to answer and explain the connections you rely on."
                .to_string(),
            system_prompt_hybrid: "You have both document excerpts and knowledge graph \
                relationships. Prioritize facts from the documents and explain entity \
                relationships when they add value."
                .to_string(),
        }
    }
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be positive"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(invalid("chunk_overlap", format!(
                "{} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(invalid("top_k", "must be positive"));
        }
        if self.depth_min == 0 {
            return Err(invalid("depth_min", "must be positive"));
        }
        if !(self.depth_min <= self.depth_default && self.depth_default <= self.depth_max) {
            return Err(invalid("depth_default", format!(
                "expected depth_min <= depth_default <= depth_max, got {} / {} / {}",
                self.depth_min, self.depth_default, self.depth_max
            )));
        }
        if self.fusion_variants > 10 {
            return Err(invalid("fusion_variants", "at most 10 paraphrases"));
        }
        if self.filter_headroom == 0 {
            return Err(invalid("filter_headroom", "must be at least 1"));
        }
        if !(1..=4).contains(&self.graph_hops) {
            return Err(invalid("graph_hops", "must be between 1 and 4"));
        }
        if self.mention_limit == 0 {
            return Err(invalid("mention_limit", "must be positive"));
        }
        if self.context_budget < 256 {
            return Err(invalid("context_budget", "must be at least 256 characters"));
        }
        if self.max_tokens == 0 {
            return Err(invalid("max_tokens", "must be positive"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("temperature", "must be within 0.0..=2.0"));
        }
        if self.provider_timeout_ms == 0 {
            return Err(invalid("provider_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn system_prompt(&self, mode: RetrievalMode) -> &str {
        match mode {
            RetrievalMode::Vector => &self.system_prompt_vector,
            RetrievalMode::Graph => &self.system_prompt_graph,
            RetrievalMode::Hybrid => &self.system_prompt_hybrid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(RagConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_out_of_range_settings_are_rejected() {
        let cases: Vec<(&str, RagConfig)> = vec![
            ("chunk_size", RagConfig { chunk_size: 0, ..RagConfig::default() }),
            ("chunk_overlap", RagConfig { chunk_overlap: 1000, ..RagConfig::default() }),
            ("depth_default", RagConfig { depth_min: 9, ..RagConfig::default() }),
            ("temperature", RagConfig { temperature: -0.5, ..RagConfig::default() }),
            ("graph_hops", RagConfig { graph_hops: 0, ..RagConfig::default() }),
        ];

        for (field, config) in cases {
            match config.validate() {
                Err(ConfigError::Invalid { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected {} to be rejected, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_partial_overrides_keep_defaults() {
        let config: RagConfig = serde_json::from_str(r#"{"top_k": 7, "default_mode": "vector"}"#).unwrap();
        assert_eq!(config.top_k, 7);
        assert_eq!(config.default_mode, RetrievalMode::Vector);
        assert_eq!(config.depth_max, 8);
    }
}
