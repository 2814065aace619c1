pub mod error;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod schema;

pub use error::{with_timeout, ProviderError, ProviderKind};
pub use llm::{CompletionProvider, CompletionRequest, OllamaClient};
pub use normalizer::{normalize_name, normalize_relation, normalize_type};
pub use schema::{Entity, EntityKey, ExtractionResult, Properties, Relationship};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Characters of a chunk sent to the extraction model.
pub const MAX_EXTRACTION_INPUT: usize = 3000;

/// Entity/relationship extraction, used at ingestion and for question mentions.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ProviderError>;

    async fn extract_mentions(&self, question: &str) -> Result<Vec<String>, ProviderError>;
}

/// Extraction backed by a completion model asked for JSON.
pub struct LlmExtractor {
    llm: Arc<dyn CompletionProvider>,
}

impl LlmExtractor {
    pub fn new(llm: Arc<dyn CompletionProvider>) -> Self {
        Self { llm }
    }

    /// Get a JSON value, asking the model once to repair invalid output
    async fn generate_json(&self, prompt: String) -> Result<Value, ProviderError> {
        let response = self.llm.complete(&CompletionRequest::json(prompt)).await?;
        if let Ok(value) = serde_json::from_str(prompt::strip_code_fences(&response)) {
            return Ok(value);
        }

        warn!(response_len = response.len(), "Extraction returned invalid JSON, retrying");
        let retry = CompletionRequest::json(prompt::build_retry_prompt(&response));
        let corrected = self.llm.complete(&retry).await?;

        serde_json::from_str(prompt::strip_code_fences(&corrected)).map_err(|e| {
            ProviderError::malformed(ProviderKind::Extraction, format!("invalid JSON after retry: {}", e))
        })
    }
}

#[async_trait]
impl ExtractionProvider for LlmExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ProviderError> {
        let input: String = text.chars().take(MAX_EXTRACTION_INPUT).collect();
        let value = self.generate_json(prompt::build_extraction_prompt(&input)).await?;

        let raw: ExtractionResult = serde_json::from_value(value).map_err(|e| {
            ProviderError::malformed(ProviderKind::Extraction, format!("unexpected schema: {}", e))
        })?;

        Ok(clean_extraction(raw))
    }

    async fn extract_mentions(&self, question: &str) -> Result<Vec<String>, ProviderError> {
        let value = self.generate_json(prompt::build_mention_prompt(question)).await?;

        // Some models wrap the list: {"entities": [...]}
        let list = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("entities") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => {
                return Err(ProviderError::malformed(
                    ProviderKind::Extraction,
                    "expected a JSON list of entity names",
                ));
            }
        };

        Ok(list
            .into_iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name),
                Value::Object(mut obj) => match obj.remove("name") {
                    Some(Value::String(name)) => Some(name),
                    _ => None,
                },
                _ => None,
            })
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }
}

/// Drop nameless entities and dangling edges, normalize tags, and point
/// relationship endpoints at the entity spelling used in this extraction.
pub fn clean_extraction(raw: ExtractionResult) -> ExtractionResult {
    let entities: Vec<Entity> = raw
        .entities
        .into_iter()
        .filter(|e| !e.name.trim().is_empty())
        .map(|mut e| {
            e.name = e.name.trim().to_string();
            e.entity_type = normalize_type(&e.entity_type);
            e
        })
        .collect();

    let spelling: HashMap<String, String> = entities
        .iter()
        .map(|e| (normalize_name(&e.name), e.name.clone()))
        .collect();
    let canonical = |name: &str| {
        spelling
            .get(&normalize_name(name))
            .cloned()
            .unwrap_or_else(|| name.trim().to_string())
    };

    let relationships = raw
        .relationships
        .into_iter()
        .filter(|r| !r.source.trim().is_empty() && !r.target.trim().is_empty())
        .map(|r| Relationship {
            source: canonical(&r.source),
            target: canonical(&r.target),
            relation: normalize_relation(&r.relation),
            properties: r.properties,
        })
        .collect();

    ExtractionResult {
        entities,
        relationships,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned responses in order.
    struct Replay(Mutex<Vec<String>>);

    impl Replay {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                responses.iter().rev().map(|s| s.to_string()).collect(),
            )))
        }
    }

    #[async_trait]
    impl CompletionProvider for Replay {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ProviderError> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ProviderError::failed(ProviderKind::Completion, "no response left"))
        }
    }

    #[tokio::test]
    async fn test_extract_cleans_and_canonicalizes() {
        let llm = Replay::new(&[r#"```json
        {"entities": [
            {"name": "RBI", "type": "ORGANIZATION"},
            {"name": "Repo Rate", "type": "Concept", "properties": {"change": "-0.25%"}},
            {"name": "  ", "type": "concept"}
        ],
        "relationships": [
            {"source": "rbi", "target": "repo rate", "relation": "controls"},
            {"source": "", "target": "Repo Rate", "relation": "AFFECTS"}
        ]}
        ```"#]);
        let extractor = LlmExtractor::new(llm);
        let result = extractor.extract("RBI cut the repo rate by 0.25%.").await.unwrap();

        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.entities[0].entity_type, "organization");
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].triple(), "RBI -[CONTROLS]-> Repo Rate");
    }

    #[tokio::test]
    async fn test_invalid_json_is_retried_once() {
        let llm = Replay::new(&["not json", r#"["RBI", "Home Loan"]"#]);
        let extractor = LlmExtractor::new(llm);
        let mentions = extractor.extract_mentions("How are RBI and home loans connected?").await.unwrap();
        assert_eq!(mentions, vec!["RBI", "Home Loan"]);

        let llm = Replay::new(&["not json", "still not json"]);
        let extractor = LlmExtractor::new(llm);
        let err = extractor.extract_mentions("?").await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { provider: ProviderKind::Extraction, .. }));
    }

    #[tokio::test]
    async fn test_mentions_accept_wrapped_lists() {
        let llm = Replay::new(&[r#"{"entities": ["SBI", {"name": "HDFC"}, 3]}"#]);
        let extractor = LlmExtractor::new(llm);
        let mentions = extractor.extract_mentions("What do SBI and HDFC offer?").await.unwrap();
        assert_eq!(mentions, vec!["SBI", "HDFC"]);
    }
}
