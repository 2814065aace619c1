use extract::{normalize_name, with_timeout, Entity, EntityKey, ExtractionProvider, ProviderKind, Relationship};
use index::GraphStore;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::RagConfig;

/// Entities and relationships relevant to a question, deduplicated and in
/// discovery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphEvidence {
    pub mentions: Vec<String>,
    /// Mentions that matched an entity in the graph.
    pub resolved: Vec<String>,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl GraphEvidence {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

#[derive(Default)]
struct EvidenceBuilder {
    evidence: GraphEvidence,
    entity_keys: HashSet<EntityKey>,
    edge_keys: HashSet<(String, String, String)>,
}

impl EvidenceBuilder {
    fn add_entity(&mut self, entity: Entity) {
        if self.entity_keys.insert(entity.key()) {
            self.evidence.entities.push(entity);
        }
    }

    fn add_relationship(&mut self, relationship: Relationship) {
        let key = (
            normalize_name(&relationship.source),
            relationship.relation.clone(),
            normalize_name(&relationship.target),
        );
        if self.edge_keys.insert(key) {
            self.evidence.relationships.push(relationship);
        }
    }
}

pub struct GraphEvidenceExtractor<'a> {
    config: &'a RagConfig,
    extractor: &'a dyn ExtractionProvider,
    graph: &'a dyn GraphStore,
}

impl<'a> GraphEvidenceExtractor<'a> {
    pub fn new(config: &'a RagConfig, extractor: &'a dyn ExtractionProvider, graph: &'a dyn GraphStore) -> Self {
        Self {
            config,
            extractor,
            graph,
        }
    }

    /// Resolve question mentions against the graph and collect their
    /// neighborhoods. Unmatched mentions are dropped; provider failures
    /// yield less evidence, never an error.
    pub async fn collect(&self, question: &str) -> GraphEvidence {
        let timeout = self.config.provider_timeout();
        let mut builder = EvidenceBuilder::default();

        // Step 1: Mentions from the question
        let mut mentions = match with_timeout(
            ProviderKind::Extraction,
            timeout,
            self.extractor.extract_mentions(question),
        )
        .await
        {
            Ok(mentions) => mentions,
            Err(e) => {
                warn!(error = %e, "Mention extraction failed, continuing without graph evidence");
                return builder.evidence;
            }
        };
        let mut seen = HashSet::new();
        mentions.retain(|m| !m.trim().is_empty() && seen.insert(normalize_name(m)));
        mentions.truncate(self.config.mention_limit);

        // Step 2 and 3: Resolve each mention and expand its neighborhood
        for mention in &mentions {
            let entity = match with_timeout(ProviderKind::GraphStore, timeout, self.graph.find_entity(mention)).await {
                Ok(Some(entity)) => entity,
                Ok(None) => {
                    debug!(mention = %mention, "Mention not found in graph");
                    continue;
                }
                Err(e) => {
                    warn!(mention = %mention, error = %e, "Entity lookup failed");
                    continue;
                }
            };
            builder.evidence.resolved.push(mention.clone());

            match with_timeout(
                ProviderKind::GraphStore,
                timeout,
                self.graph.neighbors(&entity, self.config.graph_hops),
            )
            .await
            {
                Ok(subgraph) => {
                    builder.add_entity(entity);
                    subgraph.entities.into_iter().for_each(|e| builder.add_entity(e));
                    subgraph
                        .relationships
                        .into_iter()
                        .for_each(|r| builder.add_relationship(r));
                }
                Err(e) => {
                    warn!(entity = %entity.name, error = %e, "Neighborhood expansion failed");
                    builder.add_entity(entity);
                }
            }
        }

        builder.evidence.mentions = mentions;
        debug!(
            mentions = builder.evidence.mentions.len(),
            resolved = builder.evidence.resolved.len(),
            entities = builder.evidence.entities.len(),
            relationships = builder.evidence.relationships.len(),
            "Graph evidence collected"
        );
        builder.evidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::ScriptedExtractor;
    use index::KnowledgeGraph;

    async fn rbi_graph() -> KnowledgeGraph {
        let graph = KnowledgeGraph::new();
        graph.upsert_entity(Entity::new("RBI", "organization")).await.unwrap();
        graph.upsert_entity(Entity::new("Repo Rate", "concept")).await.unwrap();
        graph.upsert_entity(Entity::new("Home Loan", "product")).await.unwrap();
        graph
            .upsert_relationship(Relationship::new("RBI", "CONTROLS", "Repo Rate"))
            .await
            .unwrap();
        graph
            .upsert_relationship(Relationship::new("Repo Rate", "AFFECTS", "Home Loan"))
            .await
            .unwrap();
        graph
    }

    fn triples(evidence: &GraphEvidence) -> Vec<String> {
        evidence.relationships.iter().map(|r| r.triple()).collect()
    }

    #[tokio::test]
    async fn test_resolved_mentions_expand_one_hop() {
        let config = RagConfig::default();
        let graph = rbi_graph().await;
        let extractor = ScriptedExtractor::new().mentions(["RBI", "Home Loan", "Nonexistent Bank"]);
        let evidence = GraphEvidenceExtractor::new(&config, &extractor, &graph)
            .collect("How are RBI and Home Loan connected?")
            .await;

        assert_eq!(evidence.resolved, vec!["RBI", "Home Loan"]);
        assert_eq!(
            triples(&evidence),
            vec!["RBI -[CONTROLS]-> Repo Rate", "Repo Rate -[AFFECTS]-> Home Loan"]
        );
        assert_eq!(evidence.entities.len(), 3);
    }

    #[tokio::test]
    async fn test_overlapping_neighborhoods_are_deduplicated() {
        let config = RagConfig { graph_hops: 2, ..RagConfig::default() };
        let graph = rbi_graph().await;
        let extractor = ScriptedExtractor::new().mentions(["RBI", "Repo Rate"]);
        let evidence = GraphEvidenceExtractor::new(&config, &extractor, &graph)
            .collect("RBI and Repo Rate")
            .await;

        assert_eq!(evidence.entities.len(), 3);
        assert_eq!(evidence.relationships.len(), 2);
    }

    #[tokio::test]
    async fn test_no_resolved_mentions_is_empty_evidence() {
        let config = RagConfig::default();
        let graph = rbi_graph().await;
        let extractor = ScriptedExtractor::new();
        let evidence = GraphEvidenceExtractor::new(&config, &extractor, &graph)
            .collect("What is the weather today?")
            .await;

        assert!(evidence.is_empty());
        assert!(evidence.resolved.is_empty());
    }

    #[tokio::test]
    async fn test_mention_limit_caps_lookups() {
        let config = RagConfig { mention_limit: 1, ..RagConfig::default() };
        let graph = rbi_graph().await;
        let extractor = ScriptedExtractor::new().mentions(["Home Loan", "RBI"]);
        let evidence = GraphEvidenceExtractor::new(&config, &extractor, &graph)
            .collect("Home Loan and RBI")
            .await;

        assert_eq!(evidence.mentions, vec!["Home Loan"]);
        assert_eq!(triples(&evidence), vec!["Repo Rate -[AFFECTS]-> Home Loan"]);
    }
}
