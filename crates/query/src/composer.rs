use extract::{Entity, Relationship};
use serde::Serialize;
use std::fmt::Write;

use crate::fusion::RetrievedChunk;
use crate::graph_evidence::GraphEvidence;

pub const DOCUMENT_SECTION: &str = "=== DOCUMENT CONTEXT (vector) ===";
pub const GRAPH_SECTION: &str = "=== KNOWLEDGE GRAPH CONTEXT (graph) ===";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceOrigin {
    Vector,
    Graph,
}

/// Where one piece of evidence in the context came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub origin: EvidenceOrigin,
    /// Chunk header, entity name or relationship triple.
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
}

/// Evidence merged into one bounded context.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComposedContext {
    pub chunks: Vec<RetrievedChunk>,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub text: String,
    /// Lowest-ranked chunks left out to stay within the budget.
    pub dropped_chunks: usize,
    /// Graph items left out because the graph section alone exceeded the budget.
    pub dropped_graph_items: usize,
}

fn source_property(entity: &Entity) -> Option<String> {
    entity
        .properties
        .get("source")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

impl ComposedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Vector evidence in rank order, then graph entities and relationships.
    pub fn provenance(&self) -> Vec<Provenance> {
        let documents = self.chunks.iter().map(|c| Provenance {
            origin: EvidenceOrigin::Vector,
            label: format!("{} p.{}", c.chunk.source, c.chunk.page),
            source: Some(c.chunk.source.clone()),
            page: Some(c.chunk.page),
            chunk_id: Some(c.chunk.chunk_id.clone()),
        });
        let entities = self.entities.iter().map(|e| Provenance {
            origin: EvidenceOrigin::Graph,
            label: format!("{} ({})", e.name, e.entity_type),
            source: source_property(e),
            page: None,
            chunk_id: None,
        });
        let relationships = self.relationships.iter().map(|r| Provenance {
            origin: EvidenceOrigin::Graph,
            label: r.triple(),
            source: None,
            page: None,
            chunk_id: None,
        });
        documents.chain(entities).chain(relationships).collect()
    }
}

fn render_documents(chunks: &[RetrievedChunk]) -> String {
    let mut out = String::from(DOCUMENT_SECTION);
    for (i, c) in chunks.iter().enumerate() {
        let _ = write!(
            out,
            "\n\n[Document {} - Source: {}, Page: {}]\n{}",
            i + 1,
            c.chunk.source,
            c.chunk.page,
            c.chunk.text
        );
    }
    out
}

fn render_graph(entities: &[Entity], relationships: &[Relationship]) -> String {
    let mut out = String::from(GRAPH_SECTION);
    if !entities.is_empty() {
        out.push_str("\n\nEntities:");
        for e in entities {
            let _ = write!(out, "\n- {} ({})", e.name, e.entity_type);
        }
    }
    if !relationships.is_empty() {
        out.push_str("\n\nRelationships:");
        for r in relationships {
            let _ = write!(out, "\n- {}", r.triple());
        }
    }
    out
}

fn render(chunks: &[RetrievedChunk], entities: &[Entity], relationships: &[Relationship]) -> String {
    let mut sections = Vec::with_capacity(2);
    if !chunks.is_empty() {
        sections.push(render_documents(chunks));
    }
    if !entities.is_empty() || !relationships.is_empty() {
        sections.push(render_graph(entities, relationships));
    }
    sections.join("\n\n")
}

fn fits(text: &str, budget: usize) -> bool {
    text.chars().count() <= budget
}

/// Merge ranked chunks and graph evidence into one labeled context of at
/// most `budget` characters.
///
/// Graph evidence is reserved first and chunks are admitted in rank order
/// until the next one would overflow, so every kept chunk outranks every
/// dropped one. Graph items are only cut when they overflow on their own,
/// entities before relationships, from the tail.
pub fn compose(chunks: Vec<RetrievedChunk>, graph: &GraphEvidence, budget: usize) -> ComposedContext {
    let mut entities = graph.entities.clone();
    let mut relationships = graph.relationships.clone();
    let mut dropped_graph_items = 0;
    while !fits(&render(&[], &entities, &relationships), budget) {
        if entities.pop().is_none() {
            relationships.pop();
        }
        dropped_graph_items += 1;
    }

    let mut kept = 0;
    while kept < chunks.len() && fits(&render(&chunks[..=kept], &entities, &relationships), budget) {
        kept += 1;
    }

    let mut chunks = chunks;
    let dropped_chunks = chunks.len() - kept;
    chunks.truncate(kept);

    let text = render(&chunks, &entities, &relationships);
    ComposedContext {
        chunks,
        entities,
        relationships,
        text,
        dropped_chunks,
        dropped_graph_items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::Chunk;

    fn ranked(id: &str, text: &str, page: u32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                doc_id: "doc".to_string(),
                chunk_id: id.to_string(),
                text: text.to_string(),
                source: "policy.txt".to_string(),
                page,
                offset: (0, text.len()),
            },
            score: 0.9,
            votes: 1,
            fusion_rank: None,
        }
    }

    fn rbi_evidence() -> GraphEvidence {
        GraphEvidence {
            entities: vec![
                Entity::new("RBI", "organization").with_property("source", "policy.txt"),
                Entity::new("Repo Rate", "concept"),
            ],
            relationships: vec![Relationship::new("RBI", "CONTROLS", "Repo Rate")],
            ..GraphEvidence::default()
        }
    }

    #[test]
    fn test_sections_are_labeled_in_order() {
        let context = compose(
            vec![ranked("a", "RBI cut the repo rate by 0.25%.", 1)],
            &rbi_evidence(),
            12_000,
        );

        let expected = "=== DOCUMENT CONTEXT (vector) ===\n\n\
            [Document 1 - Source: policy.txt, Page: 1]\n\
            RBI cut the repo rate by 0.25%.\n\n\
            === KNOWLEDGE GRAPH CONTEXT (graph) ===\n\n\
            Entities:\n\
            - RBI (organization)\n\
            - Repo Rate (concept)\n\n\
            Relationships:\n\
            - RBI -[CONTROLS]-> Repo Rate";
        assert_eq!(context.text, expected);
        assert_eq!(context.dropped_chunks, 0);
    }

    #[test]
    fn test_budget_drops_lowest_ranked_chunks_first() {
        let chunks: Vec<_> = (0..6)
            .map(|i| ranked(&format!("c{}", i), &"x".repeat(100), i + 1))
            .collect();
        let evidence = rbi_evidence();
        let budget = 400;

        let context = compose(chunks, &evidence, budget);
        assert!(context.char_len() <= budget);
        assert!(context.dropped_chunks > 0);
        let kept: Vec<_> = context.chunks.iter().map(|c| c.chunk_id()).collect();
        let expected: Vec<String> = (0..kept.len()).map(|i| format!("c{}", i)).collect();
        assert_eq!(kept, expected);
        assert_eq!(context.relationships.len(), 1);
        assert_eq!(context.entities.len(), 2);
    }

    #[test]
    fn test_oversized_graph_is_trimmed_entities_first() {
        let evidence = GraphEvidence {
            entities: (0..100).map(|i| Entity::new(format!("Entity number {}", i), "concept")).collect(),
            relationships: vec![Relationship::new("A", "LINKS", "B")],
            ..GraphEvidence::default()
        };

        let context = compose(vec![ranked("a", "text", 1)], &evidence, 300);
        assert!(context.char_len() <= 300);
        assert_eq!(context.relationships.len(), 1);
        assert!(context.entities.len() < 100);
        assert_eq!(context.dropped_graph_items, 100 - context.entities.len());
    }

    #[test]
    fn test_composition_is_deterministic() {
        let build = || compose(vec![ranked("a", "one", 1), ranked("b", "two", 2)], &rbi_evidence(), 500);
        assert_eq!(build().text, build().text);
    }

    #[test]
    fn test_provenance_lists_vector_then_graph() {
        let context = compose(vec![ranked("a", "one", 3)], &rbi_evidence(), 12_000);
        let provenance = context.provenance();

        assert_eq!(provenance.len(), 4);
        assert_eq!(provenance[0].origin, EvidenceOrigin::Vector);
        assert_eq!(provenance[0].page, Some(3));
        assert_eq!(provenance[1].source.as_deref(), Some("policy.txt"));
        assert_eq!(provenance[3].label, "RBI -[CONTROLS]-> Repo Rate");
    }

    #[test]
    fn test_empty_evidence_composes_empty_text() {
        let context = compose(Vec::new(), &GraphEvidence::default(), 256);
        assert!(context.is_empty());
        assert_eq!(context.text, "");
    }
}
