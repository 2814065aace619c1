use async_trait::async_trait;
use extract::schema::DEFAULT_ENTITY_TYPE;
use extract::{normalize_name, Entity, EntityKey, ProviderError, Relationship};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;

/// Entities and relationships around a seed entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Subgraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub entity_types: BTreeMap<String, usize>,
    pub relation_types: BTreeMap<String, usize>,
}

/// Append-only knowledge graph store with merge-by-identity upserts.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert, or merge properties into the entity with the same name+type.
    /// A placeholder created by an edge takes the type of the first typed
    /// entity with its name.
    async fn upsert_entity(&self, entity: Entity) -> Result<(), ProviderError>;

    /// Insert, or merge properties into the edge with the same endpoints and
    /// type. Unknown endpoints are created with the default type.
    async fn upsert_relationship(&self, relationship: Relationship) -> Result<(), ProviderError>;

    /// Case-insensitive exact name lookup. No fuzzy matching.
    async fn find_entity(&self, name: &str) -> Result<Option<Entity>, ProviderError>;

    /// Relationships reachable within `hops` edges (either direction) and
    /// the entities at their ends, seed first.
    async fn neighbors(&self, entity: &Entity, hops: usize) -> Result<Subgraph, ProviderError>;

    async fn stats(&self) -> Result<GraphStats, ProviderError>;
}

#[derive(Default)]
struct GraphInner {
    graph: DiGraph<Entity, Relationship>,
    by_key: HashMap<EntityKey, NodeIndex>,
    by_name: HashMap<String, Vec<NodeIndex>>,
}

impl GraphInner {
    fn upsert_node(&mut self, entity: Entity) -> NodeIndex {
        let key = entity.key();
        if let Some(&node) = self.by_key.get(&key) {
            self.graph[node].merge(&entity);
            return node;
        }

        if let Some(node) = self.untyped_match(&key) {
            let existing = self.graph[node].key();
            if existing.entity_type == DEFAULT_ENTITY_TYPE {
                // Placeholder from an earlier edge takes the real type
                self.graph[node].entity_type = key.entity_type.clone();
                self.by_key.remove(&existing);
                self.by_key.insert(key, node);
            }
            self.graph[node].merge(&entity);
            return node;
        }

        let node = self.graph.add_node(entity);
        self.by_name.entry(key.name.clone()).or_default().push(node);
        self.by_key.insert(key, node);
        node
    }

    /// A same-name node to fold into when one side of the pair is untyped:
    /// a typed entity upgrades a placeholder, an untyped one joins a typed node.
    fn untyped_match(&self, key: &EntityKey) -> Option<NodeIndex> {
        let nodes = self.by_name.get(&key.name)?;
        if key.entity_type == DEFAULT_ENTITY_TYPE {
            return nodes.first().copied();
        }
        nodes
            .iter()
            .copied()
            .find(|&node| self.graph[node].key().entity_type == DEFAULT_ENTITY_TYPE)
    }

    fn node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.by_name
            .get(&normalize_name(name))
            .and_then(|nodes| nodes.first().copied())
    }

    fn resolve_or_create(&mut self, name: &str) -> NodeIndex {
        match self.node_by_name(name) {
            Some(node) => node,
            None => self.upsert_node(Entity::new(name.trim(), DEFAULT_ENTITY_TYPE)),
        }
    }

    fn seed(&self, entity: &Entity) -> Option<NodeIndex> {
        self.by_key
            .get(&entity.key())
            .copied()
            .or_else(|| self.node_by_name(&entity.name))
    }
}

/// In-memory multigraph: parallel edges of different types between the same
/// pair are kept as distinct edges.
#[derive(Default)]
pub struct KnowledgeGraph {
    inner: RwLock<GraphInner>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for KnowledgeGraph {
    async fn upsert_entity(&self, entity: Entity) -> Result<(), ProviderError> {
        self.inner.write().await.upsert_node(entity);
        Ok(())
    }

    async fn upsert_relationship(&self, relationship: Relationship) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        let source = inner.resolve_or_create(&relationship.source);
        let target = inner.resolve_or_create(&relationship.target);

        let existing = inner
            .graph
            .edges_connecting(source, target)
            .find(|edge| edge.weight().relation == relationship.relation)
            .map(|edge| edge.id());

        match existing {
            Some(edge) => {
                let properties = &mut inner.graph[edge].properties;
                for (key, value) in relationship.properties {
                    properties.insert(key, value);
                }
            }
            None => {
                let edge = Relationship {
                    source: inner.graph[source].name.clone(),
                    target: inner.graph[target].name.clone(),
                    relation: relationship.relation,
                    properties: relationship.properties,
                };
                inner.graph.add_edge(source, target, edge);
            }
        }

        Ok(())
    }

    async fn find_entity(&self, name: &str) -> Result<Option<Entity>, ProviderError> {
        let inner = self.inner.read().await;
        Ok(inner.node_by_name(name).map(|node| inner.graph[node].clone()))
    }

    async fn neighbors(&self, entity: &Entity, hops: usize) -> Result<Subgraph, ProviderError> {
        let inner = self.inner.read().await;
        let Some(seed) = inner.seed(entity) else {
            return Ok(Subgraph::default());
        };

        let mut visited: Vec<NodeIndex> = vec![seed];
        let mut seen: HashSet<NodeIndex> = HashSet::from([seed]);
        let mut edges: BTreeSet<EdgeIndex> = BTreeSet::new();
        let mut frontier = vec![seed];

        for _ in 0..hops {
            let mut next: BTreeSet<NodeIndex> = BTreeSet::new();
            for &node in &frontier {
                let incident = inner
                    .graph
                    .edges_directed(node, Direction::Outgoing)
                    .chain(inner.graph.edges_directed(node, Direction::Incoming));
                for edge in incident {
                    edges.insert(edge.id());
                    let other = if edge.source() == node { edge.target() } else { edge.source() };
                    if seen.insert(other) {
                        next.insert(other);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            visited.extend(next.iter().copied());
            frontier = next.into_iter().collect();
        }

        Ok(Subgraph {
            entities: visited.iter().map(|&n| inner.graph[n].clone()).collect(),
            relationships: edges.iter().map(|&e| inner.graph[e].clone()).collect(),
        })
    }

    async fn stats(&self) -> Result<GraphStats, ProviderError> {
        let inner = self.inner.read().await;
        let mut stats = GraphStats {
            entity_count: inner.graph.node_count(),
            relationship_count: inner.graph.edge_count(),
            ..GraphStats::default()
        };
        for entity in inner.graph.node_weights() {
            *stats.entity_types.entry(entity.entity_type.clone()).or_default() += 1;
        }
        for relationship in inner.graph.edge_weights() {
            *stats.relation_types.entry(relationship.relation.clone()).or_default() += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn rbi_graph() -> KnowledgeGraph {
        let graph = KnowledgeGraph::new();
        graph.upsert_entity(Entity::new("RBI", "organization")).await.unwrap();
        graph.upsert_entity(Entity::new("Repo Rate", "concept")).await.unwrap();
        graph.upsert_entity(Entity::new("Home Loan", "product")).await.unwrap();
        graph.upsert_relationship(Relationship::new("RBI", "CONTROLS", "Repo Rate")).await.unwrap();
        graph.upsert_relationship(Relationship::new("Repo Rate", "AFFECTS", "Home Loan")).await.unwrap();
        graph
    }

    #[tokio::test]
    async fn test_entity_merge_is_idempotent() {
        let graph = KnowledgeGraph::new();
        graph.upsert_entity(Entity::new("RBI", "organization").with_property("country", "India")).await.unwrap();
        graph.upsert_entity(Entity::new("rbi", "Organization").with_property("kind", "central bank")).await.unwrap();

        let stats = graph.stats().await.unwrap();
        assert_eq!(stats.entity_count, 1);

        let rbi = graph.find_entity("Rbi").await.unwrap().unwrap();
        assert_eq!(rbi.name, "RBI");
        assert_eq!(rbi.properties.len(), 2);
    }

    #[tokio::test]
    async fn test_parallel_edges_are_kept() {
        let graph = rbi_graph().await;
        graph.upsert_relationship(Relationship::new("RBI", "REGULATES", "Repo Rate")).await.unwrap();
        // Same type again merges instead of duplicating
        graph.upsert_relationship(Relationship::new("rbi", "CONTROLS", "repo rate")).await.unwrap();

        let stats = graph.stats().await.unwrap();
        assert_eq!(stats.relationship_count, 3);
        assert_eq!(stats.relation_types["CONTROLS"], 1);
        assert_eq!(stats.relation_types["REGULATES"], 1);
    }

    #[tokio::test]
    async fn test_neighbors_respect_hop_depth() {
        let graph = rbi_graph().await;
        let rbi = graph.find_entity("rbi").await.unwrap().unwrap();

        let one_hop = graph.neighbors(&rbi, 1).await.unwrap();
        assert_eq!(one_hop.relationships.len(), 1);
        assert_eq!(one_hop.entities.len(), 2);
        assert_eq!(one_hop.entities[0].name, "RBI");

        let two_hops = graph.neighbors(&rbi, 2).await.unwrap();
        assert_eq!(two_hops.relationships.len(), 2);
        assert_eq!(two_hops.entities.len(), 3);
    }

    #[tokio::test]
    async fn test_relationship_creates_missing_endpoints() {
        let graph = KnowledgeGraph::new();
        graph.upsert_relationship(Relationship::new("HDFC", "OFFERS", "Home Loan")).await.unwrap();

        let hdfc = graph.find_entity("hdfc").await.unwrap().unwrap();
        assert_eq!(hdfc.entity_type, "other");
        assert!(graph.find_entity("home loans").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_typed_entity_upgrades_edge_placeholder() {
        let graph = KnowledgeGraph::new();
        graph.upsert_relationship(Relationship::new("HDFC", "OFFERS", "Home Loan")).await.unwrap();
        graph
            .upsert_entity(Entity::new("Home Loan", "product").with_property("rate", "8.5%"))
            .await
            .unwrap();

        let stats = graph.stats().await.unwrap();
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.entity_types.get("product"), Some(&1));
        assert_eq!(stats.entity_types.get("other"), Some(&1));

        let loan = graph.find_entity("home loan").await.unwrap().unwrap();
        assert_eq!(loan.entity_type, "product");
        assert_eq!(loan.properties.len(), 1);

        // The edge now hangs off the typed node
        let around = graph.neighbors(&loan, 1).await.unwrap();
        assert_eq!(around.relationships.len(), 1);
        assert_eq!(around.entities.len(), 2);

        // Upserting again with the same type merges by key
        graph.upsert_entity(Entity::new("home loan", "Product")).await.unwrap();
        assert_eq!(graph.stats().await.unwrap().entity_count, 2);
    }

    #[tokio::test]
    async fn test_untyped_entity_joins_typed_node() {
        let graph = KnowledgeGraph::new();
        graph.upsert_entity(Entity::new("SBI", "organization")).await.unwrap();
        graph.upsert_entity(Entity::new("sbi", "other").with_property("city", "Mumbai")).await.unwrap();

        let stats = graph.stats().await.unwrap();
        assert_eq!(stats.entity_count, 1);
        let sbi = graph.find_entity("SBI").await.unwrap().unwrap();
        assert_eq!(sbi.entity_type, "organization");
        assert_eq!(sbi.properties.len(), 1);
    }
}
