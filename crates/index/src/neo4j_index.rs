use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::schema::DEFAULT_ENTITY_TYPE;
use extract::{normalize_name, Entity, EntityKey, Properties, ProviderError, ProviderKind, Relationship};
use neo4rs::{Graph, Query};
use std::collections::{BTreeMap, HashSet};

use crate::graph::{GraphStats, GraphStore, Subgraph};

/// Graph store backed by Neo4j. Properties are stored as JSON strings and
/// merged client-side; ingestion is serialized so read-merge-write is safe.
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;
        Ok(Self::new(graph))
    }

    /// Initialize schema: create indexes
    pub async fn init_schema(&self) -> Result<()> {
        let query = Query::new(
            "CREATE INDEX entity_key_index IF NOT EXISTS FOR (e:Entity) ON (e.key)".to_string()
        );
        self.graph.run(query).await
            .context("Failed to create index on Entity.key")?;

        let query = Query::new(
            "CREATE INDEX entity_norm_name_index IF NOT EXISTS FOR (e:Entity) ON (e.norm_name)".to_string()
        );
        self.graph.run(query).await
            .context("Failed to create index on Entity.norm_name")?;

        tracing::info!("Neo4j indexes created");
        Ok(())
    }

    fn key_string(key: &EntityKey) -> String {
        format!("{}|{}", key.name, key.entity_type)
    }

    fn parse_properties(raw: Option<String>) -> Properties {
        raw.and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default()
    }

    /// Key of the node `entity` should merge into: its own, or a same-name
    /// node when one of the two is untyped. A placeholder is re-keyed to the
    /// incoming type.
    async fn target_key(&self, key: &EntityKey) -> Result<String> {
        let key_str = Self::key_string(key);

        if key.entity_type == DEFAULT_ENTITY_TYPE {
            return Ok(match self.lookup(&key.name).await? {
                Some((existing, _)) => existing,
                None => key_str,
            });
        }

        let placeholder = Self::key_string(&EntityKey {
            name: key.name.clone(),
            entity_type: DEFAULT_ENTITY_TYPE.to_string(),
        });
        let query = Query::new(
            r#"
            MATCH (p:Entity {key: $placeholder})
            WHERE NOT EXISTS { MATCH (:Entity {key: $key}) }
            SET p.key = $key, p.type = $type
            RETURN p.key as key
            "#.to_string()
        )
        .param("placeholder", placeholder)
        .param("key", key_str.clone())
        .param("type", key.entity_type.clone());
        let mut result = self.graph.execute(query).await?;
        if result.next().await?.is_some() {
            tracing::debug!(key = %key_str, "Upgraded placeholder entity");
        }

        Ok(key_str)
    }

    async fn merge_entity(&self, entity: &Entity) -> Result<String> {
        let key = entity.key();
        let key_str = self.target_key(&key).await?;

        let query = Query::new(
            "MATCH (e:Entity {key: $key}) RETURN e.properties as properties".to_string()
        ).param("key", key_str.clone());
        let mut result = self.graph.execute(query).await?;

        let mut merged = match result.next().await? {
            Some(row) => Self::parse_properties(row.get("properties").ok()),
            None => Properties::new(),
        };
        merged.extend(entity.properties.clone());

        let query = Query::new(
            r#"
            MERGE (e:Entity {key: $key})
            ON CREATE SET e.name = $name,
                e.norm_name = $norm_name,
                e.type = $type
            SET e.properties = $properties
            "#.to_string()
        )
        .param("key", key_str.clone())
        .param("name", entity.name.clone())
        .param("norm_name", key.name)
        .param("type", key.entity_type)
        .param("properties", serde_json::to_string(&merged)?);

        self.graph.run(query).await
            .context("Failed to index entity")?;

        Ok(key_str)
    }

    async fn lookup(&self, name: &str) -> Result<Option<(String, Entity)>> {
        let query = Query::new(
            r#"
            MATCH (e:Entity {norm_name: $norm_name})
            RETURN e.key as key, e.name as name, e.type as type, e.properties as properties
            ORDER BY e.key
            LIMIT 1
            "#.to_string()
        ).param("norm_name", normalize_name(name));

        let mut result = self.graph.execute(query).await?;
        match result.next().await? {
            Some(row) => {
                let key: String = row.get("key").context("Missing key")?;
                let entity = Entity {
                    name: row.get("name").context("Missing name")?,
                    entity_type: row.get("type").unwrap_or_else(|_| DEFAULT_ENTITY_TYPE.to_string()),
                    properties: Self::parse_properties(row.get("properties").ok()),
                };
                Ok(Some((key, entity)))
            }
            None => Ok(None),
        }
    }

    async fn ensure_entity(&self, name: &str) -> Result<(String, String)> {
        if let Some((key, entity)) = self.lookup(name).await? {
            return Ok((key, entity.name));
        }
        let placeholder = Entity::new(name.trim(), DEFAULT_ENTITY_TYPE);
        let key = self.merge_entity(&placeholder).await?;
        Ok((key, placeholder.name))
    }

    async fn merge_relationship(&self, relationship: &Relationship) -> Result<()> {
        let (source_key, _) = self.ensure_entity(&relationship.source).await?;
        let (target_key, _) = self.ensure_entity(&relationship.target).await?;

        let query = Query::new(
            r#"
            MATCH (source:Entity {key: $source_key})-[r:RELATION {type: $relation_type}]->(target:Entity {key: $target_key})
            RETURN r.properties as properties
            "#.to_string()
        )
        .param("source_key", source_key.clone())
        .param("target_key", target_key.clone())
        .param("relation_type", relationship.relation.clone());
        let mut result = self.graph.execute(query).await?;

        let mut merged = match result.next().await? {
            Some(row) => Self::parse_properties(row.get("properties").ok()),
            None => Properties::new(),
        };
        merged.extend(relationship.properties.clone());

        let query = Query::new(
            r#"
            MATCH (source:Entity {key: $source_key})
            MATCH (target:Entity {key: $target_key})
            MERGE (source)-[r:RELATION {type: $relation_type}]->(target)
            SET r.properties = $properties
            "#.to_string()
        )
        .param("source_key", source_key)
        .param("target_key", target_key)
        .param("relation_type", relationship.relation.clone())
        .param("properties", serde_json::to_string(&merged)?);

        self.graph.run(query).await
            .context("Failed to index relation")?;

        Ok(())
    }

    async fn expand(&self, seed_key: String, hops: usize) -> Result<Subgraph> {
        let mut keys: Vec<String> = vec![seed_key.clone()];
        let mut seen: HashSet<String> = HashSet::from([seed_key.clone()]);
        let mut frontier = vec![seed_key];
        let mut relationships: BTreeMap<i64, Relationship> = BTreeMap::new();

        for _ in 0..hops {
            if frontier.is_empty() {
                break;
            }

            let query = Query::new(
                r#"
                MATCH (source:Entity)-[r:RELATION]->(target:Entity)
                WHERE source.key IN $keys OR target.key IN $keys
                RETURN id(r) as rel_id, source.key as source_key, source.name as source,
                       target.key as target_key, target.name as target,
                       r.type as relation, r.properties as properties
                "#.to_string()
            ).param("keys", frontier.clone());

            let mut result = self.graph.execute(query).await?;
            let mut next = Vec::new();

            while let Some(row) = result.next().await? {
                let rel_id: i64 = row.get("rel_id").context("Missing rel_id")?;
                relationships.entry(rel_id).or_insert(Relationship {
                    source: row.get("source")?,
                    target: row.get("target")?,
                    relation: row.get("relation")?,
                    properties: Self::parse_properties(row.get("properties").ok()),
                });

                for column in ["source_key", "target_key"] {
                    let key: String = row.get(column)?;
                    if seen.insert(key.clone()) {
                        next.push(key);
                    }
                }
            }

            next.sort();
            keys.extend(next.iter().cloned());
            frontier = next;
        }

        let query = Query::new(
            r#"
            MATCH (e:Entity)
            WHERE e.key IN $keys
            RETURN e.key as key, e.name as name, e.type as type, e.properties as properties
            "#.to_string()
        ).param("keys", keys.clone());

        let mut result = self.graph.execute(query).await?;
        let mut found: Vec<(String, Entity)> = Vec::new();
        while let Some(row) = result.next().await? {
            found.push((
                row.get("key")?,
                Entity {
                    name: row.get("name")?,
                    entity_type: row.get("type").unwrap_or_else(|_| DEFAULT_ENTITY_TYPE.to_string()),
                    properties: Self::parse_properties(row.get("properties").ok()),
                },
            ));
        }

        // Keep discovery order: seed first, then hop by hop
        let entities = keys
            .iter()
            .filter_map(|key| found.iter().find(|(k, _)| k == key).map(|(_, e)| e.clone()))
            .collect();

        Ok(Subgraph {
            entities,
            relationships: relationships.into_values().collect(),
        })
    }

    async fn histogram(&self, cypher: &str) -> Result<BTreeMap<String, usize>> {
        let mut result = self.graph.execute(Query::new(cypher.to_string())).await?;
        let mut counts = BTreeMap::new();
        while let Some(row) = result.next().await? {
            let label: String = row.get("label").unwrap_or_else(|_| DEFAULT_ENTITY_TYPE.to_string());
            let count: i64 = row.get("count").unwrap_or(0);
            counts.insert(label, count as usize);
        }
        Ok(counts)
    }

    async fn graph_stats(&self) -> Result<GraphStats> {
        let entity_types = self
            .histogram("MATCH (e:Entity) RETURN e.type as label, count(e) as count")
            .await?;
        let relation_types = self
            .histogram("MATCH ()-[r:RELATION]->() RETURN r.type as label, count(r) as count")
            .await?;

        Ok(GraphStats {
            entity_count: entity_types.values().sum(),
            relationship_count: relation_types.values().sum(),
            entity_types,
            relation_types,
        })
    }
}

fn store_error(e: anyhow::Error) -> ProviderError {
    ProviderError::failed(ProviderKind::GraphStore, e)
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert_entity(&self, entity: Entity) -> Result<(), ProviderError> {
        self.merge_entity(&entity).await.map(|_| ()).map_err(store_error)
    }

    async fn upsert_relationship(&self, relationship: Relationship) -> Result<(), ProviderError> {
        self.merge_relationship(&relationship).await.map_err(store_error)
    }

    async fn find_entity(&self, name: &str) -> Result<Option<Entity>, ProviderError> {
        self.lookup(name)
            .await
            .map(|found| found.map(|(_, entity)| entity))
            .map_err(store_error)
    }

    async fn neighbors(&self, entity: &Entity, hops: usize) -> Result<Subgraph, ProviderError> {
        let seed = Self::key_string(&entity.key());
        self.expand(seed, hops).await.map_err(store_error)
    }

    async fn stats(&self) -> Result<GraphStats, ProviderError> {
        self.graph_stats().await.map_err(store_error)
    }
}
