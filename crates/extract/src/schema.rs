use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::normalizer::{normalize_name, normalize_relation, normalize_type};

pub type Properties = BTreeMap<String, Value>;

/// Fallback tag when the extractor omits a type.
pub const DEFAULT_ENTITY_TYPE: &str = "other";
pub const DEFAULT_RELATION: &str = "RELATED_TO";

/// Identity of an entity: case-normalized name plus type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub name: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default, deserialize_with = "lenient_properties")]
    pub properties: Properties,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: normalize_type(&entity_type.into()),
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> EntityKey {
        EntityKey {
            name: normalize_name(&self.name),
            entity_type: normalize_type(&self.entity_type),
        }
    }

    /// Union of properties; incoming values win on conflicting keys.
    pub fn merge(&mut self, other: &Entity) {
        for (key, value) in &other.properties {
            self.properties.insert(key.clone(), value.clone());
        }
    }
}

/// Directed, typed edge between two entities, referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default = "default_relation", alias = "type")]
    pub relation: String,
    #[serde(default, deserialize_with = "lenient_properties")]
    pub properties: Properties,
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation: normalize_relation(&relation.into()),
            properties: Properties::new(),
        }
    }

    /// Subject-predicate-object rendering used in composed contexts.
    pub fn triple(&self) -> String {
        format!("{} -[{}]-> {}", self.source, self.relation, self.target)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default, alias = "relations")]
    pub relationships: Vec<Relationship>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

fn default_entity_type() -> String {
    DEFAULT_ENTITY_TYPE.to_string()
}

fn default_relation() -> String {
    DEFAULT_RELATION.to_string()
}

/// Extractors sometimes emit `null` or a string where a map belongs.
fn lenient_properties<'de, D>(deserializer: D) -> Result<Properties, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map.into_iter().collect(),
        _ => Properties::new(),
    })
}
