use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

pub type Properties = BTreeMap<String, Value>;

pub const DEFAULT_SCORE: f64 = 0.5;
pub const DEFAULT_RELATION_TYPE: &str = "related_to";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Concept,
    Event,
    #[default]
    Other,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Location,
        EntityType::Concept,
        EntityType::Event,
        EntityType::Other,
    ];

    /// Lenient parse of model-supplied type names. Unknown names map to `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "person" | "people" | "individual" | "human" => EntityType::Person,
            "organization" | "organisation" | "org" | "company" | "institution" | "team" => {
                EntityType::Organization
            }
            "location" | "place" | "city" | "country" | "region" | "address" => EntityType::Location,
            "concept" | "idea" | "technology" | "topic" | "product" => EntityType::Concept,
            "event" | "meeting" | "incident" => EntityType::Event,
            _ => EntityType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Location => "location",
            EntityType::Concept => "concept",
            EntityType::Event => "event",
            EntityType::Other => "other",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub label: String,
    #[serde(rename = "type", default)]
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// In [0, 1]
    #[serde(default = "default_score")]
    pub importance: f64,
}

impl Entity {
    pub fn new(id: impl Into<String>, label: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            entity_type,
            properties: Properties::new(),
            description: None,
            importance: DEFAULT_SCORE,
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = clamp_score(importance);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    /// In [0, 1]
    #[serde(default = "default_score")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Relationship {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            relation_type: relation_type.into(),
            properties: Properties::new(),
            weight: DEFAULT_SCORE,
            description: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = clamp_score(weight);
        self
    }
}

/// The canonical extraction artifact. Relationships with unknown endpoints are
/// kept here for inspection; renderers and compilers skip them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGraph {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub themes: Vec<String>,
}

impl RawGraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn entity_ids(&self) -> HashSet<&str> {
        self.entities.iter().map(|e| e.id.as_str()).collect()
    }

    /// Relationships whose source and target both name a known entity.
    pub fn resolved_relationships(&self) -> Vec<&Relationship> {
        let ids = self.entity_ids();
        self.relationships
            .iter()
            .filter(|r| ids.contains(r.source.as_str()) && ids.contains(r.target.as_str()))
            .collect()
    }

    pub fn dangling_relationships(&self) -> usize {
        self.relationships.len() - self.resolved_relationships().len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    /// positive, negative, neutral or mixed
    pub sentiment: String,
    /// In [-1, 1]
    pub score: f64,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    #[serde(default)]
    pub confidence: f64,
}

fn default_score() -> f64 {
    DEFAULT_SCORE
}

/// Clamp into [0, 1]; NaN becomes the default score.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        DEFAULT_SCORE
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parse() {
        assert_eq!(EntityType::parse("PERSON"), EntityType::Person);
        assert_eq!(EntityType::parse(" Company "), EntityType::Organization);
        assert_eq!(EntityType::parse("city"), EntityType::Location);
        assert_eq!(EntityType::parse("TECHNOLOGY"), EntityType::Concept);
        assert_eq!(EntityType::parse("spaceship"), EntityType::Other);
    }

    #[test]
    fn test_serde_field_names() {
        let entity = Entity::new("e1", "Ada", EntityType::Person);
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["type"], "person");
        assert_eq!(json["label"], "Ada");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_resolved_relationships() {
        let graph = RawGraph {
            entities: vec![
                Entity::new("a", "A", EntityType::Person),
                Entity::new("b", "B", EntityType::Organization),
            ],
            relationships: vec![
                Relationship::new("r1", "a", "b", "works_at"),
                Relationship::new("r2", "a", "ghost", "knows"),
            ],
            ..Default::default()
        };

        let resolved = graph.resolved_relationships();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "r1");
        assert_eq!(graph.dangling_relationships(), 1);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(1.5), 1.0);
        assert_eq!(clamp_score(-0.2), 0.0);
        assert_eq!(clamp_score(f64::NAN), DEFAULT_SCORE);
    }
}
