//! Observation graph records: entities and the relationships between them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validate::{bounded_list, identifier, optional_text, required_text, unit_interval};
use crate::error::ValidationError;

const MAX_NAME_LENGTH: usize = 500;
const MAX_SUMMARY_LENGTH: usize = 2000;
const MAX_KEY_FACTS: usize = 100;
const MAX_KEY_FACT_LENGTH: usize = 500;
const MAX_RELATION_TYPE_LENGTH: usize = 100;
const MAX_EVIDENCE: usize = 100;

memory_enum! {
    /// Kind of thing an entity names
    pub enum EntityType ("entity_type") {
        Person => "person",
        App => "app",
        Project => "project",
        Concept => "concept",
        Location => "location",
        Org => "org",
        Tool => "tool",
        Website => "website",
        File => "file",
        Event => "event",
    }
}

/// Normalized name used for entity dedup: lowercase, trimmed, single spaces
pub fn canonicalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A person, project, tool or other named thing the user talks about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub summary: Option<String>,
    pub key_facts: Vec<String>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub mention_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn from_input(session_id: &str, input: EntityInput, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            canonical_name: canonicalize(&input.name),
            name: input.name,
            entity_type: input.entity_type,
            last_updated: input.summary.as_ref().map(|_| now),
            summary: input.summary,
            key_facts: input.key_facts,
            attributes: input.attributes,
            mention_count: 1,
            first_seen: now,
            last_seen: now,
            created_at: now,
        }
    }

    /// Fold a repeated mention into this entity.
    ///
    /// Summary is replaced when given, attributes are merged key by key and
    /// key facts are unioned, keeping at most the configured limit.
    pub fn absorb(&mut self, input: EntityInput, now: DateTime<Utc>) {
        self.mention_count += 1;
        self.last_seen = now;
        if let Some(summary) = input.summary {
            self.summary = Some(summary);
            self.last_updated = Some(now);
        }
        for (key, value) in input.attributes {
            self.attributes.insert(key, value);
        }
        for fact in input.key_facts {
            if self.key_facts.len() >= MAX_KEY_FACTS {
                break;
            }
            if !self.key_facts.contains(&fact) {
                self.key_facts.push(fact);
            }
        }
    }
}

/// Input for upserting an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EntityInput {
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub key_facts: Vec<String>,
}

impl EntityInput {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            summary: None,
            attributes: serde_json::Map::new(),
            key_facts: vec![],
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_key_fact(mut self, fact: impl Into<String>) -> Self {
        self.key_facts.push(fact.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn validated(self) -> Result<Self, ValidationError> {
        let name = required_text("name", &self.name, MAX_NAME_LENGTH)?;
        Ok(Self {
            name: name.split_whitespace().collect::<Vec<_>>().join(" "),
            summary: optional_text("summary", self.summary.as_deref(), MAX_SUMMARY_LENGTH)?,
            key_facts: bounded_list("key_facts", &self.key_facts, MAX_KEY_FACTS, MAX_KEY_FACT_LENGTH)?,
            ..self
        })
    }
}

// ============================================================================
// RELATIONSHIPS
// ============================================================================

/// Directed, bitemporal edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: String,
    pub session_id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    pub description: Option<String>,
    pub strength: f64,
    pub confidence: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub event_time: Option<DateTime<Utc>>,
    pub evidence: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub fn from_input(session_id: &str, input: RelationshipInput, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            source_id: input.source_id,
            target_id: input.target_id,
            relation_type: input.relation_type,
            description: input.description,
            strength: input.strength,
            confidence: input.confidence,
            valid_from: input.event_time.unwrap_or(now),
            valid_to: None,
            event_time: input.event_time,
            evidence: input.evidence,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_live(&self) -> bool {
        self.valid_to.is_none()
    }
}

fn default_unit() -> f64 {
    1.0
}

/// Input for adding (or reinforcing) a relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RelationshipInput {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_unit")]
    pub strength: f64,
    #[serde(default = "default_unit")]
    pub confidence: f64,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl RelationshipInput {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type: relation_type.into(),
            description: None,
            strength: 1.0,
            confidence: 1.0,
            event_time: None,
            evidence: vec![],
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_evidence(mut self, fact_ids: Vec<String>) -> Self {
        self.evidence = fact_ids;
        self
    }

    pub fn validated(self) -> Result<Self, ValidationError> {
        let source_id = required_text("source_id", &self.source_id, 64)?;
        let target_id = required_text("target_id", &self.target_id, 64)?;
        if source_id == target_id {
            return Err(ValidationError::Malformed {
                field: "target_id",
                reason: "an entity cannot relate to itself".into(),
            });
        }
        Ok(Self {
            source_id,
            target_id,
            relation_type: identifier("relation_type", &self.relation_type, MAX_RELATION_TYPE_LENGTH)?,
            description: optional_text("description", self.description.as_deref(), MAX_SUMMARY_LENGTH)?,
            strength: unit_interval("strength", self.strength)?,
            confidence: unit_interval("confidence", self.confidence)?,
            evidence: bounded_list("evidence", &self.evidence, MAX_EVIDENCE, 64)?,
            ..self
        })
    }
}

/// Which end of a relationship the queried entity sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// A relationship seen from one of its entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipView {
    pub relationship: Relationship,
    pub direction: Direction,
    pub other_id: String,
    pub other_name: String,
    pub other_type: EntityType,
}

/// Compact entity description used when building prompt context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityContext {
    pub name: String,
    pub entity_type: EntityType,
    pub summary: Option<String>,
    pub key_facts: Vec<String>,
    pub relationships: Vec<RelationshipView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("  Ada   Lovelace "), "ada lovelace");
        assert_eq!(canonicalize("ACME\tCorp"), "acme corp");
    }

    #[test]
    fn test_absorb_merges() {
        let now = Utc::now();
        let mut entity = Entity::from_input(
            "s",
            EntityInput::new("Ada", EntityType::Person)
                .with_key_fact("mathematician")
                .with_attribute("born", json!(1815)),
            now,
        );
        entity.absorb(
            EntityInput::new("ada", EntityType::Person)
                .with_summary("First programmer")
                .with_key_fact("mathematician")
                .with_key_fact("wrote notes on the engine")
                .with_attribute("country", json!("UK")),
            now,
        );
        assert_eq!(entity.mention_count, 2);
        assert_eq!(entity.summary.as_deref(), Some("First programmer"));
        assert_eq!(entity.key_facts.len(), 2);
        assert_eq!(entity.attributes.len(), 2);
        assert!(entity.last_updated.is_some());
    }

    #[test]
    fn test_relationship_validation() {
        assert!(RelationshipInput::new("a", "b", "works_on").validated().is_ok());
        assert!(RelationshipInput::new("a", "a", "knows").validated().is_err());
        assert!(RelationshipInput::new("a", "b", "knows; --").validated().is_err());
        assert!(RelationshipInput::new("a", "b", "knows")
            .with_confidence(2.0)
            .validated()
            .is_err());
    }
}
