//! Governance records: links, MemCubes, the operation log and meta-knowledge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MemoryKind;

memory_enum! {
    /// Zettelkasten link type
    #[derive(Default)]
    pub enum LinkType ("link_type") {
        #[default]
        Related => "related",
        Supports => "supports",
        Contradicts => "contradicts",
        DerivedFrom => "derived_from",
    }
}

memory_enum! {
    /// Retention policy held on a MemCube
    #[derive(Default)]
    pub enum RetentionPolicy ("retention_policy") {
        #[default]
        Standard => "standard",
        Pinned => "pinned",
        Archived => "archived",
    }
}

memory_enum! {
    /// Memory operation decided for an interaction
    pub enum OperationKind ("operation") {
        Add => "ADD",
        Update => "UPDATE",
        Delete => "DELETE",
        Noop => "NOOP",
    }
}

/// Typed edge between any two memory records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: String,
    pub session_id: String,
    pub source_kind: MemoryKind,
    pub source_id: String,
    pub target_kind: MemoryKind,
    pub target_id: String,
    pub link_type: LinkType,
    pub strength: f64,
    pub bidirectional: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Scheduling and governance metadata for one memory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemCube {
    pub id: String,
    pub session_id: String,
    pub memory_kind: MemoryKind,
    pub memory_id: String,
    pub version: i64,
    pub retention_policy: RetentionPolicy,
    pub heat_score: f64,
    pub last_scheduled: Option<DateTime<Utc>>,
    pub schedule_count: i64,
    pub migrated_from: Option<String>,
    pub migrated_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemCube {
    pub fn new(session_id: &str, memory_kind: MemoryKind, memory_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            memory_kind,
            memory_id: memory_id.to_string(),
            version: 1,
            retention_policy: RetentionPolicy::Standard,
            heat_score: crate::confidence::INITIAL_HEAT,
            last_scheduled: None,
            schedule_count: 0,
            migrated_from: None,
            migrated_to: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable audit record of one decided operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLogEntry {
    pub id: String,
    pub session_id: String,
    pub operation: OperationKind,
    pub memory_kind: Option<MemoryKind>,
    pub memory_id: Option<String>,
    pub trigger: String,
    pub reason: Option<String>,
    pub confidence: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What the engine knows about one domain of the user's life
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaKnowledge {
    pub id: String,
    pub session_id: String,
    pub domain: String,
    pub facts_count: i64,
    pub beliefs_count: i64,
    pub experiences_count: i64,
    pub confidence_score: f64,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Operation log counters over a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStats {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub by_operation: std::collections::BTreeMap<String, i64>,
}
