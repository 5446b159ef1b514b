//! Memory records
//!
//! Typed records for every memory network plus the governance records the
//! scheduler and the operation log rely on:
//!
//! - [`Fact`]: bitemporal statements about the user and the world
//! - [`Experience`] and [`Procedure`]: what happened and what was learned
//! - [`Entity`] and [`Relationship`]: the observation graph
//! - [`Belief`]: opinions with a confidence history and a lifecycle
//! - [`Topic`] and [`KeywordIndex`]: secondary indexes over messages
//! - [`Link`], [`MemCube`], [`OperationLogEntry`], [`MetaKnowledge`]

mod belief;
mod entity;
mod experience;
mod fact;
mod governance;
mod index;
pub(crate) mod validate;

pub use belief::{
    Belief, BeliefInput, BeliefStatus, BeliefType, ConfidenceEntry, MAX_BELIEF_LENGTH,
    MAX_CONFIDENCE_HISTORY, REJECTION_THRESHOLD,
};
pub use entity::{
    canonicalize, Direction, Entity, EntityContext, EntityInput, EntityType, Relationship,
    RelationshipInput, RelationshipView,
};
pub use experience::{
    Experience, ExperienceInput, ExperienceType, Outcome, Procedure, SuccessRate,
    MAX_DURATION_SECONDS,
};
pub use fact::{
    Fact, FactCategory, FactFilter, FactInput, FactSource, FactType, FactUpdate,
    DEFAULT_FACT_DECAY_RATE, MAX_CONTENT_LENGTH, MAX_LIST_ITEMS, MAX_LIST_ITEM_LENGTH,
};
pub use governance::{
    Link, LinkType, MemCube, MetaKnowledge, OperationKind, OperationLogEntry, OperationStats,
    RetentionPolicy,
};
pub use index::{
    push_bounded, InteractionMessage, KeywordIndex, MessageRole, Topic, KEYWORD_MESSAGE_WINDOW,
    TOPIC_MESSAGE_WINDOW,
};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ============================================================================
// MEMORY KIND
// ============================================================================

memory_enum! {
    /// Closed set of memory record families.
    ///
    /// Dispatch over memory types is an exhaustive `match` on this enum;
    /// the string form only exists at the storage and wire boundary.
    pub enum MemoryKind ("memory_type") {
        Fact => "fact",
        Experience => "experience",
        Entity => "entity",
        Relationship => "relationship",
        Belief => "belief",
        Procedure => "procedure",
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Maximum length of a session id
pub const MAX_SESSION_ID_LENGTH: usize = 64;

/// Tenant scope owning every record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a session id
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::Empty { field: "session_id" });
        }
        if id.len() > MAX_SESSION_ID_LENGTH {
            return Err(ValidationError::TooLong {
                field: "session_id",
                max: MAX_SESSION_ID_LENGTH,
                actual: id.chars().count(),
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
        {
            return Err(ValidationError::Malformed {
                field: "session_id",
                reason: "only ASCII letters, digits, '_', '-', '.' and ':' are allowed".into(),
            });
        }
        Ok(Self(id))
    }

    /// The raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Counters across every network for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub session_id: String,
    pub facts_total: i64,
    pub facts_live: i64,
    pub persona_attributes: i64,
    pub experiences: i64,
    pub procedures: i64,
    pub entities: i64,
    pub relationships: i64,
    pub beliefs_total: i64,
    pub beliefs_active: i64,
    pub topics: i64,
    pub keywords: i64,
    pub links: i64,
    pub operations: i64,
    pub messages: i64,
    pub embeddings: i64,
    pub avg_fact_confidence: f64,
    pub avg_fact_heat: f64,
}
