//! Fact records
//!
//! Facts are bitemporal: `valid_from`/`valid_to` say when a statement holds
//! in the world, `record_time` says when it was learned. Closing a fact sets
//! `valid_to`; after that only its heat fields may change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validate::{bounded_list, optional_text, required_text, unit_interval};
use crate::error::ValidationError;

/// Maximum fact content length in characters
pub const MAX_CONTENT_LENGTH: usize = 5000;

/// Maximum entries in `keywords` or `tags`
pub const MAX_LIST_ITEMS: usize = 50;

/// Maximum characters per `keywords`/`tags` entry
pub const MAX_LIST_ITEM_LENGTH: usize = 100;

const MAX_CONTEXT_LENGTH: usize = 2000;
const MAX_SOURCE_ID_LENGTH: usize = 200;

/// Default per-day heat decay rate for new facts
pub const DEFAULT_FACT_DECAY_RATE: f64 = 0.01;

memory_enum! {
    /// What a fact describes
    #[derive(Default)]
    pub enum FactType ("fact_type") {
        #[default]
        Fact => "fact",
        Preference => "preference",
        Habit => "habit",
        Goal => "goal",
        Demographic => "demographic",
        Skill => "skill",
        Opinion => "opinion",
        WorldFact => "world_fact",
        PersonaAttribute => "persona_attribute",
        PersonaEvent => "persona_event",
    }
}

memory_enum! {
    /// Life area a fact belongs to
    pub enum FactCategory ("category") {
        Work => "work",
        Personal => "personal",
        Health => "health",
        Finance => "finance",
        Learning => "learning",
        Other => "other",
    }
}

memory_enum! {
    /// Where a fact came from
    #[derive(Default)]
    pub enum FactSource ("source") {
        #[default]
        Chat => "chat",
        Pattern => "pattern",
        Agent => "agent",
        Manual => "manual",
        Inferred => "inferred",
    }
}

// ============================================================================
// FACT
// ============================================================================

/// A stored fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub fact_type: FactType,
    pub category: Option<FactCategory>,
    pub confidence: f64,
    pub source: FactSource,
    pub source_id: Option<String>,
    pub is_persona_attribute: bool,
    pub is_persona_event: bool,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    pub context: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub event_time: Option<DateTime<Utc>>,
    pub record_time: DateTime<Utc>,
    pub heat_score: f64,
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub decay_rate: f64,
    /// Last time the decay sweep touched `heat_score`
    pub heat_decayed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fact {
    /// Build a new live fact from validated input
    pub fn from_input(session_id: &str, input: FactInput, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            content: input.content,
            fact_type: input.fact_type,
            category: input.category,
            confidence: input.confidence,
            source: input.source,
            source_id: input.source_id,
            is_persona_attribute: input.is_persona_attribute
                || input.fact_type == FactType::PersonaAttribute,
            is_persona_event: input.is_persona_event || input.fact_type == FactType::PersonaEvent,
            keywords: input.keywords,
            tags: input.tags,
            context: input.context,
            valid_from: input.event_time.unwrap_or(now),
            valid_to: None,
            event_time: input.event_time,
            record_time: now,
            heat_score: crate::confidence::INITIAL_HEAT,
            access_count: 0,
            last_accessed: None,
            decay_rate: DEFAULT_FACT_DECAY_RATE,
            heat_decayed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True while the fact holds at `at`
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_to.is_none_or(|end| end > at)
    }

    /// True unless the fact has been closed
    pub fn is_live(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Text used for embeddings and similarity
    pub fn embedding_text(&self) -> &str {
        &self.content
    }

    /// Start of the idle period the next decay sweep should charge for
    pub fn decay_anchor(&self) -> DateTime<Utc> {
        [self.last_accessed, self.heat_decayed_at]
            .into_iter()
            .flatten()
            .fold(self.created_at, |anchor, t| anchor.max(t))
    }
}

// ============================================================================
// INPUTS
// ============================================================================

fn default_confidence() -> f64 {
    1.0
}

/// Input for adding a fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FactInput {
    pub content: String,
    #[serde(default)]
    pub fact_type: FactType,
    #[serde(default)]
    pub category: Option<FactCategory>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source: FactSource,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub is_persona_attribute: bool,
    #[serde(default)]
    pub is_persona_event: bool,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
}

impl Default for FactInput {
    fn default() -> Self {
        Self {
            content: String::new(),
            fact_type: FactType::default(),
            category: None,
            confidence: default_confidence(),
            source: FactSource::default(),
            source_id: None,
            is_persona_attribute: false,
            is_persona_event: false,
            event_time: None,
            keywords: vec![],
            tags: vec![],
            context: None,
        }
    }
}

impl FactInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, fact_type: FactType) -> Self {
        self.fact_type = fact_type;
        self
    }

    pub fn with_category(mut self, category: FactCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_source(mut self, source: FactSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Check every field and return the normalized input
    pub fn validated(self) -> Result<Self, ValidationError> {
        Ok(Self {
            content: required_text("content", &self.content, MAX_CONTENT_LENGTH)?,
            confidence: unit_interval("confidence", self.confidence)?,
            source_id: optional_text("source_id", self.source_id.as_deref(), MAX_SOURCE_ID_LENGTH)?,
            keywords: bounded_list("keywords", &self.keywords, MAX_LIST_ITEMS, MAX_LIST_ITEM_LENGTH)?,
            tags: bounded_list("tags", &self.tags, MAX_LIST_ITEMS, MAX_LIST_ITEM_LENGTH)?,
            context: optional_text("context", self.context.as_deref(), MAX_CONTEXT_LENGTH)?,
            ..self
        })
    }
}

/// Partial update for a live fact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FactUpdate {
    pub content: Option<String>,
    pub confidence: Option<f64>,
    pub category: Option<FactCategory>,
    pub keywords: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub context: Option<String>,
}

impl FactUpdate {
    /// True when nothing would change
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.confidence.is_none()
            && self.category.is_none()
            && self.keywords.is_none()
            && self.tags.is_none()
            && self.context.is_none()
    }

    /// Check every present field and return the normalized update
    pub fn validated(self) -> Result<Self, ValidationError> {
        Ok(Self {
            content: self
                .content
                .map(|c| required_text("content", &c, MAX_CONTENT_LENGTH))
                .transpose()?,
            confidence: self
                .confidence
                .map(|c| unit_interval("confidence", c))
                .transpose()?,
            category: self.category,
            keywords: self
                .keywords
                .map(|k| bounded_list("keywords", &k, MAX_LIST_ITEMS, MAX_LIST_ITEM_LENGTH))
                .transpose()?,
            tags: self
                .tags
                .map(|t| bounded_list("tags", &t, MAX_LIST_ITEMS, MAX_LIST_ITEM_LENGTH))
                .transpose()?,
            context: optional_text("context", self.context.as_deref(), MAX_CONTEXT_LENGTH)?,
        })
    }

    /// Apply to a fact in place
    pub(crate) fn apply(self, fact: &mut Fact, now: DateTime<Utc>) {
        if let Some(content) = self.content {
            fact.content = content;
        }
        if let Some(confidence) = self.confidence {
            fact.confidence = confidence;
        }
        if let Some(category) = self.category {
            fact.category = Some(category);
        }
        if let Some(keywords) = self.keywords {
            fact.keywords = keywords;
        }
        if let Some(tags) = self.tags {
            fact.tags = tags;
        }
        if self.context.is_some() {
            fact.context = self.context;
        }
        fact.updated_at = now;
    }
}

/// Search filters for facts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactFilter {
    pub fact_types: Vec<FactType>,
    pub categories: Vec<FactCategory>,
    pub min_confidence: Option<f64>,
    pub include_invalid: bool,
}

impl FactFilter {
    pub fn with_types(mut self, types: &[FactType]) -> Self {
        self.fact_types = types.to_vec();
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    pub fn including_invalid(mut self) -> Self {
        self.include_invalid = true;
        self
    }

    /// Whether `fact` passes this filter at `now`
    pub fn matches(&self, fact: &Fact, now: DateTime<Utc>) -> bool {
        (self.include_invalid || fact.valid_to.is_none_or(|end| end > now))
            && (self.fact_types.is_empty() || self.fact_types.contains(&fact.fact_type))
            && (self.categories.is_empty()
                || fact.category.is_some_and(|c| self.categories.contains(&c)))
            && self.min_confidence.is_none_or(|min| fact.confidence >= min)
    }
}
