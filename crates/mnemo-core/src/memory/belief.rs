//! Belief records
//!
//! A belief moves through a small state machine:
//!
//! ```text
//! active --reinforce/challenge--> active
//! active --challenge below 0.1--> rejected
//! active --supersede----------->  superseded (points at the newer belief)
//! active --reject-------------->  rejected
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validate::{bounded_list, required_text, unit_interval};
use crate::error::ValidationError;

/// Entries kept in `confidence_history`
pub const MAX_CONFIDENCE_HISTORY: usize = 20;

/// Confidence below which a challenged belief is rejected
pub const REJECTION_THRESHOLD: f64 = 0.1;

/// Maximum belief text length
pub const MAX_BELIEF_LENGTH: usize = 2000;

const MAX_SUPPORTING_FACTS: usize = 100;

memory_enum! {
    /// How a belief was arrived at
    #[derive(Default)]
    pub enum BeliefType ("belief_type") {
        Preference => "preference",
        Opinion => "opinion",
        #[default]
        Inference => "inference",
        Prediction => "prediction",
    }
}

memory_enum! {
    /// Lifecycle state
    #[derive(Default)]
    pub enum BeliefStatus ("status") {
        #[default]
        Active => "active",
        Superseded => "superseded",
        Rejected => "rejected",
    }
}

/// One point in a belief's confidence history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceEntry {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub reason: String,
}

/// An opinion the assistant holds about the user or the world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Belief {
    pub id: String,
    pub session_id: String,
    pub belief: String,
    pub belief_type: BeliefType,
    pub confidence: f64,
    pub confidence_history: Vec<ConfidenceEntry>,
    pub supporting_facts: Vec<String>,
    pub contradicting_facts: Vec<String>,
    pub formed_at: DateTime<Utc>,
    pub last_reinforced: Option<DateTime<Utc>>,
    pub last_challenged: Option<DateTime<Utc>>,
    pub times_reinforced: i64,
    pub times_challenged: i64,
    pub status: BeliefStatus,
    pub superseded_by: Option<String>,
    /// Last time the decay sweep lowered `confidence`
    pub decayed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Belief {
    pub fn from_input(session_id: &str, input: BeliefInput, now: DateTime<Utc>) -> Self {
        let mut belief = Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            belief: input.belief,
            belief_type: input.belief_type,
            confidence: input.confidence,
            confidence_history: Vec::new(),
            supporting_facts: input.supporting_facts,
            contradicting_facts: Vec::new(),
            formed_at: now,
            last_reinforced: None,
            last_challenged: None,
            times_reinforced: 0,
            times_challenged: 0,
            status: BeliefStatus::Active,
            superseded_by: None,
            decayed_at: None,
            created_at: now,
            updated_at: now,
        };
        belief.record(belief.confidence, "initial formation", now);
        belief
    }

    pub fn is_active(&self) -> bool {
        self.status == BeliefStatus::Active
    }

    /// Append a history entry, keeping only the most recent entries
    pub fn record(&mut self, value: f64, reason: impl Into<String>, at: DateTime<Utc>) {
        self.confidence_history.push(ConfidenceEntry {
            timestamp: at,
            value,
            reason: reason.into(),
        });
        if self.confidence_history.len() > MAX_CONFIDENCE_HISTORY {
            let excess = self.confidence_history.len() - MAX_CONFIDENCE_HISTORY;
            self.confidence_history.drain(..excess);
        }
        self.updated_at = at;
    }

    /// Time the belief was last confirmed, falling back to when it formed
    pub fn last_confirmed(&self) -> DateTime<Utc> {
        self.last_reinforced.unwrap_or(self.formed_at)
    }

    /// Start of the idle period the next decay sweep should charge for
    pub fn decay_anchor(&self) -> DateTime<Utc> {
        match self.decayed_at {
            Some(decayed) => decayed.max(self.last_confirmed()),
            None => self.last_confirmed(),
        }
    }
}

fn default_belief_confidence() -> f64 {
    0.5
}

/// Input for forming a belief
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BeliefInput {
    pub belief: String,
    #[serde(default)]
    pub belief_type: BeliefType,
    #[serde(default = "default_belief_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub supporting_facts: Vec<String>,
}

impl BeliefInput {
    pub fn new(belief: impl Into<String>) -> Self {
        Self {
            belief: belief.into(),
            belief_type: BeliefType::default(),
            confidence: default_belief_confidence(),
            supporting_facts: vec![],
        }
    }

    pub fn with_type(mut self, belief_type: BeliefType) -> Self {
        self.belief_type = belief_type;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_support(mut self, fact_ids: Vec<String>) -> Self {
        self.supporting_facts = fact_ids;
        self
    }

    pub fn validated(self) -> Result<Self, ValidationError> {
        Ok(Self {
            belief: required_text("belief", &self.belief, MAX_BELIEF_LENGTH)?,
            confidence: unit_interval("confidence", self.confidence)?,
            supporting_facts: bounded_list(
                "supporting_facts",
                &self.supporting_facts,
                MAX_SUPPORTING_FACTS,
                64,
            )?,
            ..self
        })
    }
}
