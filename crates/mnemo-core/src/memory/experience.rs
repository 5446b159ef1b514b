//! Experience and procedure records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::validate::{bounded_list, optional_text, required_text};
use crate::error::ValidationError;

/// Longest accepted experience duration (one week)
pub const MAX_DURATION_SECONDS: i64 = 604_800;

const MAX_DESCRIPTION_LENGTH: usize = 5000;
const MAX_ACTION_LENGTH: usize = 1000;
const MAX_LESSON_LENGTH: usize = 2000;
const MAX_AGENT_ID_LENGTH: usize = 200;
const MAX_RELATED_IDS: usize = 100;

memory_enum! {
    /// Kind of experience
    #[derive(Default)]
    pub enum ExperienceType ("experience_type") {
        AgentRun => "agent_run",
        UserAction => "user_action",
        #[default]
        Conversation => "conversation",
        PatternDetected => "pattern_detected",
    }
}

memory_enum! {
    /// How an experience ended
    #[derive(Default)]
    pub enum Outcome ("outcome") {
        Success => "success",
        Failure => "failure",
        Partial => "partial",
        #[default]
        Unknown => "unknown",
    }
}

/// Something that happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experience {
    pub id: String,
    pub session_id: String,
    pub experience_type: ExperienceType,
    pub description: String,
    pub action_taken: Option<String>,
    pub outcome: Outcome,
    pub outcome_details: serde_json::Map<String, serde_json::Value>,
    pub lesson_learned: Option<String>,
    pub should_repeat: Option<bool>,
    pub occurred_at: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub agent_id: Option<String>,
    pub related_facts: Vec<String>,
    pub related_entities: Vec<String>,
    pub is_procedural: bool,
    pub procedure_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Experience {
    pub fn from_input(session_id: &str, input: ExperienceInput, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            experience_type: input.experience_type,
            description: input.description,
            action_taken: input.action_taken,
            outcome: input.outcome,
            outcome_details: input.outcome_details,
            lesson_learned: input.lesson_learned,
            should_repeat: input.should_repeat,
            occurred_at: input.occurred_at.unwrap_or(now),
            duration_seconds: input.duration_seconds,
            agent_id: input.agent_id,
            related_facts: input.related_facts,
            related_entities: input.related_entities,
            is_procedural: false,
            procedure_id: None,
            created_at: now,
        }
    }

    /// Text used for embeddings and similarity
    pub fn embedding_text(&self) -> String {
        match &self.action_taken {
            Some(action) => format!("{} {}", self.description, action),
            None => self.description.clone(),
        }
    }
}

/// Input for recording an experience
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExperienceInput {
    pub description: String,
    #[serde(default)]
    pub experience_type: ExperienceType,
    #[serde(default)]
    pub action_taken: Option<String>,
    #[serde(default)]
    pub outcome: Outcome,
    #[serde(default)]
    pub outcome_details: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub lesson_learned: Option<String>,
    #[serde(default)]
    pub should_repeat: Option<bool>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub related_facts: Vec<String>,
    #[serde(default)]
    pub related_entities: Vec<String>,
}

impl ExperienceInput {
    pub fn new(description: impl Into<String>, experience_type: ExperienceType) -> Self {
        Self {
            description: description.into(),
            experience_type,
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action_taken = Some(action.into());
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_duration(mut self, seconds: i64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_lesson(mut self, lesson: impl Into<String>) -> Self {
        self.lesson_learned = Some(lesson.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Check every field and return the normalized input
    pub fn validated(self) -> Result<Self, ValidationError> {
        if let Some(seconds) = self.duration_seconds {
            if !(0..=MAX_DURATION_SECONDS).contains(&seconds) {
                return Err(ValidationError::OutOfRange {
                    field: "duration_seconds",
                    value: seconds as f64,
                    min: 0.0,
                    max: MAX_DURATION_SECONDS as f64,
                });
            }
        }
        Ok(Self {
            description: required_text("description", &self.description, MAX_DESCRIPTION_LENGTH)?,
            action_taken: optional_text("action_taken", self.action_taken.as_deref(), MAX_ACTION_LENGTH)?,
            lesson_learned: optional_text(
                "lesson_learned",
                self.lesson_learned.as_deref(),
                MAX_LESSON_LENGTH,
            )?,
            agent_id: optional_text("agent_id", self.agent_id.as_deref(), MAX_AGENT_ID_LENGTH)?,
            related_facts: bounded_list("related_facts", &self.related_facts, MAX_RELATED_IDS, 64)?,
            related_entities: bounded_list(
                "related_entities",
                &self.related_entities,
                MAX_RELATED_IDS,
                64,
            )?,
            ..self
        })
    }
}

// ============================================================================
// PROCEDURES
// ============================================================================

/// Reusable action pattern distilled from repeated successful experiences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub description: String,
    pub procedure_type: ExperienceType,
    pub success_count: i64,
    pub failure_count: i64,
    pub avg_success_rate: f64,
    pub avg_time_saved: f64,
    pub experience_ids: Vec<String>,
    pub version: i64,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome breakdown for one experience type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessRate {
    pub success_rate: f64,
    pub total: i64,
    pub outcomes: BTreeMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_bounds() {
        let base = ExperienceInput::new("ran the sync agent", ExperienceType::AgentRun);
        assert!(base.clone().with_duration(0).validated().is_ok());
        assert!(base.clone().with_duration(MAX_DURATION_SECONDS).validated().is_ok());
        assert!(base.clone().with_duration(MAX_DURATION_SECONDS + 1).validated().is_err());
        assert!(base.with_duration(-1).validated().is_err());
    }

    #[test]
    fn test_blank_optional_fields_collapse() {
        let input = ExperienceInput::new("  did a thing ", ExperienceType::UserAction)
            .with_action("   ")
            .validated()
            .unwrap();
        assert_eq!(input.description, "did a thing");
        assert_eq!(input.action_taken, None);
    }

    #[test]
    fn test_outcome_parse() {
        assert_eq!("PARTIAL".parse::<Outcome>().unwrap(), Outcome::Partial);
        assert!("meh".parse::<Outcome>().is_err());
        assert!(serde_json::from_str::<ExperienceInput>(
            r#"{"description":"x","experienceType":"daydream"}"#
        )
        .is_err());
    }
}
