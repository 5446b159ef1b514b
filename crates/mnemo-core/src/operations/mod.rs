//! Operation Decisions
//!
//! Decides ADD/UPDATE/DELETE/NOOP for each interaction, in two halves:
//! - A [`DecisionSource`] proposes raw operations (a language model, a
//!   person, a test script)
//! - A [`DecisionGateway`] executes only operations that passed
//!   [`ProposedOperation::validate`]
//!
//! Storage never sees an unvalidated proposal.

mod decision;
mod gateway;

pub use decision::{DecisionSource, Interaction, LanguageModelDecisions};
pub use gateway::{DecisionGateway, MemoryGateway, OperationOutcome, OPERATION_TRIGGER};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::memory::validate::{required_text, unit_interval};
use crate::memory::{BeliefType, FactType, MemoryKind, OperationKind, MAX_CONTENT_LENGTH};

/// Shortest content an ADD may carry
pub const MIN_ADD_CONTENT_LENGTH: usize = 5;

/// Operation exactly as a decision source produced it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposedOperation {
    pub operation: String,
    pub memory_type: Option<String>,
    pub content: Option<String>,
    pub memory_id: Option<String>,
    pub fact_type: Option<String>,
    pub belief_type: Option<String>,
    pub new_content: Option<String>,
    pub new_confidence: Option<f64>,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
    pub reinforce: bool,
    pub challenge: bool,
}

impl ProposedOperation {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// An ADD of a fact
    pub fn add_fact(content: impl Into<String>) -> Self {
        Self {
            operation: "ADD".into(),
            memory_type: Some("fact".into()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Check the proposal against the closed operation and memory sets
    pub fn validate(self) -> Result<ValidatedOperation, ValidationError> {
        let operation: OperationKind = self.operation.parse()?;
        let memory_kind = match self.memory_type.as_deref().map(str::trim) {
            None | Some("") => MemoryKind::Fact,
            Some(name) => name.parse()?,
        };
        if !matches!(
            memory_kind,
            MemoryKind::Fact | MemoryKind::Belief | MemoryKind::Experience
        ) {
            return Err(ValidationError::Malformed {
                field: "memory_type",
                reason: format!("operations cannot target {}", memory_kind),
            });
        }

        let content = match self.content.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(required_text("content", text, MAX_CONTENT_LENGTH)?),
        };
        let memory_id = self
            .memory_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        match operation {
            OperationKind::Add => match &content {
                None => return Err(ValidationError::Empty { field: "content" }),
                Some(text) if text.chars().count() < MIN_ADD_CONTENT_LENGTH => {
                    return Err(ValidationError::Malformed {
                        field: "content",
                        reason: format!("shorter than {} characters", MIN_ADD_CONTENT_LENGTH),
                    });
                }
                Some(_) => {}
            },
            OperationKind::Update | OperationKind::Delete => {
                if memory_id.is_none() && content.is_none() {
                    return Err(ValidationError::Malformed {
                        field: "memory_id",
                        reason: "either memory_id or content is required".into(),
                    });
                }
            }
            OperationKind::Noop => {}
        }

        let fact_type = self
            .fact_type
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(str::parse::<FactType>)
            .transpose()?;
        let belief_type = self
            .belief_type
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(str::parse::<BeliefType>)
            .transpose()?;
        let confidence = self
            .confidence
            .map(|c| unit_interval("confidence", c))
            .transpose()?;
        let new_confidence = self
            .new_confidence
            .map(|c| unit_interval("new_confidence", c))
            .transpose()?;
        let new_content = match self.new_content.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(required_text("new_content", text, MAX_CONTENT_LENGTH)?),
        };

        let belief_action = match (self.reinforce, self.challenge) {
            (true, false) => Some(BeliefAction::Reinforce),
            (false, true) => Some(BeliefAction::Challenge),
            (false, false) => None,
            (true, true) => {
                return Err(ValidationError::Malformed {
                    field: "reinforce",
                    reason: "cannot both reinforce and challenge".into(),
                });
            }
        };

        Ok(ValidatedOperation {
            operation,
            memory_kind,
            content,
            memory_id,
            fact_type,
            belief_type,
            new_content,
            new_confidence,
            confidence,
            reason: self.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            belief_action,
        })
    }
}

/// Belief adjustment carried by an UPDATE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeliefAction {
    Reinforce,
    Challenge,
}

/// Operation that passed validation; the only shape a gateway executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedOperation {
    pub operation: OperationKind,
    pub memory_kind: MemoryKind,
    pub content: Option<String>,
    pub memory_id: Option<String>,
    pub fact_type: Option<FactType>,
    pub belief_type: Option<BeliefType>,
    pub new_content: Option<String>,
    pub new_confidence: Option<f64>,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
    pub belief_action: Option<BeliefAction>,
}

/// Validate every proposal, dropping the ones that fail
pub fn validate_all(proposed: Vec<ProposedOperation>) -> Vec<ValidatedOperation> {
    proposed
        .into_iter()
        .filter_map(|op| match op.validate() {
            Ok(valid) => Some(valid),
            Err(e) => {
                tracing::debug!("Discarded proposed operation: {}", e);
                None
            }
        })
        .collect()
}
