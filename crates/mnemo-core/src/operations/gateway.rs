//! Executing validated operations

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{validate_all, BeliefAction, Interaction, ValidatedOperation};
use crate::confidence::{DEFAULT_CHALLENGE_STRENGTH, DEFAULT_REINFORCE_STRENGTH};
use crate::engine::MemoryEngine;
use crate::error::{MemoryError, Result};
use crate::memory::{
    BeliefInput, ExperienceInput, ExperienceType, FactFilter, FactInput, FactSource, FactUpdate,
    MemoryKind, OperationKind, OperationLogEntry, OperationStats, Outcome, SessionId,
};

/// Trigger recorded on every logged operation
pub const OPERATION_TRIGGER: &str = "chat_message";

/// Confidence of an added fact when the proposal names none
const DEFAULT_FACT_CONFIDENCE: f64 = 0.8;

/// Confidence of a formed belief when the proposal names none
const DEFAULT_BELIEF_CONFIDENCE: f64 = 0.6;

/// What happened to one validated operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    /// Operation the decision source asked for
    pub requested: OperationKind,
    /// Operation that took effect; `Noop` when nothing changed
    pub applied: OperationKind,
    pub memory_kind: MemoryKind,
    pub memory_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl OperationOutcome {
    /// The record this outcome changed, if any
    pub fn touched(&self) -> Option<(MemoryKind, String)> {
        if !self.success || self.applied == OperationKind::Noop {
            return None;
        }
        self.memory_id.clone().map(|id| (self.memory_kind, id))
    }
}

/// Executes validated operations against memory.
///
/// Accepts only [`ValidatedOperation`]s, so any decision source can drive
/// it without storage trusting that source.
pub trait DecisionGateway {
    fn execute(&self, operation: &ValidatedOperation) -> OperationOutcome;

    fn execute_all(&self, operations: &[ValidatedOperation]) -> Vec<OperationOutcome> {
        operations.iter().map(|op| self.execute(op)).collect()
    }
}

/// Gateway over one session of a [`MemoryEngine`]
pub struct MemoryGateway<'e> {
    engine: &'e MemoryEngine,
    session: &'e SessionId,
}

/// Result of applying one operation before it is logged
enum Applied {
    Changed(String),
    Unchanged(Option<String>),
}

impl<'e> MemoryGateway<'e> {
    pub(crate) fn new(engine: &'e MemoryEngine, session: &'e SessionId) -> Self {
        Self { engine, session }
    }

    fn sid(&self) -> &str {
        self.session.as_str()
    }

    /// Ask the configured decision source and keep the valid proposals.
    ///
    /// An absent or failing source decides nothing.
    pub fn decide(&self, context: &str, interaction: &Interaction) -> Vec<ValidatedOperation> {
        let Some(source) = self.engine.decision_source() else {
            tracing::debug!("No decision source configured");
            return Vec::new();
        };
        match source.propose(context, interaction) {
            Ok(proposed) => {
                let valid = validate_all(proposed);
                tracing::info!(count = valid.len(), "Decided memory operations");
                valid
            }
            Err(e) => {
                tracing::warn!("Decision source failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Operation log counters over the last `hours`
    pub fn operation_stats(&self, hours: i64) -> Result<OperationStats> {
        let since = Utc::now() - Duration::hours(hours.max(0));
        Ok(self.engine.storage().operation_stats(self.sid(), since)?)
    }

    /// Most recent operation log entries, newest first
    pub fn recent_operations(&self, limit: usize) -> Result<Vec<OperationLogEntry>> {
        Ok(self.engine.storage().recent_operations(self.sid(), limit)?)
    }

    fn apply(&self, op: &ValidatedOperation) -> Result<Applied> {
        match op.operation {
            OperationKind::Noop => Ok(Applied::Unchanged(None)),
            OperationKind::Add => self.add(op),
            OperationKind::Update => self.update(op),
            OperationKind::Delete => self.delete(op),
        }
    }

    fn add(&self, op: &ValidatedOperation) -> Result<Applied> {
        let Some(content) = op.content.clone() else {
            return Ok(Applied::Unchanged(None));
        };
        let id = match op.memory_kind {
            MemoryKind::Fact => {
                let input = FactInput::new(content)
                    .with_type(op.fact_type.unwrap_or_default())
                    .with_confidence(op.confidence.unwrap_or(DEFAULT_FACT_CONFIDENCE))
                    .with_source(FactSource::Chat);
                self.engine.facts(self.session).add(input)?.into_record().id
            }
            MemoryKind::Belief => {
                let input = BeliefInput::new(content)
                    .with_type(op.belief_type.unwrap_or_default())
                    .with_confidence(op.confidence.unwrap_or(DEFAULT_BELIEF_CONFIDENCE));
                self.engine.beliefs(self.session).form(input)?.into_record().id
            }
            MemoryKind::Experience => {
                let input = ExperienceInput::new(content, ExperienceType::Conversation)
                    .with_outcome(Outcome::Success);
                self.engine.experiences(self.session).add(input)?.id
            }
            _ => return Ok(Applied::Unchanged(None)),
        };
        Ok(Applied::Changed(id))
    }

    fn update(&self, op: &ValidatedOperation) -> Result<Applied> {
        match op.memory_kind {
            MemoryKind::Fact => {
                let id = self.resolve_fact(op)?;
                let content = op.new_content.clone().or_else(|| {
                    op.memory_id.as_ref().and(op.content.clone())
                });
                let update = FactUpdate {
                    content,
                    confidence: op.new_confidence,
                    ..Default::default()
                };
                if update.is_empty() {
                    return Ok(Applied::Unchanged(Some(id)));
                }
                self.engine.facts(self.session).update(&id, update)?;
                Ok(Applied::Changed(id))
            }
            MemoryKind::Belief => {
                let id = self.resolve_belief(op)?;
                let beliefs = self.engine.beliefs(self.session);
                let reason = op.reason.as_deref();
                match (op.belief_action, &op.new_content) {
                    (Some(BeliefAction::Reinforce), _) => {
                        beliefs.reinforce(&id, DEFAULT_REINFORCE_STRENGTH, None)?;
                        Ok(Applied::Changed(id))
                    }
                    (Some(BeliefAction::Challenge), _) => {
                        beliefs.challenge(&id, DEFAULT_CHALLENGE_STRENGTH, None)?;
                        Ok(Applied::Changed(id))
                    }
                    (None, Some(text)) => {
                        let successor = beliefs.supersede(&id, text, reason)?;
                        Ok(Applied::Changed(successor.id))
                    }
                    (None, None) => Ok(Applied::Unchanged(Some(id))),
                }
            }
            _ => Ok(Applied::Unchanged(op.memory_id.clone())),
        }
    }

    fn delete(&self, op: &ValidatedOperation) -> Result<Applied> {
        match op.memory_kind {
            MemoryKind::Fact => {
                let id = self.resolve_fact(op)?;
                if !self.engine.facts(self.session).invalidate(&id)? {
                    return Err(MemoryError::not_found(MemoryKind::Fact, id));
                }
                Ok(Applied::Changed(id))
            }
            MemoryKind::Belief => {
                let id = self.resolve_belief(op)?;
                self.engine
                    .beliefs(self.session)
                    .reject(&id, op.reason.as_deref())?;
                Ok(Applied::Changed(id))
            }
            _ => Ok(Applied::Unchanged(op.memory_id.clone())),
        }
    }

    /// Target fact by id, else the best live match for the content. The
    /// match is not counted as an access.
    fn resolve_fact(&self, op: &ValidatedOperation) -> Result<String> {
        if let Some(id) = &op.memory_id {
            return Ok(id.clone());
        }
        let content = op.content.as_deref().unwrap_or_default();
        self.engine
            .facts(self.session)
            .lookup(content, 1, &FactFilter::default())?
            .into_iter()
            .next()
            .map(|hit| hit.item.id)
            .ok_or_else(|| MemoryError::not_found(MemoryKind::Fact, content))
    }

    /// Target belief by id, else the first active belief containing the content
    fn resolve_belief(&self, op: &ValidatedOperation) -> Result<String> {
        if let Some(id) = &op.memory_id {
            return Ok(id.clone());
        }
        let content = op.content.as_deref().unwrap_or_default();
        self.engine
            .storage()
            .find_active_beliefs_containing(self.sid(), content)?
            .into_iter()
            .next()
            .map(|belief| belief.id)
            .ok_or_else(|| MemoryError::not_found(MemoryKind::Belief, content))
    }

    fn log(&self, op: &ValidatedOperation, outcome: &OperationOutcome) {
        let entry = OperationLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.sid().to_string(),
            operation: outcome.applied,
            memory_kind: Some(outcome.memory_kind),
            memory_id: outcome.memory_id.clone(),
            trigger: OPERATION_TRIGGER.to_string(),
            reason: op.reason.clone(),
            confidence: op.confidence,
            success: outcome.success,
            error: outcome.error.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.engine.storage().append_operation(&entry) {
            tracing::warn!("Failed to log memory operation: {}", e);
        }
    }
}

impl DecisionGateway for MemoryGateway<'_> {
    /// Apply one operation and log it.
    ///
    /// A missing target is logged and reported as a NOOP; any other
    /// failure is logged as unsuccessful.
    fn execute(&self, operation: &ValidatedOperation) -> OperationOutcome {
        let mut outcome = OperationOutcome {
            requested: operation.operation,
            applied: operation.operation,
            memory_kind: operation.memory_kind,
            memory_id: operation.memory_id.clone(),
            success: true,
            error: None,
        };

        match self.apply(operation) {
            Ok(Applied::Changed(id)) => outcome.memory_id = Some(id),
            Ok(Applied::Unchanged(id)) => {
                outcome.applied = OperationKind::Noop;
                outcome.memory_id = id;
            }
            Err(e) if e.is_not_found() => {
                tracing::info!(operation = %operation.operation, "Operation target not found: {}", e);
                outcome.applied = OperationKind::Noop;
                outcome.error = Some(e.to_string());
            }
            Err(e) => {
                tracing::error!(operation = %operation.operation, "Memory operation failed: {}", e);
                outcome.success = false;
                outcome.error = Some(e.to_string());
            }
        }

        self.log(operation, &outcome);
        outcome
    }
}
