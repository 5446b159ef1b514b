//! Consolidation results

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

// ============================================================================
// STEPS
// ============================================================================

/// One independently committed consolidation step, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStep {
    /// New facts from recent raw messages
    ExtractFacts,
    /// Missing or stale entity summaries
    EntitySummaries,
    /// Belief nudges from current evidence validity
    EvolveBeliefs,
    /// Procedures from clusters of successful experiences
    ExtractProcedures,
    /// Heat and confidence decay sweep
    ApplyDecay,
    /// Links between unlinked facts and their nearest neighbours
    CrossLinks,
    /// Per-domain meta-knowledge counters
    MetaKnowledge,
}

impl ConsolidationStep {
    pub const ALL: [ConsolidationStep; 7] = [
        ConsolidationStep::ExtractFacts,
        ConsolidationStep::EntitySummaries,
        ConsolidationStep::EvolveBeliefs,
        ConsolidationStep::ExtractProcedures,
        ConsolidationStep::ApplyDecay,
        ConsolidationStep::CrossLinks,
        ConsolidationStep::MetaKnowledge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationStep::ExtractFacts => "extract_facts",
            ConsolidationStep::EntitySummaries => "entity_summaries",
            ConsolidationStep::EvolveBeliefs => "evolve_beliefs",
            ConsolidationStep::ExtractProcedures => "extract_procedures",
            ConsolidationStep::ApplyDecay => "apply_decay",
            ConsolidationStep::CrossLinks => "cross_links",
            ConsolidationStep::MetaKnowledge => "meta_knowledge",
        }
    }
}

impl std::fmt::Display for ConsolidationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a successful step did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StepOutcome {
    /// Ran; `affected` records were written
    Completed { affected: usize },
    /// Could not run without a collaborator; nothing was written
    Skipped { reason: String },
}

impl StepOutcome {
    pub fn completed(affected: usize) -> Self {
        StepOutcome::Completed { affected }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn affected(&self) -> usize {
        match self {
            StepOutcome::Completed { affected } => *affected,
            StepOutcome::Skipped { .. } => 0,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepOutcome::Skipped { .. })
    }
}

/// Failure of one step; the remaining steps still ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{step} failed: {message}")]
pub struct StepError {
    pub step: ConsolidationStep,
    pub message: String,
}

impl StepError {
    pub fn new(step: ConsolidationStep, error: &MemoryError) -> Self {
        Self {
            step,
            message: error.to_string(),
        }
    }
}

impl From<StepError> for MemoryError {
    fn from(e: StepError) -> Self {
        MemoryError::ConsolidationStep {
            step: e.step.as_str(),
            message: e.message,
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// Aggregate result of one consolidation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub steps: Vec<(ConsolidationStep, Result<StepOutcome, StepError>)>,
    pub duration_ms: u64,
}

impl ConsolidationReport {
    /// Every step succeeded (skipped steps count as success)
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|(_, result)| result.is_ok())
    }

    pub fn failed_steps(&self) -> Vec<ConsolidationStep> {
        self.steps
            .iter()
            .filter(|(_, result)| result.is_err())
            .map(|(step, _)| *step)
            .collect()
    }

    pub fn outcome(&self, step: ConsolidationStep) -> Option<&Result<StepOutcome, StepError>> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, r)| r)
    }

    /// Records written across every completed step
    pub fn total_affected(&self) -> usize {
        self.steps
            .iter()
            .filter_map(|(_, result)| result.as_ref().ok())
            .map(StepOutcome::affected)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_partial_success() {
        let report = ConsolidationReport {
            steps: vec![
                (ConsolidationStep::ExtractFacts, Ok(StepOutcome::skipped("no model"))),
                (ConsolidationStep::ApplyDecay, Ok(StepOutcome::completed(3))),
                (
                    ConsolidationStep::CrossLinks,
                    Err(StepError {
                        step: ConsolidationStep::CrossLinks,
                        message: "database is locked".into(),
                    }),
                ),
            ],
            duration_ms: 5,
        };
        assert!(!report.is_complete());
        assert_eq!(report.failed_steps(), vec![ConsolidationStep::CrossLinks]);
        assert_eq!(report.total_affected(), 3);

        let err: MemoryError = report
            .outcome(ConsolidationStep::CrossLinks)
            .unwrap()
            .clone()
            .unwrap_err()
            .into();
        assert_eq!(err.to_string(), "Consolidation step 'cross_links' failed: database is locked");
    }
}
