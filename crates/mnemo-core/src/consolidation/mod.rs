//! Memory Consolidation Module
//!
//! Idempotent maintenance pass over one session:
//! - Extract facts from recent messages
//! - Refresh entity summaries
//! - Evolve beliefs from their evidence
//! - Learn procedures from experience clusters
//! - Decay heat and idle belief confidence
//! - Cross-link similar facts
//! - Recompute per-domain meta-knowledge
//!
//! Each step commits on its own. A failing step is logged and reported;
//! the others still run.

mod report;

pub use report::{ConsolidationReport, ConsolidationStep, StepError, StepOutcome};

use chrono::Utc;
use std::collections::HashSet;
use std::time::Instant;

use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::memory::{FactFilter, LinkType, MemoryKind, MetaKnowledge, SessionId};
use crate::search::text_similarity;

/// Domains tracked in meta-knowledge
pub const META_DOMAINS: [&str; 5] = ["work", "personal", "preferences", "habits", "goals"];

/// Facts and beliefs in a domain at which coverage confidence saturates
const META_SATURATION: f64 = 10.0;

/// Active beliefs re-evaluated per pass
const BELIEF_EVOLUTION_LIMIT: usize = 500;

/// Live facts compared when linking without embeddings
const TEXT_LINK_SCAN_LIMIT: usize = 500;

/// Consolidation for one session
pub struct Consolidator<'e> {
    engine: &'e MemoryEngine,
    session: &'e SessionId,
}

impl<'e> Consolidator<'e> {
    pub(crate) fn new(engine: &'e MemoryEngine, session: &'e SessionId) -> Self {
        Self { engine, session }
    }

    fn sid(&self) -> &str {
        self.session.as_str()
    }

    /// Run every step in order and collect their results
    pub fn consolidate(&self) -> ConsolidationReport {
        let start = Instant::now();
        tracing::info!(session = %self.session, "Starting memory consolidation");

        let steps: Vec<_> = ConsolidationStep::ALL
            .iter()
            .map(|&step| (step, self.run_step(step)))
            .collect();

        let report = ConsolidationReport {
            steps,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            session = %self.session,
            affected = report.total_affected(),
            failed = report.failed_steps().len(),
            duration_ms = report.duration_ms,
            "Memory consolidation complete"
        );
        report
    }

    /// Run a single step; failures are logged with the step name
    pub fn run_step(&self, step: ConsolidationStep) -> std::result::Result<StepOutcome, StepError> {
        let result = match step {
            ConsolidationStep::ExtractFacts => self.extract_facts(),
            ConsolidationStep::EntitySummaries => self.entity_summaries(),
            ConsolidationStep::EvolveBeliefs => self.evolve_beliefs(),
            ConsolidationStep::ExtractProcedures => self.extract_procedures(),
            ConsolidationStep::ApplyDecay => self.apply_decay(),
            ConsolidationStep::CrossLinks => self.cross_links(),
            ConsolidationStep::MetaKnowledge => self.meta_knowledge(),
        };
        result.map_err(|e| {
            tracing::warn!(step = %step, "Consolidation step failed: {}", e);
            StepError::new(step, &e)
        })
    }

    fn extract_facts(&self) -> Result<StepOutcome> {
        if self.engine.language_model().is_none() {
            return Ok(StepOutcome::skipped("no language model configured"));
        }
        let added = self.engine.facts(self.session).extract_from_recent_messages()?;
        Ok(StepOutcome::completed(added.len()))
    }

    fn entity_summaries(&self) -> Result<StepOutcome> {
        if self.engine.summarizer().is_none() {
            return Ok(StepOutcome::skipped("no summarizer configured"));
        }
        let refreshed = self.engine.observations(self.session).refresh_summaries()?;
        Ok(StepOutcome::completed(refreshed))
    }

    /// Fails only when every belief failed to evolve
    fn evolve_beliefs(&self) -> Result<StepOutcome> {
        let beliefs = self.engine.beliefs(self.session);
        let active = beliefs.active(0.0, &[], BELIEF_EVOLUTION_LIMIT)?;

        let mut changed = 0;
        let mut last_error = None;
        for belief in &active {
            match beliefs.evolve_from_evidence(&belief.id) {
                Ok(evolved) => {
                    if evolved.confidence != belief.confidence {
                        changed += 1;
                    }
                }
                Err(e) => {
                    tracing::debug!(id = %belief.id, "Belief evolution failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if changed == 0 && !active.is_empty() => Err(e),
            _ => Ok(StepOutcome::completed(changed)),
        }
    }

    fn extract_procedures(&self) -> Result<StepOutcome> {
        let procedures = self.engine.experiences(self.session).extract_procedures()?;
        Ok(StepOutcome::completed(procedures.len()))
    }

    fn apply_decay(&self) -> Result<StepOutcome> {
        let counts = self.engine.scheduler(self.session).apply_decay()?;
        Ok(StepOutcome::completed(counts.facts + counts.beliefs))
    }

    /// Link recent unlinked facts to their nearest live neighbours.
    ///
    /// Uses stored embeddings when available, text similarity otherwise.
    /// Self matches and already linked pairs are skipped.
    fn cross_links(&self) -> Result<StepOutcome> {
        let config = self.engine.config();
        let storage = self.engine.storage();
        let facts = self.engine.facts(self.session);
        let now = Utc::now();

        let unlinked = facts.unlinked(config.link_batch)?;
        if unlinked.is_empty() {
            return Ok(StepOutcome::completed(0));
        }

        let live = storage.list_facts(self.sid(), &FactFilter::default(), TEXT_LINK_SCAN_LIMIT, now)?;
        let live_ids: HashSet<&str> = live.iter().map(|f| f.id.as_str()).collect();
        let stored = storage.load_embeddings(self.sid(), MemoryKind::Fact)?;

        let mut created = 0;
        for fact in &unlinked {
            let neighbours: Vec<(String, f64)> = match storage.get_embedding(MemoryKind::Fact, &fact.id)? {
                Some(embedding) => self.engine.embeddings().find_similar(
                    &embedding,
                    stored
                        .iter()
                        .filter(|s| s.memory_id != fact.id && live_ids.contains(s.memory_id.as_str()))
                        .map(|s| (s.memory_id.as_str(), &s.embedding)),
                    config.link_threshold,
                    config.link_fanout,
                ),
                None => {
                    let mut scored: Vec<(String, f64)> = live
                        .iter()
                        .filter(|other| other.id != fact.id)
                        .map(|other| (other.id.clone(), text_similarity(&fact.content, &other.content)))
                        .filter(|(_, score)| *score >= config.link_threshold)
                        .collect();
                    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                    scored.truncate(config.link_fanout);
                    scored
                }
            };

            for (target, score) in neighbours {
                if storage.link_exists(self.sid(), (MemoryKind::Fact, &fact.id), (MemoryKind::Fact, &target))? {
                    continue;
                }
                if facts.create_link(&fact.id, &target, LinkType::Related, score, Some("similar content".into()))? {
                    created += 1;
                }
            }
        }

        tracing::debug!(created, candidates = unlinked.len(), "Created cross-links");
        Ok(StepOutcome::completed(created))
    }

    fn meta_knowledge(&self) -> Result<StepOutcome> {
        let storage = self.engine.storage();
        let beliefs = self.engine.beliefs(self.session);
        let now = Utc::now();

        for domain in META_DOMAINS {
            let facts_count = storage.count_facts_mentioning(self.sid(), domain, now)?;
            let beliefs_count = beliefs.count_by_domain(domain)?;
            let experiences_count = storage.count_experiences_mentioning(self.sid(), domain)?;
            let coverage = ((facts_count + beliefs_count) as f64 / META_SATURATION).min(1.0);

            storage.upsert_meta(&MetaKnowledge {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: self.sid().to_string(),
                domain: domain.to_string(),
                facts_count,
                beliefs_count,
                experiences_count,
                confidence_score: coverage,
                last_updated: now,
                created_at: now,
            })?;
        }
        Ok(StepOutcome::completed(META_DOMAINS.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BeliefInput, ExperienceInput, ExperienceType, FactInput, Outcome};
    use crate::testing::{engine_with, test_engine, HashEmbedder, OfflineModel};
    use std::sync::Arc;

    #[test]
    fn test_steps_without_collaborators_are_skipped() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        let report = engine.consolidator(&session).consolidate();

        assert!(report.is_complete());
        assert_eq!(report.steps.len(), 7);
        assert!(report
            .outcome(ConsolidationStep::ExtractFacts)
            .unwrap()
            .as_ref()
            .unwrap()
            .is_skipped());
        assert!(report
            .outcome(ConsolidationStep::EntitySummaries)
            .unwrap()
            .as_ref()
            .unwrap()
            .is_skipped());
    }

    #[test]
    fn test_failing_step_does_not_stop_the_rest() {
        let (engine, _dir) = engine_with(|b| b.language_model(Arc::new(OfflineModel)));
        let session = SessionId::default();
        let persona = engine.persona(&session);
        persona.add_attribute("User is a nurse").unwrap();
        engine
            .storage()
            .insert_message(&crate::memory::InteractionMessage::new(
                session.as_str(),
                crate::memory::MessageRole::User,
                "I work night shifts at the hospital",
                Utc::now(),
            ))
            .unwrap();

        let report = engine.consolidator(&session).consolidate();
        assert_eq!(report.failed_steps(), vec![ConsolidationStep::ExtractFacts]);
        assert!(report.outcome(ConsolidationStep::MetaKnowledge).unwrap().is_ok());
        assert_eq!(engine.storage().list_meta(session.as_str()).unwrap().len(), 5);
    }

    #[test]
    fn test_procedures_learned_in_pass() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        for _ in 0..5 {
            engine
                .experiences(&session)
                .add(
                    ExperienceInput::new("Sent the weekly report", ExperienceType::AgentRun)
                        .with_action("send_email")
                        .with_outcome(Outcome::Success),
                )
                .unwrap();
        }

        let consolidator = engine.consolidator(&session);
        let outcome = consolidator.run_step(ConsolidationStep::ExtractProcedures).unwrap();
        assert_eq!(outcome.affected(), 1);

        // a second pass finds nothing new
        let outcome = consolidator.run_step(ConsolidationStep::ExtractProcedures).unwrap();
        assert_eq!(outcome.affected(), 0);
    }

    #[test]
    fn test_cross_links_with_embeddings() {
        let (engine, _dir) = engine_with(|b| b.embedder(Arc::new(HashEmbedder::default())));
        let session = SessionId::default();
        let facts = engine.facts(&session);
        let a = facts
            .add(FactInput::new("User enjoys hiking in the mountains during summer"))
            .unwrap()
            .into_record();
        let b = facts
            .add(FactInput::new("User enjoys hiking in the mountains during winter"))
            .unwrap()
            .into_record();
        facts.add(FactInput::new("Quarterly taxes are due in April")).unwrap();

        let consolidator = engine.consolidator(&session);
        let created = consolidator.run_step(ConsolidationStep::CrossLinks).unwrap().affected();
        assert_eq!(created, 1);
        assert!(engine
            .storage()
            .link_exists(session.as_str(), (MemoryKind::Fact, &a.id), (MemoryKind::Fact, &b.id))
            .unwrap());

        // idempotent
        assert_eq!(consolidator.run_step(ConsolidationStep::CrossLinks).unwrap().affected(), 0);
    }

    #[test]
    fn test_meta_knowledge_coverage() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        engine
            .facts(&session)
            .add(FactInput::new("User has a stressful work schedule"))
            .unwrap();
        engine
            .beliefs(&session)
            .form(BeliefInput::new("User cares about work life balance"))
            .unwrap();

        engine
            .consolidator(&session)
            .run_step(ConsolidationStep::MetaKnowledge)
            .unwrap();
        let metas = engine.storage().list_meta(session.as_str()).unwrap();
        let work = metas.iter().find(|m| m.domain == "work").unwrap();
        assert_eq!(work.facts_count, 1);
        assert_eq!(work.beliefs_count, 1);
        assert!((work.confidence_score - 0.2).abs() < 1e-9);
    }
}
