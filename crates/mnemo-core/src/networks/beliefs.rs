//! Belief network
//!
//! Every confidence change appends one history entry. A challenge that
//! leaves confidence under [`REJECTION_THRESHOLD`] rejects the belief, and
//! only [`BeliefNetwork::supersede`] can grow a belief chain.

use chrono::Utc;

use super::Upsert;
use crate::confidence::{self, DEFAULT_CHALLENGE_STRENGTH, DEFAULT_REINFORCE_STRENGTH};
use crate::engine::MemoryEngine;
use crate::error::{MemoryError, Result, ValidationError};
use crate::memory::{
    Belief, BeliefInput, BeliefStatus, BeliefType, MemoryKind, SessionId, REJECTION_THRESHOLD,
};
use crate::search::clamp_limit;

/// Characters of a new belief used to detect an equivalent active belief
pub const FORM_DEDUP_PREFIX: usize = 50;

/// Confidence at or above which a belief counts as high-confidence
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Nudges applied by [`BeliefNetwork::evolve_from_evidence`]
pub const EVIDENCE_REINFORCE_STRENGTH: f64 = 0.02;
pub const EVIDENCE_CHALLENGE_STRENGTH: f64 = 0.9;

/// Share of valid contradictions that triggers a challenge
pub const CONTRADICTION_SHARE: f64 = 0.3;

/// Beliefs of one session
pub struct BeliefNetwork<'e> {
    engine: &'e MemoryEngine,
    session: &'e SessionId,
}

impl<'e> BeliefNetwork<'e> {
    pub(crate) fn new(engine: &'e MemoryEngine, session: &'e SessionId) -> Self {
        Self { engine, session }
    }

    fn sid(&self) -> &str {
        self.session.as_str()
    }

    /// Form a belief, or reinforce an active one that already contains the
    /// first 50 characters of this text
    pub fn form(&self, input: BeliefInput) -> Result<Upsert<Belief>> {
        let input = input.validated()?;
        let prefix: String = input.belief.chars().take(FORM_DEDUP_PREFIX).collect();
        let storage = self.engine.storage();

        if let Some(existing) = storage
            .find_active_beliefs_containing(self.sid(), &prefix)?
            .into_iter()
            .next()
        {
            let mut existing = existing;
            for fact_id in input.supporting_facts {
                if !existing.supporting_facts.contains(&fact_id) {
                    existing.supporting_facts.push(fact_id);
                }
            }
            let belief = self.apply_reinforce(existing, DEFAULT_REINFORCE_STRENGTH, "formed again")?;
            return Ok(Upsert::Merged(belief));
        }

        let now = Utc::now();
        let belief = Belief::from_input(self.sid(), input, now);
        storage.save_belief(&belief)?;
        self.engine
            .index_embedding(self.session, MemoryKind::Belief, &belief.id, &belief.belief, now);
        tracing::info!(id = %belief.id, confidence = belief.confidence, "Formed belief");
        Ok(Upsert::Inserted(belief))
    }

    pub fn get(&self, id: &str) -> Result<Belief> {
        self.engine
            .storage()
            .get_belief(self.sid(), id)?
            .ok_or_else(|| MemoryError::not_found(MemoryKind::Belief, id))
    }

    fn get_active(&self, id: &str) -> Result<Belief> {
        let belief = self.get(id)?;
        if !belief.is_active() {
            return Err(ValidationError::Malformed {
                field: "belief",
                reason: format!("belief is {}", belief.status),
            }
            .into());
        }
        Ok(belief)
    }

    /// Raise confidence, optionally recording a supporting fact
    pub fn reinforce(&self, id: &str, strength: f64, evidence: Option<&str>) -> Result<Belief> {
        let mut belief = self.get_active(id)?;
        let reason = match evidence {
            Some(fact_id) => {
                if !belief.supporting_facts.iter().any(|f| f == fact_id) {
                    belief.supporting_facts.push(fact_id.to_string());
                }
                format!("reinforced by {}", fact_id)
            }
            None => "reinforced".to_string(),
        };
        self.apply_reinforce(belief, strength, &reason)
    }

    fn apply_reinforce(&self, mut belief: Belief, strength: f64, reason: &str) -> Result<Belief> {
        let now = Utc::now();
        belief.confidence = confidence::reinforce(belief.confidence, strength);
        belief.times_reinforced += 1;
        belief.last_reinforced = Some(now);
        belief.record(belief.confidence, reason, now);
        self.engine.storage().save_belief(&belief)?;
        tracing::debug!(id = %belief.id, confidence = belief.confidence, "Reinforced belief");
        Ok(belief)
    }

    /// Lower confidence, optionally recording a contradicting fact. Drops
    /// the belief to rejected once confidence falls under 0.1.
    pub fn challenge(&self, id: &str, strength: f64, evidence: Option<&str>) -> Result<Belief> {
        let mut belief = self.get_active(id)?;
        let reason = match evidence {
            Some(fact_id) => {
                if !belief.contradicting_facts.iter().any(|f| f == fact_id) {
                    belief.contradicting_facts.push(fact_id.to_string());
                }
                format!("challenged by {}", fact_id)
            }
            None => "challenged".to_string(),
        };
        self.apply_challenge(belief, strength, &reason)
    }

    fn apply_challenge(&self, mut belief: Belief, strength: f64, reason: &str) -> Result<Belief> {
        let now = Utc::now();
        belief.confidence = confidence::challenge(belief.confidence, strength);
        belief.times_challenged += 1;
        belief.last_challenged = Some(now);
        belief.record(belief.confidence, reason, now);
        if belief.confidence < REJECTION_THRESHOLD {
            belief.status = BeliefStatus::Rejected;
            belief.record(belief.confidence, "confidence below rejection threshold", now);
            tracing::info!(id = %belief.id, "Belief rejected after challenge");
        }
        self.engine.storage().save_belief(&belief)?;
        Ok(belief)
    }

    /// Replace an active or rejected belief with a newer one.
    ///
    /// The new belief inherits confidence and supporting facts; the old one
    /// becomes superseded and points at it. Both writes share a transaction.
    /// A belief that is already superseded keeps its single successor.
    pub fn supersede(&self, id: &str, new_text: &str, reason: Option<&str>) -> Result<Belief> {
        let mut old = self.get(id)?;
        if old.status == BeliefStatus::Superseded {
            return Err(ValidationError::Malformed {
                field: "belief",
                reason: format!("belief is {}", old.status),
            }
            .into());
        }
        let reason = reason.unwrap_or("evolved understanding");
        let input = BeliefInput::new(new_text)
            .with_type(old.belief_type)
            .with_confidence(old.confidence)
            .with_support(old.supporting_facts.clone())
            .validated()?;

        let now = Utc::now();
        let mut new = Belief::from_input(self.sid(), input, now);
        new.confidence_history.clear();
        new.record(new.confidence, format!("supersedes {}: {}", old.id, reason), now);

        old.status = BeliefStatus::Superseded;
        old.superseded_by = Some(new.id.clone());
        old.record(old.confidence, format!("superseded: {}", reason), now);

        self.engine.storage().save_beliefs(&[&old, &new])?;
        self.engine
            .index_embedding(self.session, MemoryKind::Belief, &new.id, &new.belief, now);
        tracing::info!(old = %old.id, new = %new.id, "Superseded belief");
        Ok(new)
    }

    pub fn reject(&self, id: &str, reason: Option<&str>) -> Result<Belief> {
        let mut belief = self.get_active(id)?;
        let now = Utc::now();
        belief.status = BeliefStatus::Rejected;
        belief.record(belief.confidence, reason.unwrap_or("manually rejected"), now);
        self.engine.storage().save_belief(&belief)?;
        Ok(belief)
    }

    pub fn active(&self, min_confidence: f64, types: &[BeliefType], limit: usize) -> Result<Vec<Belief>> {
        Ok(self
            .engine
            .storage()
            .active_beliefs(self.sid(), min_confidence, types, clamp_limit(limit))?)
    }

    pub fn high_confidence(&self, limit: usize) -> Result<Vec<Belief>> {
        self.active(HIGH_CONFIDENCE, &[], limit)
    }

    /// Active beliefs with confidence between 0.1 and 0.5, most challenged first
    pub fn uncertain(&self, limit: usize) -> Result<Vec<Belief>> {
        Ok(self
            .engine
            .storage()
            .uncertain_beliefs(self.sid(), REJECTION_THRESHOLD, 0.5, clamp_limit(limit))?)
    }

    pub fn count_by_domain(&self, domain: &str) -> Result<i64> {
        Ok(self.engine.storage().count_beliefs_mentioning(self.sid(), domain)?)
    }

    /// Nudge an active belief according to the current validity of its evidence.
    ///
    /// More than half of the supporting facts still valid reinforces by 0.02;
    /// valid contradictions making up over 30% of all evidence challenge by 0.9.
    pub fn evolve_from_evidence(&self, id: &str) -> Result<Belief> {
        let mut belief = self.get_active(id)?;
        let storage = self.engine.storage();
        let now = Utc::now();

        let valid = |ids: &[String]| -> Result<usize> {
            let mut count = 0;
            for fact_id in ids {
                if storage
                    .get_fact(self.sid(), fact_id)?
                    .is_some_and(|f| f.is_valid_at(now))
                {
                    count += 1;
                }
            }
            Ok(count)
        };
        let valid_support = valid(&belief.supporting_facts)?;
        let valid_contradictions = valid(&belief.contradicting_facts)?;
        let evidence = belief.supporting_facts.len() + belief.contradicting_facts.len();

        if !belief.supporting_facts.is_empty() && valid_support * 2 > belief.supporting_facts.len() {
            belief = self.apply_reinforce(belief, EVIDENCE_REINFORCE_STRENGTH, "supporting evidence holds")?;
        }
        if evidence > 0 && valid_contradictions as f64 / evidence as f64 > CONTRADICTION_SHARE {
            belief = self.apply_challenge(belief, EVIDENCE_CHALLENGE_STRENGTH, "contradicting evidence")?;
        }
        Ok(belief)
    }

    /// Default-strength reinforcement
    pub fn confirm(&self, id: &str) -> Result<Belief> {
        self.reinforce(id, DEFAULT_REINFORCE_STRENGTH, None)
    }

    /// Default-strength challenge
    pub fn doubt(&self, id: &str) -> Result<Belief> {
        self.challenge(id, DEFAULT_CHALLENGE_STRENGTH, None)
    }
}
