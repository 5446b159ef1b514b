//! Experience network and procedure learning

use chrono::{Duration, Utc};
use std::collections::BTreeMap;

use crate::engine::MemoryEngine;
use crate::error::{MemoryError, Result};
use crate::memory::{
    Experience, ExperienceInput, ExperienceType, MemoryKind, Outcome, Procedure, SessionId,
    SuccessRate,
};
use crate::search::{clamp_limit, rank, SearchHit};

/// Minimum members of an experience cluster before it becomes a procedure
pub const PROCEDURE_MIN_OCCURRENCES: i64 = 3;

/// Minimum success rate of a cluster before it becomes a procedure
pub const PROCEDURE_MIN_SUCCESS_RATE: f64 = 0.7;

/// Clusters considered per extraction pass
pub const PROCEDURE_MAX_GROUPS: usize = 10;

/// Filters for [`ExperienceNetwork::recent`]
#[derive(Debug, Clone, PartialEq)]
pub struct ExperienceQuery {
    pub limit: usize,
    pub types: Vec<ExperienceType>,
    pub outcomes: Vec<Outcome>,
    /// Only experiences from the last `hours`
    pub hours: Option<i64>,
}

impl Default for ExperienceQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            types: Vec::new(),
            outcomes: Vec::new(),
            hours: None,
        }
    }
}

impl ExperienceQuery {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_types(mut self, types: &[ExperienceType]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn with_outcomes(mut self, outcomes: &[Outcome]) -> Self {
        self.outcomes = outcomes.to_vec();
        self
    }

    pub fn within_hours(mut self, hours: i64) -> Self {
        self.hours = Some(hours);
        self
    }
}

/// Experiences of one session
pub struct ExperienceNetwork<'e> {
    engine: &'e MemoryEngine,
    session: &'e SessionId,
}

impl<'e> ExperienceNetwork<'e> {
    pub(crate) fn new(engine: &'e MemoryEngine, session: &'e SessionId) -> Self {
        Self { engine, session }
    }

    fn sid(&self) -> &str {
        self.session.as_str()
    }

    pub fn add(&self, input: ExperienceInput) -> Result<Experience> {
        let input = input.validated()?;
        let now = Utc::now();
        let experience = Experience::from_input(self.sid(), input, now);
        self.engine.storage().insert_experience(&experience)?;
        self.engine.index_embedding(
            self.session,
            MemoryKind::Experience,
            &experience.id,
            &experience.embedding_text(),
            now,
        );
        tracing::debug!(
            id = %experience.id,
            experience_type = %experience.experience_type,
            outcome = %experience.outcome,
            "Recorded experience"
        );
        Ok(experience)
    }

    pub fn get(&self, id: &str) -> Result<Experience> {
        self.engine
            .storage()
            .get_experience(self.sid(), id)?
            .ok_or_else(|| MemoryError::not_found(MemoryKind::Experience, id))
    }

    pub fn recent(&self, query: &ExperienceQuery) -> Result<Vec<Experience>> {
        let since = query.hours.map(|h| Utc::now() - Duration::hours(h.max(0)));
        Ok(self.engine.storage().recent_experiences(
            self.sid(),
            clamp_limit(query.limit),
            &query.types,
            &query.outcomes,
            since,
        )?)
    }

    /// Vector ranking over stored experience embeddings, text match otherwise
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit<Experience>>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let limit = clamp_limit(limit);
        let storage = self.engine.storage();

        if let Some(embedding) = self.engine.embeddings().embed(query) {
            let stored = storage.load_embeddings(self.sid(), MemoryKind::Experience)?;
            let ranked = self.engine.embeddings().find_similar(
                &embedding,
                stored.iter().map(|s| (s.memory_id.as_str(), &s.embedding)),
                0.0,
                limit,
            );
            let mut hits = Vec::with_capacity(ranked.len());
            for (id, score) in ranked {
                if let Some(experience) = storage.get_experience(self.sid(), &id)? {
                    hits.push(SearchHit::vector(experience, score));
                }
            }
            if !hits.is_empty() {
                return Ok(rank(hits, limit));
            }
        }

        Ok(storage
            .search_experiences_text(self.sid(), query, limit)?
            .into_iter()
            .map(SearchHit::text)
            .collect())
    }

    pub fn agent_experiences(&self, agent_id: &str, limit: usize) -> Result<Vec<Experience>> {
        Ok(self
            .engine
            .storage()
            .agent_experiences(self.sid(), agent_id, clamp_limit(limit))?)
    }

    /// Outcome breakdown over the last `hours`, optionally for one type
    pub fn success_rate(&self, experience_type: Option<ExperienceType>, hours: i64) -> Result<SuccessRate> {
        let since = Utc::now() - Duration::hours(hours.max(0));
        let outcomes = self
            .engine
            .storage()
            .experience_outcomes(self.sid(), experience_type, since)?;
        let total: i64 = outcomes.values().sum();
        let successes = outcomes.get(Outcome::Success.as_str()).copied().unwrap_or(0);
        Ok(SuccessRate {
            success_rate: if total > 0 { successes as f64 / total as f64 } else { 0.0 },
            total,
            outcomes,
        })
    }

    /// Most recent lessons learned
    pub fn lessons(&self, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .engine
            .storage()
            .experiences_with_lessons(self.sid(), clamp_limit(limit))?
            .into_iter()
            .filter_map(|e| e.lesson_learned)
            .collect())
    }

    pub fn mark_procedural(&self, id: &str, procedure_id: Option<&str>) -> Result<bool> {
        Ok(self
            .engine
            .storage()
            .mark_experience_procedural(self.sid(), id, procedure_id)?)
    }

    pub fn count_by_type(&self) -> Result<BTreeMap<String, i64>> {
        Ok(self.engine.storage().count_experiences_by_type(self.sid())?)
    }

    pub fn procedures(&self) -> Result<Vec<Procedure>> {
        Ok(self.engine.storage().list_procedures(self.sid())?)
    }

    /// Turn successful `(type, action)` clusters into procedures.
    ///
    /// Clusters whose procedure name already exists are skipped, so running
    /// this repeatedly never duplicates a procedure.
    pub fn extract_procedures(&self) -> Result<Vec<Procedure>> {
        let storage = self.engine.storage();
        let clusters = storage.experience_clusters(
            self.sid(),
            PROCEDURE_MIN_OCCURRENCES,
            PROCEDURE_MIN_SUCCESS_RATE,
            PROCEDURE_MAX_GROUPS,
        )?;

        let mut created = Vec::new();
        for cluster in clusters {
            let name = procedure_name(cluster.experience_type, &cluster.action_taken);
            if storage.get_procedure_by_name(self.sid(), &name)?.is_some() {
                continue;
            }

            let now = Utc::now();
            let n = cluster.count as f64;
            let procedure = Procedure {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: self.sid().to_string(),
                name,
                description: format!(
                    "Learned from {} successful {} experiences",
                    cluster.count, cluster.experience_type
                ),
                procedure_type: cluster.experience_type,
                success_count: (n * cluster.success_rate).floor() as i64,
                failure_count: (n * (1.0 - cluster.success_rate)).floor() as i64,
                avg_success_rate: cluster.success_rate,
                avg_time_saved: cluster.avg_duration,
                experience_ids: cluster.experience_ids.clone(),
                version: 1,
                last_used: None,
                created_at: now,
                updated_at: now,
            };
            storage.insert_procedure(&procedure)?;
            for experience_id in &cluster.experience_ids {
                storage.mark_experience_procedural(self.sid(), experience_id, Some(&procedure.id))?;
            }
            tracing::info!(
                name = %procedure.name,
                members = cluster.count,
                success_rate = cluster.success_rate,
                "Extracted procedure"
            );
            created.push(procedure);
        }
        Ok(created)
    }
}

/// `{type}_{action}` truncated to the 100-character name limit
fn procedure_name(experience_type: ExperienceType, action: &str) -> String {
    format!("{}_{}", experience_type, action).chars().take(100).collect()
}
