//! Memory Scheduler
//!
//! Heat-based scheduling over the fact network and MemCubes:
//! - Heat bumps for memories touched by applied operations
//! - Per-record decay sweeps (fact heat, idle belief confidence)
//! - Preloading of hot facts, which counts as being scheduled
//! - Hot/cold classification and archival through retention policies
//!
//! Archival never deletes; it only flips the MemCube retention policy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::{bump_heat, heat_score, time_decay, DEFAULT_CONFIDENCE_FLOOR, INITIAL_HEAT};
use crate::engine::MemoryEngine;
use crate::error::{MemoryError, Result};
use crate::memory::{Fact, MemoryKind, RetentionPolicy, SessionId};
use crate::storage::DecayCounts;

/// Per-day decay for low-importance memories
pub const DECAY_RATE_FAST: f64 = 0.1;

/// Per-day decay for ordinary memories
pub const DECAY_RATE_NORMAL: f64 = 0.05;

/// Per-day decay for important or slow-changing memories
pub const DECAY_RATE_SLOW: f64 = 0.01;

/// Heat added to a memory touched by an applied operation
pub const OPERATION_HEAT_BUMP: f64 = 0.2;

/// Facts idle for less than this keep their heat during a sweep
const FACT_IDLE_HOURS: i64 = 1;

/// Window counted as "recently scheduled"
const RECENT_SCHEDULE_HOURS: i64 = 24;

/// Decay rate class for a memory of `kind` with the given importance
pub fn decay_rate_for(kind: MemoryKind, importance: f64) -> f64 {
    match kind {
        MemoryKind::Belief | MemoryKind::Entity => DECAY_RATE_SLOW,
        MemoryKind::Experience => DECAY_RATE_NORMAL,
        MemoryKind::Fact if importance >= 1.5 => DECAY_RATE_SLOW,
        MemoryKind::Fact if importance >= 0.8 => DECAY_RATE_NORMAL,
        MemoryKind::Fact => DECAY_RATE_FAST,
        MemoryKind::Relationship | MemoryKind::Procedure => DECAY_RATE_NORMAL,
    }
}

/// Heat of `fact` recomputed from its access pattern
pub fn fact_heat(fact: &Fact, importance: f64, now: DateTime<Utc>) -> f64 {
    let last = fact.last_accessed.unwrap_or(fact.created_at);
    let hours = (now - last).num_seconds() as f64 / 3600.0;
    heat_score(fact.access_count, hours, importance)
}

/// Hot / warm / cold breakdown of live facts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingStats {
    pub hot: i64,
    pub warm: i64,
    pub cold: i64,
    /// MemCubes scheduled in the last 24 hours
    pub recently_scheduled: i64,
}

/// Scheduler for one session
pub struct MemoryScheduler<'e> {
    engine: &'e MemoryEngine,
    session: &'e SessionId,
}

impl<'e> MemoryScheduler<'e> {
    pub(crate) fn new(engine: &'e MemoryEngine, session: &'e SessionId) -> Self {
        Self { engine, session }
    }

    fn sid(&self) -> &str {
        self.session.as_str()
    }

    /// Bump heat and record an access for every memory an operation touched.
    ///
    /// Facts carry their own heat; other kinds keep it on their MemCube.
    pub fn update_heat_scores(&self, touched: &[(MemoryKind, String)]) -> Result<usize> {
        let now = Utc::now();
        let storage = self.engine.storage();

        let fact_ids: Vec<String> = touched
            .iter()
            .filter(|(kind, _)| *kind == MemoryKind::Fact)
            .map(|(_, id)| id.clone())
            .collect();
        let mut updated = storage.record_fact_access(self.sid(), &fact_ids, OPERATION_HEAT_BUMP, now)?;

        for (kind, id) in touched.iter().filter(|(kind, _)| *kind != MemoryKind::Fact) {
            let current = storage
                .get_cube(*kind, id)?
                .map(|cube| cube.heat_score)
                .unwrap_or(INITIAL_HEAT);
            storage.set_cube_heat(self.sid(), *kind, id, bump_heat(current, OPERATION_HEAT_BUMP), now)?;
            updated += 1;
        }

        tracing::debug!(updated, "Updated heat scores");
        Ok(updated)
    }

    /// Decay fact heat and idle belief confidence in one sweep.
    ///
    /// Each record is charged from its last access or reinforcement, so
    /// running the sweep again without new activity never raises a value.
    pub fn apply_decay(&self) -> Result<DecayCounts> {
        let config = self.engine.config();
        let counts = self.engine.storage().apply_decay(
            self.sid(),
            Duration::hours(FACT_IDLE_HOURS),
            Duration::days(config.belief_idle_days),
            DECAY_RATE_SLOW,
            DEFAULT_CONFIDENCE_FLOOR,
            Utc::now(),
        )?;
        tracing::info!(facts = counts.facts, beliefs = counts.beliefs, "Applied memory decay");
        Ok(counts)
    }

    /// Hottest live facts, each marked as scheduled.
    ///
    /// The mark is recorded whether or not the caller uses the result.
    pub fn predict_and_preload(&self, query: &str) -> Result<Vec<Fact>> {
        let config = self.engine.config();
        let now = Utc::now();
        let storage = self.engine.storage();

        let facts = storage.hot_facts(self.sid(), config.hot_threshold, config.preload_limit, now)?;
        let ids: Vec<String> = facts.iter().map(|f| f.id.clone()).collect();
        storage.mark_scheduled(self.sid(), MemoryKind::Fact, &ids, now)?;

        tracing::debug!(query_len = query.len(), preloaded = facts.len(), "Preloaded hot facts");
        Ok(facts)
    }

    pub fn hot_memories(&self, limit: usize) -> Result<Vec<Fact>> {
        Ok(self.engine.storage().hot_facts(
            self.sid(),
            self.engine.config().hot_threshold,
            limit,
            Utc::now(),
        )?)
    }

    /// Live facts with heat below `threshold`, coldest first
    pub fn cold_memories(&self, threshold: f64, limit: usize) -> Result<Vec<Fact>> {
        Ok(self
            .engine
            .storage()
            .cold_facts(self.sid(), threshold, limit, Utc::now())?)
    }

    /// Archive up to `max` facts colder than `threshold`; returns their ids
    pub fn archive_cold_memories(&self, threshold: f64, max: usize) -> Result<Vec<String>> {
        let now = Utc::now();
        let storage = self.engine.storage();
        let archived = storage.archived_ids(self.sid(), MemoryKind::Fact)?;

        let mut ids = Vec::new();
        for fact in storage.cold_facts(self.sid(), threshold, max + archived.len(), now)? {
            if ids.len() >= max {
                break;
            }
            if archived.contains(&fact.id) {
                continue;
            }
            storage.set_retention(self.sid(), MemoryKind::Fact, &fact.id, RetentionPolicy::Archived, now)?;
            ids.push(fact.id);
        }

        if !ids.is_empty() {
            tracing::info!(count = ids.len(), threshold, "Archived cold memories");
        }
        Ok(ids)
    }

    /// Archive with the configured threshold and batch size
    pub fn archive_with_defaults(&self) -> Result<Vec<String>> {
        let config = self.engine.config();
        self.archive_cold_memories(config.archive_threshold, config.archive_batch)
    }

    /// Raise a memory's heat by `amount`, clamped to `[0, 1]`; returns the new heat
    pub fn boost_memory(&self, kind: MemoryKind, id: &str, amount: f64) -> Result<f64> {
        let amount = if amount.is_nan() { 0.0 } else { amount.clamp(0.0, 1.0) };
        let now = Utc::now();
        let storage = self.engine.storage();

        match kind {
            MemoryKind::Fact => {
                let mut fact = storage
                    .get_fact(self.sid(), id)?
                    .ok_or_else(|| MemoryError::not_found(kind, id))?;
                fact.heat_score = bump_heat(fact.heat_score, amount);
                fact.last_accessed = Some(now);
                fact.updated_at = now;
                storage.save_fact(&fact)?;
                Ok(fact.heat_score)
            }
            _ => {
                let current = storage
                    .get_cube(kind, id)?
                    .map(|cube| cube.heat_score)
                    .unwrap_or(INITIAL_HEAT);
                let heat = bump_heat(current, amount);
                storage.set_cube_heat(self.sid(), kind, id, heat, now)?;
                Ok(heat)
            }
        }
    }

    pub fn scheduling_stats(&self) -> Result<SchedulingStats> {
        let config = self.engine.config();
        let now = Utc::now();
        let storage = self.engine.storage();
        let (hot, warm, cold) =
            storage.count_facts_by_heat(self.sid(), config.hot_threshold, config.cold_threshold, now)?;
        let recently_scheduled =
            storage.count_scheduled_since(self.sid(), now - Duration::hours(RECENT_SCHEDULE_HOURS))?;
        Ok(SchedulingStats {
            hot,
            warm,
            cold,
            recently_scheduled,
        })
    }

    /// Projected decayed confidence of a fact or belief, without writing it
    pub fn memory_decay(&self, kind: MemoryKind, id: &str) -> Result<Option<f64>> {
        let now = Utc::now();
        let storage = self.engine.storage();
        let projected = match kind {
            MemoryKind::Fact => storage.get_fact(self.sid(), id)?.map(|fact| {
                let since = fact.last_accessed.unwrap_or(fact.created_at);
                time_decay(fact.confidence, days_between(since, now), DECAY_RATE_NORMAL, DEFAULT_CONFIDENCE_FLOOR)
            }),
            MemoryKind::Belief => storage.get_belief(self.sid(), id)?.map(|belief| {
                time_decay(
                    belief.confidence,
                    days_between(belief.last_confirmed(), now),
                    DECAY_RATE_SLOW,
                    DEFAULT_CONFIDENCE_FLOOR,
                )
            }),
            _ => None,
        };
        Ok(projected)
    }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds().max(0) as f64 / 86_400.0
}
