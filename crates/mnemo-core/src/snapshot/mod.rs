//! Snapshot and rollback
//!
//! A snapshot is a plain value copy of the records a risky maintenance
//! batch is likely to touch: old low-confidence facts, beliefs and
//! relationships (pruning candidates) plus every recently created fact
//! (consolidation candidates). Snapshots live in a bounded in-process ring.
//!
//! Rollback re-inserts captured records that have disappeared and puts
//! back the mutable fields of those that survived, inside one writer
//! transaction. It can be repeated safely.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::MemoryEngine;
use crate::error::{MemoryError, Result, ValidationError};
use crate::memory::{Belief, Fact, Relationship, SessionId};
use crate::storage::{CaptureWindow, RestoreCounts};

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// What a snapshot was taken for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotScope {
    pub session_id: String,
    pub reason: String,
}

/// Before-state of a mutation batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub scope: SnapshotScope,
    pub facts: Vec<Fact>,
    pub beliefs: Vec<Belief>,
    pub relationships: Vec<Relationship>,
}

impl Snapshot {
    /// Number of captured records
    pub fn len(&self) -> usize {
        self.facts.len() + self.beliefs.len() + self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded ring of recent snapshots, oldest dropped first
pub struct SnapshotStore {
    capacity: usize,
    ring: Mutex<VecDeque<Snapshot>>,
}

impl SnapshotStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn push(&self, snapshot: Snapshot) {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        while ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(snapshot);
    }

    fn find(&self, session: &str, id: &str) -> Option<Snapshot> {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.iter()
            .find(|s| s.id == id && s.scope.session_id == session)
            .cloned()
    }

    fn latest(&self, session: &str) -> Option<Snapshot> {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.iter()
            .rev()
            .find(|s| s.scope.session_id == session)
            .cloned()
    }

    fn count(&self, session: &str) -> usize {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.iter().filter(|s| s.scope.session_id == session).count()
    }
}

// ============================================================================
// ROLLBACK RESULTS
// ============================================================================

/// What a rollback put back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSummary {
    pub snapshot_id: String,
    /// Deleted records re-inserted
    pub reinserted: usize,
    /// Surviving records whose fields were restored
    pub restored: usize,
}

impl RollbackSummary {
    fn new(snapshot_id: &str, counts: RestoreCounts) -> Self {
        Self {
            snapshot_id: snapshot_id.to_string(),
            reinserted: counts.inserted,
            restored: counts.updated,
        }
    }

    /// Nothing needed restoring
    pub fn is_noop(&self) -> bool {
        self.reinserted == 0 && self.restored == 0
    }
}

/// Result of a guarded mutation
#[derive(Debug)]
pub enum Guarded<T> {
    /// Health check passed; the mutation stands
    Kept(T),
    /// Health check failed and the snapshot was restored
    RolledBack { value: T, summary: RollbackSummary },
}

impl<T> Guarded<T> {
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Guarded::RolledBack { .. })
    }

    pub fn into_value(self) -> T {
        match self {
            Guarded::Kept(value) | Guarded::RolledBack { value, .. } => value,
        }
    }
}

// ============================================================================
// MANAGER
// ============================================================================

/// Snapshot and rollback for one session
pub struct SnapshotManager<'e> {
    engine: &'e MemoryEngine,
    session: &'e SessionId,
}

impl<'e> SnapshotManager<'e> {
    pub(crate) fn new(engine: &'e MemoryEngine, session: &'e SessionId) -> Self {
        Self { engine, session }
    }

    fn sid(&self) -> &str {
        self.session.as_str()
    }

    /// Capture the before-state of a maintenance batch and keep it in the ring
    pub fn create_snapshot(&self, reason: &str) -> Result<Snapshot> {
        let config = self.engine.config();
        let storage = self.engine.storage();
        let now = Utc::now();
        let window = CaptureWindow {
            low_confidence: config.snapshot_low_confidence,
            older_than: now - Duration::days(config.snapshot_prune_age_days),
            recent_since: now - Duration::days(config.snapshot_recent_days),
        };
        let captured = storage.capture_snapshot(self.sid(), &window)?;

        let snapshot = Snapshot {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            scope: SnapshotScope {
                session_id: self.sid().to_string(),
                reason: reason.trim().to_string(),
            },
            facts: captured.facts,
            beliefs: captured.beliefs,
            relationships: captured.relationships,
        };

        tracing::info!(
            snapshot_id = %snapshot.id,
            reason = %snapshot.scope.reason,
            facts = snapshot.facts.len(),
            beliefs = snapshot.beliefs.len(),
            relationships = snapshot.relationships.len(),
            "Created snapshot"
        );
        self.engine.snapshot_store().push(snapshot.clone());
        Ok(snapshot)
    }

    /// Snapshot by id, if still in the ring
    pub fn snapshot(&self, id: &str) -> Option<Snapshot> {
        self.engine.snapshot_store().find(self.sid(), id)
    }

    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.engine.snapshot_store().latest(self.sid())
    }

    /// Snapshots of this session still held
    pub fn snapshot_count(&self) -> usize {
        self.engine.snapshot_store().count(self.sid())
    }

    /// Restore `snapshot` in a single transaction.
    ///
    /// A failed restore leaves the mutated state in place and is reported
    /// as [`MemoryError::RollbackFailure`].
    pub fn rollback_snapshot(&self, snapshot: &Snapshot) -> Result<RollbackSummary> {
        if snapshot.scope.session_id != self.sid() {
            return Err(ValidationError::Malformed {
                field: "snapshot",
                reason: format!("snapshot {} belongs to another session", snapshot.id),
            }
            .into());
        }

        let counts = self
            .engine
            .storage()
            .restore_records(&snapshot.facts, &snapshot.beliefs, &snapshot.relationships)
            .map_err(|e| {
                tracing::error!(snapshot_id = %snapshot.id, error = %e, "Snapshot rollback failed");
                MemoryError::RollbackFailure {
                    snapshot_id: snapshot.id.clone(),
                    message: e.to_string(),
                }
            })?;

        let summary = RollbackSummary::new(&snapshot.id, counts);
        tracing::info!(
            snapshot_id = %snapshot.id,
            reinserted = summary.reinserted,
            restored = summary.restored,
            "Rolled back snapshot"
        );
        Ok(summary)
    }

    /// Roll back the snapshot with the given id
    pub fn rollback_by_id(&self, id: &str) -> Result<RollbackSummary> {
        let snapshot = self.snapshot(id).ok_or_else(|| MemoryError::RollbackFailure {
            snapshot_id: id.to_string(),
            message: "snapshot is no longer held".to_string(),
        })?;
        self.rollback_snapshot(&snapshot)
    }

    /// Snapshot, run `mutation`, then keep it only if `health_check` passes.
    ///
    /// A mutation that errors is rolled back too and its error returned.
    pub fn guarded<T, M, H>(&self, reason: &str, mutation: M, health_check: H) -> Result<Guarded<T>>
    where
        M: FnOnce() -> Result<T>,
        H: FnOnce(&T) -> bool,
    {
        let snapshot = self.create_snapshot(reason)?;

        let value = match mutation() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(snapshot_id = %snapshot.id, error = %e, "Guarded mutation failed");
                self.rollback_snapshot(&snapshot)?;
                return Err(e);
            }
        };

        if health_check(&value) {
            return Ok(Guarded::Kept(value));
        }

        tracing::warn!(snapshot_id = %snapshot.id, reason, "Health check failed, rolling back");
        let summary = self.rollback_snapshot(&snapshot)?;
        Ok(Guarded::RolledBack { value, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BeliefInput, EntityInput, EntityType, FactInput, RelationshipInput};
    use crate::config::EngineConfig;
    use crate::testing::{engine_with, test_engine};

    fn live_facts(engine: &MemoryEngine, session: &SessionId) -> i64 {
        engine
            .storage()
            .get_stats(session.as_str(), Utc::now())
            .unwrap()
            .facts_live
    }

    fn add_facts(engine: &MemoryEngine, session: &SessionId, contents: &[&str]) -> Vec<Fact> {
        contents
            .iter()
            .map(|c| engine.facts(session).add(FactInput::new(*c)).unwrap().into_record())
            .collect()
    }

    #[test]
    fn test_rollback_restores_deleted_facts() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        let originals = add_facts(
            &engine,
            &session,
            &[
                "User lives in Lisbon",
                "User drinks oat milk",
                "User's sister is called Marta",
            ],
        );

        let snapshots = engine.snapshots(&session);
        let snapshot = snapshots.create_snapshot("prune").unwrap();
        assert_eq!(snapshot.facts.len(), 3);

        for fact in &snapshot.facts {
            assert!(engine.storage().delete_fact(session.as_str(), &fact.id).unwrap());
        }
        assert!(engine.facts(&session).get(&originals[0].id).unwrap_err().is_not_found());

        let summary = snapshots.rollback_snapshot(&snapshot).unwrap();
        assert_eq!(summary.reinserted, 3);

        for original in &originals {
            let restored = engine.facts(&session).get(&original.id).unwrap();
            assert_eq!(restored.content, original.content);
            assert!((restored.confidence - original.confidence).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        add_facts(&engine, &session, &["User owns a grey cat", "User works remotely"]);

        let snapshots = engine.snapshots(&session);
        let snapshot = snapshots.create_snapshot("consolidate").unwrap();
        let first = &snapshot.facts[0];
        engine.storage().delete_fact(session.as_str(), &first.id).unwrap();

        let once = snapshots.rollback_snapshot(&snapshot).unwrap();
        assert_eq!(once.reinserted, 1);
        let twice = snapshots.rollback_snapshot(&snapshot).unwrap();
        assert!(twice.is_noop());

        assert_eq!(live_facts(&engine, &session), 2);
    }

    #[test]
    fn test_rollback_restores_mutated_fields() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        let fact = add_facts(&engine, &session, &["User prefers tea over coffee"]).remove(0);
        let beliefs = engine.beliefs(&session);
        let belief = beliefs
            .form(BeliefInput::new("User values quiet mornings").with_confidence(0.6))
            .unwrap()
            .into_record();

        let observations = engine.observations(&session);
        let user = observations
            .upsert_entity(EntityInput::new("User", EntityType::Person))
            .unwrap()
            .into_record();
        let cafe = observations
            .upsert_entity(EntityInput::new("Corner Cafe", EntityType::Location))
            .unwrap()
            .into_record();
        let rel = observations
            .add_relationship(RelationshipInput::new(&user.id, &cafe.id, "visits").with_strength(0.5))
            .unwrap()
            .into_record();

        // Beliefs and relationships this young are not pruning candidates, so
        // capture them by hand alongside the automatic fact capture.
        let snapshots = engine.snapshots(&session);
        let mut snapshot = snapshots.create_snapshot("evolve").unwrap();
        snapshot.beliefs.push(beliefs.get(&belief.id).unwrap());
        snapshot.relationships.push(rel.clone());

        engine.facts(&session).invalidate(&fact.id).unwrap();
        beliefs.reject(&belief.id, Some("test")).unwrap();
        observations.invalidate_relationship(&rel.id).unwrap();

        let summary = snapshots.rollback_snapshot(&snapshot).unwrap();
        assert_eq!(summary.reinserted, 0);
        assert_eq!(summary.restored, 3);

        assert!(engine.facts(&session).get(&fact.id).unwrap().valid_to.is_none());
        let restored = beliefs.get(&belief.id).unwrap();
        assert!(restored.is_active());
        assert!((restored.confidence - 0.6).abs() < 1e-9);
        assert!(observations.get_relationship(&rel.id).unwrap().valid_to.is_none());
    }

    #[test]
    fn test_ring_drops_oldest() {
        let (engine, _dir) = engine_with(|builder| {
            builder.config(EngineConfig {
                snapshot_capacity: 2,
                ..EngineConfig::default()
            })
        });
        let session = SessionId::default();
        let snapshots = engine.snapshots(&session);

        let first = snapshots.create_snapshot("one").unwrap();
        snapshots.create_snapshot("two").unwrap();
        let third = snapshots.create_snapshot("three").unwrap();

        assert_eq!(snapshots.snapshot_count(), 2);
        assert!(snapshots.snapshot(&first.id).is_none());
        assert_eq!(snapshots.latest_snapshot().unwrap().id, third.id);
        assert!(matches!(
            snapshots.rollback_by_id(&first.id),
            Err(MemoryError::RollbackFailure { .. })
        ));
    }

    #[test]
    fn test_snapshots_are_session_scoped() {
        let (engine, _dir) = test_engine();
        let alice = SessionId::new("alice").unwrap();
        let bob = SessionId::new("bob").unwrap();
        let snapshot = engine.snapshots(&alice).create_snapshot("mine").unwrap();

        assert!(engine.snapshots(&bob).snapshot(&snapshot.id).is_none());
        let err = engine.snapshots(&bob).rollback_snapshot(&snapshot).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_guarded_rolls_back_on_failed_health_check() {
        let (engine, _dir) = test_engine();
        let session = SessionId::default();
        let facts = add_facts(&engine, &session, &["User runs on Sundays", "User is learning Rust"]);
        let snapshots = engine.snapshots(&session);

        let outcome = snapshots
            .guarded(
                "bulk prune",
                || {
                    let mut removed = 0;
                    for fact in &facts {
                        if engine.storage().delete_fact(session.as_str(), &fact.id)? {
                            removed += 1;
                        }
                    }
                    Ok(removed)
                },
                |removed| *removed < 2,
            )
            .unwrap();

        assert!(outcome.is_rolled_back());
        assert_eq!(live_facts(&engine, &session), 2);

        let kept = snapshots
            .guarded(
                "single prune",
                || Ok(engine.storage().delete_fact(session.as_str(), &facts[0].id)?),
                |_| true,
            )
            .unwrap();
        assert!(!kept.is_rolled_back());
        assert_eq!(live_facts(&engine, &session), 1);
    }
}
