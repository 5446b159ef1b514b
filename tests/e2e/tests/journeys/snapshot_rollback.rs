//! Journey: a maintenance batch goes wrong and the snapshot taken before it
//! puts memory back.

use chrono::{Duration, Utc};
use mnemo_core::snapshot::Guarded;
use mnemo_core::{Belief, BeliefInput, FactInput, MemoryError, MemoryKind};
use mnemo_e2e_tests::harness::TestDatabaseManager;

#[test]
fn test_deleted_facts_come_back_unchanged() {
    let db = TestDatabaseManager::new_temp();
    db.seed_profile();
    db.seed_facts(5);
    let live_before = db.live_facts();

    let snapshots = db.engine.snapshots(&db.session);
    let snapshot = snapshots.create_snapshot("before pruning").unwrap();
    assert_eq!(snapshot.facts.len() as i64, live_before);

    let storage = db.engine.storage();
    for fact in &snapshot.facts {
        assert!(storage.delete_fact(db.session.as_str(), &fact.id).unwrap());
    }
    assert_eq!(db.live_facts(), 0);

    let summary = snapshots.rollback_snapshot(&snapshot).unwrap();
    assert_eq!(summary.reinserted, snapshot.facts.len());

    for captured in &snapshot.facts {
        let restored = db.engine.facts(&db.session).get(&captured.id).unwrap();
        assert_eq!(restored.content, captured.content);
        assert_eq!(restored.confidence, captured.confidence);
    }
    assert_eq!(db.live_facts(), live_before);
}

#[test]
fn test_second_rollback_changes_nothing() {
    let db = TestDatabaseManager::new_temp();
    db.seed_facts(3);

    let snapshots = db.engine.snapshots(&db.session);
    let snapshot = snapshots.create_snapshot("nightly").unwrap();
    let first = &snapshot.facts[0];
    db.engine.storage().delete_fact(db.session.as_str(), &first.id).unwrap();

    assert!(!snapshots.rollback_by_id(&snapshot.id).unwrap().is_noop());
    assert!(snapshots.rollback_by_id(&snapshot.id).unwrap().is_noop());
    assert_eq!(db.live_facts(), 3);
}

#[test]
fn test_rollback_undoes_supersession() {
    let db = TestDatabaseManager::new_temp();
    let month_ago = Utc::now() - Duration::days(30);
    let belief = Belief::from_input(
        db.session.as_str(),
        BeliefInput::new("User is a night owl").with_confidence(0.2),
        month_ago,
    );
    db.engine.storage().save_belief(&belief).unwrap();

    let snapshots = db.engine.snapshots(&db.session);
    let snapshot = snapshots.create_snapshot("belief review").unwrap();
    assert_eq!(snapshot.beliefs.len(), 1);

    let beliefs = db.engine.beliefs(&db.session);
    beliefs.supersede(&belief.id, "User is an early riser", None).unwrap();
    assert!(!beliefs.get(&belief.id).unwrap().is_active());

    let summary = snapshots.rollback_snapshot(&snapshot).unwrap();
    assert_eq!(summary.restored, 1);

    let restored = beliefs.get(&belief.id).unwrap();
    assert!(restored.is_active());
    assert!(restored.superseded_by.is_none());
}

#[test]
fn test_guarded_batch_rolls_back_on_failed_check() {
    let db = TestDatabaseManager::new_temp();
    let ids = db.seed_facts(4);
    let snapshots = db.engine.snapshots(&db.session);
    let storage = db.engine.storage();

    let guarded = snapshots
        .guarded(
            "aggressive prune",
            || {
                let mut removed = 0;
                for id in &ids {
                    if storage.delete_fact(db.session.as_str(), id)? {
                        removed += 1;
                    }
                }
                Ok(removed)
            },
            |removed: &usize| *removed < 2,
        )
        .unwrap();

    assert!(guarded.is_rolled_back());
    assert_eq!(guarded.into_value(), 4);
    assert_eq!(db.live_facts(), 4);
}

#[test]
fn test_guarded_batch_rolls_back_on_error() {
    let db = TestDatabaseManager::new_temp();
    let ids = db.seed_facts(2);
    let snapshots = db.engine.snapshots(&db.session);
    let storage = db.engine.storage();

    let result: Result<Guarded<()>, MemoryError> = snapshots.guarded(
        "half-finished batch",
        || {
            storage.delete_fact(db.session.as_str(), &ids[0])?;
            Err(MemoryError::not_found(MemoryKind::Fact, "missing"))
        },
        |_| true,
    );

    assert!(matches!(result, Err(MemoryError::NotFound { .. })));
    assert_eq!(db.live_facts(), 2);
}

#[test]
fn test_healthy_batch_is_kept() {
    let db = TestDatabaseManager::new_temp();
    let snapshots = db.engine.snapshots(&db.session);
    let facts = db.engine.facts(&db.session);

    let guarded = snapshots
        .guarded(
            "import",
            || facts.add(FactInput::new("User speaks Portuguese and English")),
            |_| true,
        )
        .unwrap();

    assert!(!guarded.is_rolled_back());
    assert_eq!(db.live_facts(), 1);
    assert_eq!(snapshots.snapshot_count(), 1);
}

#[test]
fn test_unknown_snapshot_id_is_a_rollback_failure() {
    let db = TestDatabaseManager::new_temp();
    let result = db.engine.snapshots(&db.session).rollback_by_id("no-such-snapshot");
    assert!(matches!(result, Err(MemoryError::RollbackFailure { .. })));
}
