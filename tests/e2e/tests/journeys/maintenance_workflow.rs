//! Journey: a long-lived memory is maintained by decay sweeps, archival and
//! consolidation passes that survive a failing collaborator.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mnemo_core::consolidation::ConsolidationStep;
use mnemo_core::{Belief, BeliefInput, Fact, FactInput, MessageRole};
use mnemo_e2e_tests::harness::TestDatabaseManager;
use mnemo_e2e_tests::mocks::{OfflineModel, TestDataFactory};

/// Store records that were last touched well in the past
fn seed_idle_memories(db: &TestDatabaseManager) -> (Vec<String>, String) {
    let storage = db.engine.storage();
    let ten_days_ago = Utc::now() - Duration::days(10);
    let fact_ids = (0..3)
        .map(|i| {
            let fact = Fact::from_input(
                db.session.as_str(),
                FactInput::new(TestDataFactory::distinct_content(i)),
                ten_days_ago,
            );
            storage.insert_fact(&fact).unwrap();
            fact.id
        })
        .collect();

    let belief = Belief::from_input(
        db.session.as_str(),
        BeliefInput::new("User prefers written updates to calls").with_confidence(0.8),
        Utc::now() - Duration::days(30),
    );
    storage.save_belief(&belief).unwrap();
    (fact_ids, belief.id)
}

fn heats(db: &TestDatabaseManager, ids: &[String]) -> Vec<f64> {
    let facts = db.engine.facts(&db.session);
    ids.iter().map(|id| facts.get(id).unwrap().heat_score).collect()
}

#[test]
fn test_decay_twice_never_raises_anything() {
    let db = TestDatabaseManager::new_temp();
    let (fact_ids, belief_id) = seed_idle_memories(&db);
    let beliefs = db.engine.beliefs(&db.session);
    let scheduler = db.engine.scheduler(&db.session);

    let heat_before = heats(&db, &fact_ids);
    let belief_before = beliefs.get(&belief_id).unwrap().confidence;

    let first = scheduler.apply_decay().unwrap();
    assert_eq!(first.facts, 3);
    assert_eq!(first.beliefs, 1);
    let heat_first = heats(&db, &fact_ids);
    let belief_first = beliefs.get(&belief_id).unwrap().confidence;

    scheduler.apply_decay().unwrap();
    let heat_second = heats(&db, &fact_ids);
    let belief_second = beliefs.get(&belief_id).unwrap().confidence;

    for i in 0..fact_ids.len() {
        assert!(heat_first[i] < heat_before[i]);
        assert!(heat_second[i] <= heat_first[i]);
    }
    assert!(belief_first < belief_before);
    assert!(belief_second <= belief_first);
}

#[test]
fn test_archival_walks_through_cold_facts() {
    let db = TestDatabaseManager::new_temp();
    db.seed_facts(3);
    let scheduler = db.engine.scheduler(&db.session);

    // Every fact is colder than 2.0, the top of the heat scale
    assert_eq!(scheduler.archive_cold_memories(2.0, 2).unwrap().len(), 2);
    assert_eq!(scheduler.archive_cold_memories(2.0, 2).unwrap().len(), 1);
    assert!(scheduler.archive_cold_memories(2.0, 2).unwrap().is_empty());
}

#[test]
fn test_consolidation_without_collaborators_completes() {
    let db = TestDatabaseManager::new_temp();
    db.seed_profile();
    db.seed_beliefs();
    db.seed_agent_runs("send_email", mnemo_core::Outcome::Success, 3);

    let report = db.engine.consolidator(&db.session).consolidate();

    assert!(report.is_complete(), "{:?}", report.failed_steps());
    assert_eq!(report.steps.len(), ConsolidationStep::ALL.len());
    let extract = report.outcome(ConsolidationStep::ExtractFacts).unwrap();
    assert!(extract.as_ref().unwrap().is_skipped());
}

#[test]
fn test_failing_model_only_fails_its_own_step() {
    let db = TestDatabaseManager::with_builder(|builder| builder.language_model(Arc::new(OfflineModel)));
    db.seed_profile();
    let manager = db.engine.manager(&db.session);
    for (user, assistant) in TestDataFactory::conversation() {
        manager.record_message(MessageRole::User, user).unwrap();
        manager.record_message(MessageRole::Assistant, assistant).unwrap();
    }

    let report = manager.consolidate();

    assert_eq!(report.failed_steps(), vec![ConsolidationStep::ExtractFacts]);
    for step in ConsolidationStep::ALL {
        if step != ConsolidationStep::ExtractFacts {
            assert!(report.outcome(step).unwrap().is_ok(), "{} failed", step.as_str());
        }
    }
    // The profile is untouched by the failed step
    assert_eq!(db.live_facts(), TestDataFactory::profile_facts().len() as i64);
}

#[test]
fn test_stats_reflect_a_full_session() {
    let db = TestDatabaseManager::new_temp();
    db.seed_profile();
    db.seed_beliefs();
    db.seed_agent_runs("send_email", mnemo_core::Outcome::Success, 3);

    let stats = db.engine.manager(&db.session).stats().unwrap();
    assert_eq!(stats.memory.facts_live, 5);
    assert_eq!(stats.memory.beliefs_active, 2);
    assert_eq!(stats.memory.experiences, 3);
    assert!(stats.memory.avg_fact_confidence > 0.0);
}
