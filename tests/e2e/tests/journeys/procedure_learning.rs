//! Journey: an agent keeps sending the same email and the engine learns a
//! reusable procedure from it.

use mnemo_core::consolidation::ConsolidationStep;
use mnemo_core::networks::ExperienceQuery;
use mnemo_core::{ExperienceType, Outcome};
use mnemo_e2e_tests::harness::TestDatabaseManager;
use mnemo_e2e_tests::mocks::TestDataFactory;

#[test]
fn test_five_successful_runs_become_one_procedure() {
    let db = TestDatabaseManager::new_temp();
    let ids = db.seed_agent_runs("send_email", Outcome::Success, 5);
    assert_eq!(ids.len(), 5);

    let experiences = db.engine.experiences(&db.session);
    let procedures = experiences.extract_procedures().unwrap();

    assert_eq!(procedures.len(), 1);
    let procedure = &procedures[0];
    assert_eq!(procedure.name, "agent_run_send_email");
    assert_eq!(procedure.procedure_type, ExperienceType::AgentRun);
    assert_eq!(procedure.success_count, 5);
    assert!((procedure.avg_success_rate - 1.0).abs() < 1e-9);
    assert_eq!(procedure.experience_ids.len(), 5);

    for id in &ids {
        let experience = experiences.get(id).unwrap();
        assert!(experience.is_procedural);
        assert_eq!(experience.procedure_id.as_deref(), Some(procedure.id.as_str()));
    }
}

#[test]
fn test_extraction_is_repeatable() {
    let db = TestDatabaseManager::new_temp();
    db.seed_agent_runs("send_email", Outcome::Success, 4);

    let experiences = db.engine.experiences(&db.session);
    assert_eq!(experiences.extract_procedures().unwrap().len(), 1);
    assert!(experiences.extract_procedures().unwrap().is_empty());
    assert_eq!(experiences.procedures().unwrap().len(), 1);
}

#[test]
fn test_unreliable_actions_are_not_learned() {
    let db = TestDatabaseManager::new_temp();
    db.seed_agent_runs("book_flight", Outcome::Success, 1);
    db.seed_agent_runs("book_flight", Outcome::Failure, 4);
    db.seed_agent_runs("send_email", Outcome::Success, 2);

    let procedures = db.engine.experiences(&db.session).extract_procedures().unwrap();
    assert!(procedures.is_empty());
}

#[test]
fn test_consolidation_learns_procedures() {
    let db = TestDatabaseManager::new_temp();
    let experiences = db.engine.experiences(&db.session);
    for _ in 0..3 {
        experiences.add(TestDataFactory::email_run(Outcome::Success)).unwrap();
    }

    let report = db.engine.consolidator(&db.session).consolidate();
    let outcome = report
        .outcome(ConsolidationStep::ExtractProcedures)
        .unwrap()
        .as_ref()
        .unwrap();

    assert_eq!(outcome.affected(), 1);
    assert_eq!(experiences.procedures().unwrap().len(), 1);
}

#[test]
fn test_success_rate_over_recent_runs() {
    let db = TestDatabaseManager::new_temp();
    db.seed_agent_runs("send_email", Outcome::Success, 3);
    db.seed_agent_runs("send_email", Outcome::Failure, 1);

    let experiences = db.engine.experiences(&db.session);
    let rate = experiences.success_rate(Some(ExperienceType::AgentRun), 24).unwrap();
    assert_eq!(rate.total, 4);
    assert!((rate.success_rate - 0.75).abs() < 1e-9);

    let failures = experiences
        .recent(&ExperienceQuery::default().with_outcomes(&[Outcome::Failure]))
        .unwrap();
    assert_eq!(failures.len(), 1);
}
