//! Test Database Manager
//!
//! Provides isolated engine instances for testing:
//! - Temporary databases that are automatically cleaned up
//! - Pre-seeded sessions with realistic memories
//! - Reopening the same file to check persistence

use std::path::PathBuf;
use std::sync::Arc;

use mnemo_core::{
    EngineBuilder, EngineConfig, ExperienceInput, ExperienceType, FactInput, MemoryEngine,
    MemoryStats, Outcome, SessionId, Storage,
};
use tempfile::TempDir;

use crate::mocks::{HashEmbedder, TestDataFactory};

/// Manager for test databases
///
/// Each manager owns one engine over its own database file and one session.
/// The file is deleted when the manager is dropped.
///
/// # Example
///
/// ```rust,ignore
/// let db = TestDatabaseManager::new_temp();
/// db.engine.facts(&db.session).add(FactInput::new("User lives in Lisbon"))?;
/// ```
pub struct TestDatabaseManager {
    /// The engine under test
    pub engine: MemoryEngine,
    /// Session every helper writes to
    pub session: SessionId,
    /// Temporary directory (kept alive to prevent premature deletion)
    _temp_dir: TempDir,
    /// Path to the database file
    db_path: PathBuf,
}

impl TestDatabaseManager {
    /// Engine with no collaborators over a fresh database
    pub fn new_temp() -> Self {
        Self::with_builder(|builder| builder)
    }

    /// Engine with the deterministic hash embedder attached
    pub fn with_embeddings() -> Self {
        Self::with_builder(|builder| builder.embedder(Arc::new(HashEmbedder::default())))
    }

    /// Engine over a fresh database, customised by `configure`
    pub fn with_builder<F>(configure: F) -> Self
    where
        F: FnOnce(EngineBuilder) -> EngineBuilder,
    {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test_mnemo.db");
        let storage = Storage::new(Some(db_path.clone())).expect("Failed to create test storage");

        Self {
            engine: configure(MemoryEngine::builder(storage)).build(),
            session: SessionId::default(),
            _temp_dir: temp_dir,
            db_path,
        }
    }

    /// Switch every helper to another session of the same database
    pub fn use_session(&mut self, session: &str) {
        self.session = SessionId::new(session).expect("valid session id");
    }

    /// Drop the engine and open the same file again without collaborators
    pub fn reopen(&mut self) {
        let config: EngineConfig = self.engine.config().clone();
        self.engine = MemoryEngine::open(Some(self.db_path.clone()), config)
            .expect("Failed to reopen test database");
    }

    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn stats(&self) -> MemoryStats {
        self.engine
            .storage()
            .get_stats(self.session.as_str(), chrono::Utc::now())
            .expect("stats")
    }

    /// Facts still valid now
    pub fn live_facts(&self) -> i64 {
        self.stats().facts_live
    }

    pub fn is_empty(&self) -> bool {
        let stats = self.stats();
        stats.facts_total == 0 && stats.experiences == 0 && stats.beliefs_total == 0
    }

    // ========================================================================
    // SEEDING METHODS
    // ========================================================================

    /// Seed the session with the factory's profile facts
    pub fn seed_profile(&self) -> Vec<String> {
        let facts = self.engine.facts(&self.session);
        TestDataFactory::profile_facts()
            .into_iter()
            .filter_map(|input| facts.add(input).ok())
            .map(|upsert| upsert.into_record().id)
            .collect()
    }

    /// Seed `count` facts whose contents share no words, so none dedup
    pub fn seed_facts(&self, count: usize) -> Vec<String> {
        let facts = self.engine.facts(&self.session);
        (0..count)
            .filter_map(|i| {
                let content = TestDataFactory::distinct_content(i);
                facts.add(FactInput::new(content)).ok()
            })
            .map(|upsert| upsert.into_record().id)
            .collect()
    }

    /// Seed `count` identical agent runs with the given outcome
    pub fn seed_agent_runs(&self, action: &str, outcome: Outcome, count: usize) -> Vec<String> {
        let experiences = self.engine.experiences(&self.session);
        (0..count)
            .filter_map(|i| {
                let input = ExperienceInput::new(
                    format!("Agent run {} for {}", i, action),
                    ExperienceType::AgentRun,
                )
                .with_action(action)
                .with_outcome(outcome)
                .with_duration(20 + i as i64);
                experiences.add(input).ok()
            })
            .map(|experience| experience.id)
            .collect()
    }

    /// Seed the factory's beliefs
    pub fn seed_beliefs(&self) -> Vec<String> {
        let beliefs = self.engine.beliefs(&self.session);
        TestDataFactory::beliefs()
            .into_iter()
            .filter_map(|input| beliefs.form(input).ok())
            .map(|upsert| upsert.into_record().id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_database_starts_empty() {
        let db = TestDatabaseManager::new_temp();
        assert!(db.is_empty());
        assert!(db.path().exists());
    }

    #[test]
    fn test_seeded_facts_do_not_merge() {
        let db = TestDatabaseManager::new_temp();
        let ids = db.seed_facts(8);
        assert_eq!(ids.len(), 8);
        assert_eq!(db.live_facts(), 8);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let mut db = TestDatabaseManager::new_temp();
        db.seed_profile();
        let before = db.live_facts();
        db.reopen();
        assert_eq!(db.live_facts(), before);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let mut db = TestDatabaseManager::new_temp();
        db.seed_facts(3);
        db.use_session("other");
        assert!(db.is_empty());
    }
}
