//! Database Migrations
//!
//! Schema migration definitions for the storage layer. Every table is
//! scoped by `session_id` and indexed for "most recent N by session" and
//! "valid now by session" queries.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Memory networks: facts, experiences, procedures, entities, relationships, beliefs",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Working memory: interaction messages, topics, keyword index",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Governance: links, memcubes, append-only operation log, meta-knowledge, embeddings",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Memory networks
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memory_facts (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    content TEXT NOT NULL,
    fact_type TEXT NOT NULL DEFAULT 'fact',
    category TEXT,
    confidence REAL NOT NULL DEFAULT 1.0,
    source TEXT NOT NULL DEFAULT 'chat',
    source_id TEXT,
    is_persona_attribute INTEGER NOT NULL DEFAULT 0,
    is_persona_event INTEGER NOT NULL DEFAULT 0,
    keywords TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    context TEXT,
    valid_from TEXT NOT NULL,
    valid_to TEXT,
    event_time TEXT,
    record_time TEXT NOT NULL,
    heat_score REAL NOT NULL DEFAULT 1.0,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    decay_rate REAL NOT NULL DEFAULT 0.01,
    heat_decayed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_facts_session_created ON memory_facts(session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_facts_session_valid ON memory_facts(session_id, valid_to);
CREATE INDEX IF NOT EXISTS idx_facts_session_heat ON memory_facts(session_id, heat_score);
CREATE INDEX IF NOT EXISTS idx_facts_session_type ON memory_facts(session_id, fact_type);

CREATE TABLE IF NOT EXISTS memory_experiences (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    experience_type TEXT NOT NULL,
    description TEXT NOT NULL,
    action_taken TEXT,
    outcome TEXT NOT NULL DEFAULT 'unknown',
    outcome_details TEXT NOT NULL DEFAULT '{}',
    lesson_learned TEXT,
    should_repeat INTEGER,
    occurred_at TEXT NOT NULL,
    duration_seconds INTEGER,
    agent_id TEXT,
    related_facts TEXT NOT NULL DEFAULT '[]',
    related_entities TEXT NOT NULL DEFAULT '[]',
    is_procedural INTEGER NOT NULL DEFAULT 0,
    procedure_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_experiences_session_occurred ON memory_experiences(session_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_experiences_session_action ON memory_experiences(session_id, experience_type, action_taken);
CREATE INDEX IF NOT EXISTS idx_experiences_agent ON memory_experiences(session_id, agent_id);

CREATE TABLE IF NOT EXISTS memory_procedures (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    procedure_type TEXT NOT NULL,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    avg_success_rate REAL NOT NULL DEFAULT 0.0,
    avg_time_saved REAL NOT NULL DEFAULT 0.0,
    experience_ids TEXT NOT NULL DEFAULT '[]',
    version INTEGER NOT NULL DEFAULT 1,
    last_used TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(session_id, name)
);

CREATE TABLE IF NOT EXISTS memory_entities (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    name TEXT NOT NULL,
    canonical_name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    summary TEXT,
    key_facts TEXT NOT NULL DEFAULT '[]',
    attributes TEXT NOT NULL DEFAULT '{}',
    mention_count INTEGER NOT NULL DEFAULT 1,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    last_updated TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(session_id, canonical_name)
);

CREATE INDEX IF NOT EXISTS idx_entities_session_mentions ON memory_entities(session_id, mention_count);

CREATE TABLE IF NOT EXISTS memory_relationships (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    description TEXT,
    strength REAL NOT NULL DEFAULT 1.0,
    confidence REAL NOT NULL DEFAULT 1.0,
    valid_from TEXT NOT NULL,
    valid_to TEXT,
    event_time TEXT,
    evidence TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_relationships_source ON memory_relationships(session_id, source_id, valid_to);
CREATE INDEX IF NOT EXISTS idx_relationships_target ON memory_relationships(session_id, target_id, valid_to);

CREATE TABLE IF NOT EXISTS memory_beliefs (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    belief TEXT NOT NULL,
    belief_type TEXT NOT NULL DEFAULT 'inference',
    confidence REAL NOT NULL DEFAULT 0.5,
    confidence_history TEXT NOT NULL DEFAULT '[]',
    supporting_facts TEXT NOT NULL DEFAULT '[]',
    contradicting_facts TEXT NOT NULL DEFAULT '[]',
    formed_at TEXT NOT NULL,
    last_reinforced TEXT,
    last_challenged TEXT,
    times_reinforced INTEGER NOT NULL DEFAULT 0,
    times_challenged INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active',
    superseded_by TEXT,
    decayed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_beliefs_session_status ON memory_beliefs(session_id, status, confidence);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Working memory
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS interaction_messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session_time ON interaction_messages(session_id, timestamp);

CREATE TABLE IF NOT EXISTS memory_topics (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    topic TEXT NOT NULL,
    description TEXT,
    message_ids TEXT NOT NULL DEFAULT '[]',
    message_count INTEGER NOT NULL DEFAULT 0,
    first_discussed TEXT,
    last_discussed TEXT,
    summary TEXT,
    key_points TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(session_id, topic)
);

CREATE INDEX IF NOT EXISTS idx_topics_session_discussed ON memory_topics(session_id, last_discussed);

CREATE TABLE IF NOT EXISTS memory_keyword_index (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    keyword TEXT NOT NULL,
    message_ids TEXT NOT NULL DEFAULT '[]',
    fact_ids TEXT NOT NULL DEFAULT '[]',
    occurrence_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(session_id, keyword)
);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: Governance
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memory_links (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    source_kind TEXT NOT NULL,
    source_id TEXT NOT NULL,
    target_kind TEXT NOT NULL,
    target_id TEXT NOT NULL,
    link_type TEXT NOT NULL DEFAULT 'related',
    strength REAL NOT NULL DEFAULT 1.0,
    bidirectional INTEGER NOT NULL DEFAULT 1,
    reason TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(source_kind, source_id, target_kind, target_id, link_type)
);

CREATE INDEX IF NOT EXISTS idx_links_session_source ON memory_links(session_id, source_kind, source_id);
CREATE INDEX IF NOT EXISTS idx_links_target ON memory_links(target_kind, target_id);

CREATE TABLE IF NOT EXISTS memory_cubes (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    memory_kind TEXT NOT NULL,
    memory_id TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    retention_policy TEXT NOT NULL DEFAULT 'standard',
    heat_score REAL NOT NULL DEFAULT 1.0,
    last_scheduled TEXT,
    schedule_count INTEGER NOT NULL DEFAULT 0,
    migrated_from TEXT,
    migrated_to TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(memory_kind, memory_id)
);

CREATE INDEX IF NOT EXISTS idx_cubes_session_heat ON memory_cubes(session_id, heat_score);

CREATE TABLE IF NOT EXISTS memory_operations (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    memory_kind TEXT,
    memory_id TEXT,
    trigger_source TEXT NOT NULL,
    reason TEXT,
    confidence REAL,
    success INTEGER NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_operations_session_created ON memory_operations(session_id, created_at);

-- The operation log is an audit trail: rows are never rewritten
CREATE TRIGGER IF NOT EXISTS memory_operations_append_only
BEFORE UPDATE ON memory_operations
BEGIN
    SELECT RAISE(ABORT, 'memory_operations is append-only');
END;

CREATE TABLE IF NOT EXISTS memory_meta (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    domain TEXT NOT NULL,
    facts_count INTEGER NOT NULL DEFAULT 0,
    beliefs_count INTEGER NOT NULL DEFAULT 0,
    experiences_count INTEGER NOT NULL DEFAULT 0,
    confidence_score REAL NOT NULL DEFAULT 0.0,
    last_updated TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(session_id, domain)
);

CREATE TABLE IF NOT EXISTS memory_embeddings (
    memory_kind TEXT NOT NULL,
    memory_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (memory_kind, memory_id)
);

CREATE INDEX IF NOT EXISTS idx_embeddings_session ON memory_embeddings(session_id, memory_kind);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_migrations_apply_once() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_current_version(&conn).unwrap(), 0);

        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
        assert_eq!(get_current_version(&conn).unwrap(), 3);

        assert_eq!(apply_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn test_operation_log_rejects_updates() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO memory_operations (id, session_id, operation, trigger_source, success, created_at)
             VALUES ('op1', 's', 'ADD', 'chat_message', 1, '2026-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();

        let result = conn.execute("UPDATE memory_operations SET success = 0 WHERE id = 'op1'", []);
        assert!(result.is_err());
    }
}
