//! SQLite Storage Implementation
//!
//! Core storage handle. Record-family queries live in sibling modules as
//! further `impl Storage` blocks.

use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use crate::memory::{InteractionMessage, MemoryStats};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid timestamp
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// JSON column could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// STORAGE
// ============================================================================

/// Main storage handle
///
/// Uses separate reader/writer connections for interior mutability.
/// All methods take `&self`, making Storage `Send + Sync` so callers can
/// share an `Arc<Storage>` across tasks.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: PathBuf,
}

impl Storage {
    /// Apply PRAGMAs and optional encryption to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        #[cfg(feature = "encryption")]
        {
            if let Ok(key) = std::env::var("MNEMO_ENCRYPTION_KEY") {
                if !key.is_empty() {
                    conn.pragma_update(None, "key", &key)?;
                }
            }
        }

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -16000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        Ok(())
    }

    /// Platform data directory location of the database
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "mnemo", "core").ok_or_else(|| {
            StorageError::Init("Could not determine project directories".to_string())
        })?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            let _ = std::fs::set_permissions(data_dir, perms);
        }
        Ok(data_dir.join("mnemo.db"))
    }

    /// Open (creating and migrating if needed) the database at `db_path`,
    /// or at [`Storage::default_path`] when `None`
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => Self::default_path()?,
        };

        let writer_conn = Connection::open(&path)?;

        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Self::configure_connection(&writer_conn)?;

        // Apply migrations on writer only
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            path,
        })
    }

    /// Database file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("Writer lock poisoned".into()))
    }

    pub(crate) fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("Reader lock poisoned".into()))
    }

    /// Run `f` inside one writer transaction; commits only if `f` succeeds
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut writer = self.writer()?;
        let tx = writer.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Current schema version
    pub fn schema_version(&self) -> Result<u32> {
        let reader = self.reader()?;
        Ok(super::migrations::get_current_version(&reader)?)
    }

    // ========================================================================
    // INTERACTION MESSAGES
    // ========================================================================

    /// Store a raw conversation message
    pub fn insert_message(&self, message: &InteractionMessage) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO interaction_messages (id, session_id, role, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id,
                message.session_id,
                message.role.as_str(),
                message.content,
                ts(&message.timestamp),
            ],
        )?;
        Ok(())
    }

    /// The last `limit` messages of a session, oldest first
    pub fn recent_messages(&self, session: &str, limit: usize) -> Result<Vec<InteractionMessage>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM interaction_messages
             WHERE session_id = ?1
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?2",
        )?;
        let mut messages: Vec<InteractionMessage> = stmt
            .query_map(params![session, limit as i64], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        messages.reverse();
        Ok(messages)
    }

    /// Messages by id, in the order given; unknown ids are skipped
    pub fn get_messages(&self, session: &str, ids: &[String]) -> Result<Vec<InteractionMessage>> {
        let reader = self.reader()?;
        let mut stmt = reader
            .prepare("SELECT * FROM interaction_messages WHERE session_id = ?1 AND id = ?2")?;
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let mut rows = stmt.query_map(params![session, id], row_to_message)?;
            if let Some(message) = rows.next().transpose()? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    // ========================================================================
    // SESSION-WIDE
    // ========================================================================

    /// Counters across every table for one session
    pub fn get_stats(&self, session: &str, now: DateTime<Utc>) -> Result<MemoryStats> {
        let reader = self.reader()?;
        let now = ts(&now);
        let count = |sql: &str| -> Result<i64> {
            Ok(reader.query_row(sql, params![session], |row| row.get(0))?)
        };

        let facts_live: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memory_facts
             WHERE session_id = ?1 AND (valid_to IS NULL OR valid_to > ?2)",
            params![session, now],
            |row| row.get(0),
        )?;
        let (avg_fact_confidence, avg_fact_heat): (Option<f64>, Option<f64>) = reader.query_row(
            "SELECT AVG(confidence), AVG(heat_score) FROM memory_facts
             WHERE session_id = ?1 AND (valid_to IS NULL OR valid_to > ?2)",
            params![session, now],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(MemoryStats {
            session_id: session.to_string(),
            facts_total: count("SELECT COUNT(*) FROM memory_facts WHERE session_id = ?1")?,
            facts_live,
            persona_attributes: count(
                "SELECT COUNT(*) FROM memory_facts
                 WHERE session_id = ?1 AND is_persona_attribute = 1 AND valid_to IS NULL",
            )?,
            experiences: count("SELECT COUNT(*) FROM memory_experiences WHERE session_id = ?1")?,
            procedures: count("SELECT COUNT(*) FROM memory_procedures WHERE session_id = ?1")?,
            entities: count("SELECT COUNT(*) FROM memory_entities WHERE session_id = ?1")?,
            relationships: count(
                "SELECT COUNT(*) FROM memory_relationships WHERE session_id = ?1 AND valid_to IS NULL",
            )?,
            beliefs_total: count("SELECT COUNT(*) FROM memory_beliefs WHERE session_id = ?1")?,
            beliefs_active: count(
                "SELECT COUNT(*) FROM memory_beliefs WHERE session_id = ?1 AND status = 'active'",
            )?,
            topics: count("SELECT COUNT(*) FROM memory_topics WHERE session_id = ?1")?,
            keywords: count("SELECT COUNT(*) FROM memory_keyword_index WHERE session_id = ?1")?,
            links: count("SELECT COUNT(*) FROM memory_links WHERE session_id = ?1")?,
            operations: count("SELECT COUNT(*) FROM memory_operations WHERE session_id = ?1")?,
            messages: count("SELECT COUNT(*) FROM interaction_messages WHERE session_id = ?1")?,
            embeddings: count("SELECT COUNT(*) FROM memory_embeddings WHERE session_id = ?1")?,
            avg_fact_confidence: avg_fact_confidence.unwrap_or(0.0),
            avg_fact_heat: avg_fact_heat.unwrap_or(0.0),
        })
    }

    /// Hard-delete everything a session owns. Returns rows removed.
    pub fn clear_session(&self, session: &str) -> Result<usize> {
        const TABLES: &[&str] = &[
            "memory_facts",
            "memory_experiences",
            "memory_procedures",
            "memory_entities",
            "memory_relationships",
            "memory_beliefs",
            "interaction_messages",
            "memory_topics",
            "memory_keyword_index",
            "memory_links",
            "memory_cubes",
            "memory_operations",
            "memory_meta",
            "memory_embeddings",
        ];

        self.transaction(|tx| {
            let mut removed = 0;
            for table in TABLES {
                removed += tx.execute(
                    &format!("DELETE FROM {} WHERE session_id = ?1", table),
                    params![session],
                )?;
            }
            tracing::info!(session, removed, "Cleared session");
            Ok(removed)
        })
    }
}

// ============================================================================
// ROW HELPERS
// ============================================================================

/// Fixed-width RFC 3339 UTC text, so lexical order equals time order
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

fn conversion_error(column: &str, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid {}: {}", column, message),
        )),
    )
}

/// Parse RFC3339 timestamp with proper error handling
pub(crate) fn parse_timestamp(value: &str, field_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(field_name, format!("timestamp '{}': {}", value, e)))
}

pub(crate) fn get_timestamp(row: &rusqlite::Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_timestamp(&raw, column)
}

pub(crate) fn get_optional_timestamp(
    row: &rusqlite::Row,
    column: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|s| parse_timestamp(&s, column)).transpose()
}

/// Read a closed-enum column
pub(crate) fn get_enum<T: FromStr>(row: &rusqlite::Row, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    raw.parse()
        .map_err(|_| conversion_error(column, format!("value '{}'", raw)))
}

pub(crate) fn get_optional_enum<T: FromStr>(
    row: &rusqlite::Row,
    column: &str,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|s| {
        s.parse()
            .map_err(|_| conversion_error(column, format!("value '{}'", s)))
    })
    .transpose()
}

/// Read a JSON string-list column; malformed JSON reads as empty
pub(crate) fn get_list(row: &rusqlite::Row, column: &str) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(column)?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

/// Read a JSON object column; malformed JSON reads as empty
pub(crate) fn get_map(
    row: &rusqlite::Row,
    column: &str,
) -> rusqlite::Result<serde_json::Map<String, serde_json::Value>> {
    let raw: String = row.get(column)?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

/// `%query%` with LIKE wildcards escaped; pair with `ESCAPE '\'`
pub(crate) fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<InteractionMessage> {
    Ok(InteractionMessage {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        role: get_enum(row, "role")?,
        content: row.get("content")?,
        timestamp: get_timestamp(row, "timestamp")?,
    })
}
