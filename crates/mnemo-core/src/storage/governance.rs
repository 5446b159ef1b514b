//! Links, MemCubes, the operation log and meta-knowledge

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

use super::sqlite::{
    get_enum, get_optional_enum, get_optional_timestamp, get_timestamp, like_pattern, ts, Result,
    Storage,
};
use crate::memory::{
    Link, MemCube, MemoryKind, MetaKnowledge, OperationLogEntry, OperationStats, RetentionPolicy,
};

const LINK_COLUMNS: &str = "id, session_id, source_kind, source_id, target_kind, target_id,
    link_type, strength, bidirectional, reason, created_at";

const CUBE_COLUMNS: &str = "id, session_id, memory_kind, memory_id, version, retention_policy,
    heat_score, last_scheduled, schedule_count, migrated_from, migrated_to, created_at, updated_at";

const OPERATION_COLUMNS: &str = "id, session_id, operation, memory_kind, memory_id,
    trigger_source, reason, confidence, success, error, created_at";

const META_COLUMNS: &str = "id, session_id, domain, facts_count, beliefs_count,
    experiences_count, confidence_score, last_updated, created_at";

/// Result of one combined decay sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayCounts {
    pub facts: usize,
    pub beliefs: usize,
}

/// Insert the cube for `(kind, id)` unless one exists
fn ensure_cube(
    conn: &Connection,
    session: &str,
    kind: MemoryKind,
    memory_id: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    let cube = MemCube::new(session, kind, memory_id, now);
    conn.execute(
        "INSERT OR IGNORE INTO memory_cubes
         (id, session_id, memory_kind, memory_id, version, retention_policy, heat_score,
          schedule_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
        params![
            cube.id,
            cube.session_id,
            cube.memory_kind.as_str(),
            cube.memory_id,
            cube.version,
            cube.retention_policy.as_str(),
            cube.heat_score,
            ts(&now),
        ],
    )?;
    Ok(())
}

impl Storage {
    // ========================================================================
    // LINKS
    // ========================================================================

    /// Insert a link; returns false when an identical link already exists
    pub fn insert_link(&self, link: &Link) -> Result<bool> {
        let writer = self.writer()?;
        let rows = writer.execute(
            &format!(
                "INSERT OR IGNORE INTO memory_links ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                LINK_COLUMNS
            ),
            params![
                link.id,
                link.session_id,
                link.source_kind.as_str(),
                link.source_id,
                link.target_kind.as_str(),
                link.target_id,
                link.link_type.as_str(),
                link.strength,
                link.bidirectional,
                link.reason,
                ts(&link.created_at),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Whether any link joins the two records, in either direction
    pub fn link_exists(
        &self,
        session: &str,
        a: (MemoryKind, &str),
        b: (MemoryKind, &str),
    ) -> Result<bool> {
        let reader = self.reader()?;
        let found = reader
            .query_row(
                "SELECT 1 FROM memory_links WHERE session_id = ?1 AND (
                    (source_kind = ?2 AND source_id = ?3 AND target_kind = ?4 AND target_id = ?5)
                 OR (source_kind = ?4 AND source_id = ?5 AND target_kind = ?2 AND target_id = ?3))
                 LIMIT 1",
                params![session, a.0.as_str(), a.1, b.0.as_str(), b.1],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Links touching a record; bidirectional links match from either end
    pub fn links_of(&self, session: &str, kind: MemoryKind, id: &str) -> Result<Vec<Link>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_links WHERE session_id = ?1 AND (
                (source_kind = ?2 AND source_id = ?3)
             OR (bidirectional = 1 AND target_kind = ?2 AND target_id = ?3))
             ORDER BY strength DESC",
            LINK_COLUMNS
        ))?;
        let links = stmt
            .query_map(params![session, kind.as_str(), id], row_to_link)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(links)
    }

    // ========================================================================
    // MEMCUBES
    // ========================================================================

    pub fn get_cube(&self, kind: MemoryKind, memory_id: &str) -> Result<Option<MemCube>> {
        let reader = self.reader()?;
        Ok(reader
            .query_row(
                &format!(
                    "SELECT {} FROM memory_cubes WHERE memory_kind = ?1 AND memory_id = ?2",
                    CUBE_COLUMNS
                ),
                params![kind.as_str(), memory_id],
                row_to_cube,
            )
            .optional()?)
    }

    /// Increment the schedule counter of each record, creating cubes as needed
    pub fn mark_scheduled(
        &self,
        session: &str,
        kind: MemoryKind,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.transaction(|tx| {
            let mut marked = 0;
            for id in ids {
                ensure_cube(tx, session, kind, id, now)?;
                marked += tx.execute(
                    "UPDATE memory_cubes
                     SET schedule_count = schedule_count + 1, last_scheduled = ?1, updated_at = ?1
                     WHERE memory_kind = ?2 AND memory_id = ?3",
                    params![ts(&now), kind.as_str(), id],
                )?;
            }
            Ok(marked)
        })
    }

    /// Set a record's retention policy, creating its cube as needed
    pub fn set_retention(
        &self,
        session: &str,
        kind: MemoryKind,
        memory_id: &str,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transaction(|tx| {
            ensure_cube(tx, session, kind, memory_id, now)?;
            tx.execute(
                "UPDATE memory_cubes SET retention_policy = ?1, updated_at = ?2
                 WHERE memory_kind = ?3 AND memory_id = ?4",
                params![policy.as_str(), ts(&now), kind.as_str(), memory_id],
            )?;
            Ok(())
        })
    }

    /// Mirror a record's heat onto its cube
    pub fn set_cube_heat(
        &self,
        session: &str,
        kind: MemoryKind,
        memory_id: &str,
        heat: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transaction(|tx| {
            ensure_cube(tx, session, kind, memory_id, now)?;
            tx.execute(
                "UPDATE memory_cubes SET heat_score = ?1, updated_at = ?2
                 WHERE memory_kind = ?3 AND memory_id = ?4",
                params![heat, ts(&now), kind.as_str(), memory_id],
            )?;
            Ok(())
        })
    }

    /// Ids of records of `kind` whose cube is archived
    pub fn archived_ids(&self, session: &str, kind: MemoryKind) -> Result<HashSet<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT memory_id FROM memory_cubes
             WHERE session_id = ?1 AND memory_kind = ?2 AND retention_policy = 'archived'",
        )?;
        let ids = stmt
            .query_map(params![session, kind.as_str()], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Cubes scheduled at or after `since`
    pub fn count_scheduled_since(&self, session: &str, since: DateTime<Utc>) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row(
            "SELECT COUNT(*) FROM memory_cubes WHERE session_id = ?1 AND last_scheduled >= ?2",
            params![session, ts(&since)],
            |row| row.get(0),
        )?)
    }

    /// Live fact counts as (hot, warm, cold) around the two thresholds
    pub fn count_facts_by_heat(
        &self,
        session: &str,
        hot: f64,
        cold: f64,
        now: DateTime<Utc>,
    ) -> Result<(i64, i64, i64)> {
        let reader = self.reader()?;
        Ok(reader.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN heat_score >= ?2 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN heat_score < ?2 AND heat_score >= ?3 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN heat_score < ?3 THEN 1 ELSE 0 END), 0)
             FROM memory_facts
             WHERE session_id = ?1 AND (valid_to IS NULL OR valid_to > ?4)",
            params![session, hot, cold, ts(&now)],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?)
    }

    // ========================================================================
    // OPERATION LOG
    // ========================================================================

    /// Append one entry; the table rejects updates
    pub fn append_operation(&self, entry: &OperationLogEntry) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            &format!(
                "INSERT INTO memory_operations ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                OPERATION_COLUMNS
            ),
            params![
                entry.id,
                entry.session_id,
                entry.operation.as_str(),
                entry.memory_kind.map(|k| k.as_str()),
                entry.memory_id,
                entry.trigger,
                entry.reason,
                entry.confidence,
                entry.success,
                entry.error,
                ts(&entry.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn operation_stats(&self, session: &str, since: DateTime<Utc>) -> Result<OperationStats> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT operation, success, COUNT(*) FROM memory_operations
             WHERE session_id = ?1 AND created_at >= ?2
             GROUP BY operation, success",
        )?;
        let rows: Vec<(String, bool, i64)> = stmt
            .query_map(params![session, ts(&since)], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut stats = OperationStats::default();
        for (operation, success, count) in rows {
            stats.total += count;
            if success {
                stats.succeeded += count;
            } else {
                stats.failed += count;
            }
            *stats.by_operation.entry(operation).or_insert(0) += count;
        }
        Ok(stats)
    }

    /// Newest entries first
    pub fn recent_operations(&self, session: &str, limit: usize) -> Result<Vec<OperationLogEntry>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_operations WHERE session_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
            OPERATION_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![session, limit as i64], row_to_operation)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    // ========================================================================
    // META-KNOWLEDGE
    // ========================================================================

    /// Insert or refresh the counters of one domain
    pub fn upsert_meta(&self, meta: &MetaKnowledge) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            &format!(
                "INSERT INTO memory_meta ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(session_id, domain) DO UPDATE SET
                    facts_count = excluded.facts_count,
                    beliefs_count = excluded.beliefs_count,
                    experiences_count = excluded.experiences_count,
                    confidence_score = excluded.confidence_score,
                    last_updated = excluded.last_updated",
                META_COLUMNS
            ),
            params![
                meta.id,
                meta.session_id,
                meta.domain,
                meta.facts_count,
                meta.beliefs_count,
                meta.experiences_count,
                meta.confidence_score,
                ts(&meta.last_updated),
                ts(&meta.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_meta(&self, session: &str) -> Result<Vec<MetaKnowledge>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_meta WHERE session_id = ?1 ORDER BY domain",
            META_COLUMNS
        ))?;
        let metas = stmt
            .query_map(params![session], row_to_meta)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(metas)
    }

    /// Live facts mentioning `domain` in content or category
    pub fn count_facts_mentioning(&self, session: &str, domain: &str, now: DateTime<Utc>) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row(
            "SELECT COUNT(*) FROM memory_facts
             WHERE session_id = ?1 AND (valid_to IS NULL OR valid_to > ?3)
               AND (content LIKE ?2 ESCAPE '\\' OR category = ?4)",
            params![session, like_pattern(domain), ts(&now), domain.trim().to_lowercase()],
            |row| row.get(0),
        )?)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Decay fact heat and belief confidence in one writer transaction
    pub fn apply_decay(
        &self,
        session: &str,
        fact_idle: Duration,
        belief_idle: Duration,
        belief_rate: f64,
        belief_floor: f64,
        now: DateTime<Utc>,
    ) -> Result<DecayCounts> {
        self.transaction(|tx| {
            let facts = Self::decay_fact_heat(tx, session, fact_idle, now)?;
            let beliefs = Self::decay_belief_confidence(
                tx,
                session,
                belief_idle,
                belief_rate,
                belief_floor,
                now,
            )?;
            Ok(DecayCounts { facts, beliefs })
        })
    }
}

fn row_to_link(row: &rusqlite::Row) -> rusqlite::Result<Link> {
    Ok(Link {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        source_kind: get_enum(row, "source_kind")?,
        source_id: row.get("source_id")?,
        target_kind: get_enum(row, "target_kind")?,
        target_id: row.get("target_id")?,
        link_type: get_enum(row, "link_type")?,
        strength: row.get("strength")?,
        bidirectional: row.get("bidirectional")?,
        reason: row.get("reason")?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

fn row_to_cube(row: &rusqlite::Row) -> rusqlite::Result<MemCube> {
    Ok(MemCube {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        memory_kind: get_enum(row, "memory_kind")?,
        memory_id: row.get("memory_id")?,
        version: row.get("version")?,
        retention_policy: get_enum(row, "retention_policy")?,
        heat_score: row.get("heat_score")?,
        last_scheduled: get_optional_timestamp(row, "last_scheduled")?,
        schedule_count: row.get("schedule_count")?,
        migrated_from: row.get("migrated_from")?,
        migrated_to: row.get("migrated_to")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

fn row_to_operation(row: &rusqlite::Row) -> rusqlite::Result<OperationLogEntry> {
    Ok(OperationLogEntry {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        operation: get_enum(row, "operation")?,
        memory_kind: get_optional_enum(row, "memory_kind")?,
        memory_id: row.get("memory_id")?,
        trigger: row.get("trigger_source")?,
        reason: row.get("reason")?,
        confidence: row.get("confidence")?,
        success: row.get("success")?,
        error: row.get("error")?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

fn row_to_meta(row: &rusqlite::Row) -> rusqlite::Result<MetaKnowledge> {
    Ok(MetaKnowledge {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        domain: row.get("domain")?,
        facts_count: row.get("facts_count")?,
        beliefs_count: row.get("beliefs_count")?,
        experiences_count: row.get("experiences_count")?,
        confidence_score: row.get("confidence_score")?,
        last_updated: get_timestamp(row, "last_updated")?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{LinkType, OperationKind};
    use crate::storage::sqlite::test_support::create_test_storage;

    fn link(source: &str, target: &str) -> Link {
        Link {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: "s".to_string(),
            source_kind: MemoryKind::Fact,
            source_id: source.to_string(),
            target_kind: MemoryKind::Fact,
            target_id: target.to_string(),
            link_type: LinkType::Related,
            strength: 0.8,
            bidirectional: true,
            reason: Some("similar content".to_string()),
            created_at: Utc::now(),
        }
    }

    fn entry(operation: OperationKind, success: bool) -> OperationLogEntry {
        OperationLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: "s".to_string(),
            operation,
            memory_kind: Some(MemoryKind::Fact),
            memory_id: None,
            trigger: "chat_message".to_string(),
            reason: None,
            confidence: Some(0.9),
            success,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_links_are_ignored() {
        let (storage, _dir) = create_test_storage();
        assert!(storage.insert_link(&link("a", "b")).unwrap());
        assert!(!storage.insert_link(&link("a", "b")).unwrap());

        assert!(storage
            .link_exists("s", (MemoryKind::Fact, "b"), (MemoryKind::Fact, "a"))
            .unwrap());
        assert_eq!(storage.links_of("s", MemoryKind::Fact, "b").unwrap().len(), 1);
    }

    #[test]
    fn test_schedule_and_archive_create_cubes() {
        let (storage, _dir) = create_test_storage();
        let now = Utc::now();
        let ids = vec!["f1".to_string(), "f2".to_string()];

        assert_eq!(storage.mark_scheduled("s", MemoryKind::Fact, &ids, now).unwrap(), 2);
        storage.mark_scheduled("s", MemoryKind::Fact, &ids[..1], now).unwrap();
        let cube = storage.get_cube(MemoryKind::Fact, "f1").unwrap().unwrap();
        assert_eq!(cube.schedule_count, 2);
        assert_eq!(cube.retention_policy, RetentionPolicy::Standard);

        storage
            .set_retention("s", MemoryKind::Fact, "f2", RetentionPolicy::Archived, now)
            .unwrap();
        let archived = storage.archived_ids("s", MemoryKind::Fact).unwrap();
        assert!(archived.contains("f2"));
        assert!(!archived.contains("f1"));
        assert_eq!(storage.count_scheduled_since("s", now - Duration::hours(1)).unwrap(), 2);
    }

    #[test]
    fn test_operation_log_counts_and_is_append_only() {
        let (storage, _dir) = create_test_storage();
        storage.append_operation(&entry(OperationKind::Add, true)).unwrap();
        storage.append_operation(&entry(OperationKind::Add, true)).unwrap();
        storage.append_operation(&entry(OperationKind::Delete, false)).unwrap();

        let stats = storage
            .operation_stats("s", Utc::now() - Duration::hours(1))
            .unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_operation.get("ADD"), Some(&2));

        let writer = storage.writer().unwrap();
        let result = writer.execute("UPDATE memory_operations SET success = 0", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_meta_upsert_replaces_counters() {
        let (storage, _dir) = create_test_storage();
        let now = Utc::now();
        let mut meta = MetaKnowledge {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: "s".to_string(),
            domain: "work".to_string(),
            facts_count: 2,
            beliefs_count: 0,
            experiences_count: 0,
            confidence_score: 0.2,
            last_updated: now,
            created_at: now,
        };
        storage.upsert_meta(&meta).unwrap();
        meta.id = uuid::Uuid::new_v4().to_string();
        meta.facts_count = 12;
        meta.confidence_score = 1.0;
        storage.upsert_meta(&meta).unwrap();

        let metas = storage.list_meta("s").unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].facts_count, 12);
    }
}
