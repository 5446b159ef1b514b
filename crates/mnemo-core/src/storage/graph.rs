//! Entity and relationship queries

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::sqlite::{
    get_enum, get_list, get_map, get_optional_timestamp, get_timestamp, like_pattern, opt_ts,
    to_json, ts, Result, Storage,
};
use crate::memory::{Direction, Entity, Relationship, RelationshipView};

const ENTITY_COLUMNS: &str = "id, session_id, name, canonical_name, entity_type, summary,
    key_facts, attributes, mention_count, first_seen, last_seen, last_updated, created_at";

const RELATIONSHIP_COLUMNS: &str = "id, session_id, source_id, target_id, relation_type,
    description, strength, confidence, valid_from, valid_to, event_time, evidence, created_at,
    updated_at";

pub(crate) fn put_relationship(conn: &Connection, rel: &Relationship) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO memory_relationships ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            RELATIONSHIP_COLUMNS
        ),
        params![
            rel.id,
            rel.session_id,
            rel.source_id,
            rel.target_id,
            rel.relation_type,
            rel.description,
            rel.strength,
            rel.confidence,
            ts(&rel.valid_from),
            opt_ts(&rel.valid_to),
            opt_ts(&rel.event_time),
            to_json(&rel.evidence),
            ts(&rel.created_at),
            ts(&rel.updated_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn relationship_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM memory_relationships WHERE id = ?1",
        params![id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

/// Low-confidence relationships created before `older_than`
pub(crate) fn select_relationships_for_snapshot(
    conn: &Connection,
    session: &str,
    low_confidence: f64,
    older_than: DateTime<Utc>,
) -> rusqlite::Result<Vec<Relationship>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM memory_relationships
         WHERE session_id = ?1 AND confidence < ?2 AND created_at < ?3
         ORDER BY created_at ASC",
        RELATIONSHIP_COLUMNS
    ))?;
    stmt.query_map(params![session, low_confidence, ts(&older_than)], row_to_relationship)?
        .collect()
}

pub(crate) fn load_relationship(conn: &Connection, id: &str) -> rusqlite::Result<Option<Relationship>> {
    conn.query_row(
        &format!("SELECT {} FROM memory_relationships WHERE id = ?1", RELATIONSHIP_COLUMNS),
        params![id],
        row_to_relationship,
    )
    .optional()
}

impl Storage {
    // ========================================================================
    // ENTITIES
    // ========================================================================

    /// Insert or fully overwrite an entity
    pub fn save_entity(&self, entity: &Entity) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            &format!(
                "INSERT OR REPLACE INTO memory_entities ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                ENTITY_COLUMNS
            ),
            params![
                entity.id,
                entity.session_id,
                entity.name,
                entity.canonical_name,
                entity.entity_type.as_str(),
                entity.summary,
                to_json(&entity.key_facts),
                to_json(&entity.attributes),
                entity.mention_count,
                ts(&entity.first_seen),
                ts(&entity.last_seen),
                opt_ts(&entity.last_updated),
                ts(&entity.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_entity(&self, session: &str, id: &str) -> Result<Option<Entity>> {
        let reader = self.reader()?;
        let entity = reader
            .query_row(
                &format!(
                    "SELECT {} FROM memory_entities WHERE id = ?1 AND session_id = ?2",
                    ENTITY_COLUMNS
                ),
                params![id, session],
                row_to_entity,
            )
            .optional()?;
        Ok(entity)
    }

    pub fn find_entity_by_canonical(&self, session: &str, canonical: &str) -> Result<Option<Entity>> {
        let reader = self.reader()?;
        let entity = reader
            .query_row(
                &format!(
                    "SELECT {} FROM memory_entities WHERE session_id = ?1 AND canonical_name = ?2",
                    ENTITY_COLUMNS
                ),
                params![session, canonical],
                row_to_entity,
            )
            .optional()?;
        Ok(entity)
    }

    /// Substring match on name and summary, most mentioned first
    pub fn search_entities_text(&self, session: &str, query: &str, limit: usize) -> Result<Vec<Entity>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_entities
             WHERE session_id = ?1
               AND (name LIKE ?2 ESCAPE '\\' OR summary LIKE ?2 ESCAPE '\\')
             ORDER BY mention_count DESC, last_seen DESC LIMIT ?3",
            ENTITY_COLUMNS
        ))?;
        let entities = stmt
            .query_map(params![session, like_pattern(query), limit as i64], row_to_entity)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entities)
    }

    /// Most mentioned entities
    pub fn top_entities(&self, session: &str, limit: usize) -> Result<Vec<Entity>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_entities WHERE session_id = ?1
             ORDER BY mention_count DESC, last_seen DESC LIMIT ?2",
            ENTITY_COLUMNS
        ))?;
        let entities = stmt
            .query_map(params![session, limit as i64], row_to_entity)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entities)
    }

    /// Entities with no summary, or whose summary predates `stale_before`
    pub fn entities_needing_summary(
        &self,
        session: &str,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_entities
             WHERE session_id = ?1
               AND (summary IS NULL OR last_updated IS NULL OR last_updated < ?2)
             ORDER BY mention_count DESC LIMIT ?3",
            ENTITY_COLUMNS
        ))?;
        let entities = stmt
            .query_map(params![session, ts(&stale_before), limit as i64], row_to_entity)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entities)
    }

    /// Canonical names of every entity in the session
    pub fn entity_names(&self, session: &str) -> Result<Vec<(String, String)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT name, canonical_name FROM memory_entities WHERE session_id = ?1
             ORDER BY mention_count DESC",
        )?;
        let names = stmt
            .query_map(params![session], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }

    // ========================================================================
    // RELATIONSHIPS
    // ========================================================================

    pub fn save_relationship(&self, rel: &Relationship) -> Result<()> {
        let writer = self.writer()?;
        put_relationship(&writer, rel)?;
        Ok(())
    }

    pub fn get_relationship(&self, session: &str, id: &str) -> Result<Option<Relationship>> {
        let reader = self.reader()?;
        let rel = reader
            .query_row(
                &format!(
                    "SELECT {} FROM memory_relationships WHERE id = ?1 AND session_id = ?2",
                    RELATIONSHIP_COLUMNS
                ),
                params![id, session],
                row_to_relationship,
            )
            .optional()?;
        Ok(rel)
    }

    /// The live edge with this source, target and type, if any
    pub fn find_live_relationship(
        &self,
        session: &str,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
    ) -> Result<Option<Relationship>> {
        let reader = self.reader()?;
        let rel = reader
            .query_row(
                &format!(
                    "SELECT {} FROM memory_relationships
                     WHERE session_id = ?1 AND source_id = ?2 AND target_id = ?3
                       AND relation_type = ?4 AND valid_to IS NULL
                     ORDER BY created_at DESC LIMIT 1",
                    RELATIONSHIP_COLUMNS
                ),
                params![session, source_id, target_id, relation_type],
                row_to_relationship,
            )
            .optional()?;
        Ok(rel)
    }

    /// Live relationships touching `entity_id` in either direction,
    /// strongest first, with the entity on the other end resolved
    pub fn relationships_of(
        &self,
        session: &str,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<RelationshipView>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT r.*, e.id AS other_id, e.name AS other_name, e.entity_type AS other_type,
                    CASE WHEN r.source_id = ?2 THEN 'outgoing' ELSE 'incoming' END AS direction
             FROM memory_relationships r
             JOIN memory_entities e
               ON e.id = CASE WHEN r.source_id = ?2 THEN r.target_id ELSE r.source_id END
             WHERE r.session_id = ?1 AND (r.source_id = ?2 OR r.target_id = ?2)
               AND r.valid_to IS NULL
             ORDER BY r.strength DESC, r.confidence DESC LIMIT ?3",
        )?;
        let views = stmt
            .query_map(params![session, entity_id, limit as i64], |row| {
                let direction: String = row.get("direction")?;
                Ok(RelationshipView {
                    relationship: row_to_relationship(row)?,
                    direction: if direction == "outgoing" {
                        Direction::Outgoing
                    } else {
                        Direction::Incoming
                    },
                    other_id: row.get("other_id")?,
                    other_name: row.get("other_name")?,
                    other_type: get_enum(row, "other_type")?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(views)
    }

    /// Close a live relationship. Returns false when none matched.
    pub fn close_relationship(&self, session: &str, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let writer = self.writer()?;
        let rows = writer.execute(
            "UPDATE memory_relationships SET valid_to = ?1, updated_at = ?1
             WHERE id = ?2 AND session_id = ?3 AND valid_to IS NULL",
            params![ts(&at), id, session],
        )?;
        Ok(rows > 0)
    }

    /// Hard delete, for administrative cleanup
    pub fn delete_relationship(&self, session: &str, id: &str) -> Result<bool> {
        let writer = self.writer()?;
        let rows = writer.execute(
            "DELETE FROM memory_relationships WHERE id = ?1 AND session_id = ?2",
            params![id, session],
        )?;
        Ok(rows > 0)
    }
}

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        name: row.get("name")?,
        canonical_name: row.get("canonical_name")?,
        entity_type: get_enum(row, "entity_type")?,
        summary: row.get("summary")?,
        key_facts: get_list(row, "key_facts")?,
        attributes: get_map(row, "attributes")?,
        mention_count: row.get("mention_count")?,
        first_seen: get_timestamp(row, "first_seen")?,
        last_seen: get_timestamp(row, "last_seen")?,
        last_updated: get_optional_timestamp(row, "last_updated")?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

pub(crate) fn row_to_relationship(row: &rusqlite::Row) -> rusqlite::Result<Relationship> {
    Ok(Relationship {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        relation_type: row.get("relation_type")?,
        description: row.get("description")?,
        strength: row.get("strength")?,
        confidence: row.get("confidence")?,
        valid_from: get_timestamp(row, "valid_from")?,
        valid_to: get_optional_timestamp(row, "valid_to")?,
        event_time: get_optional_timestamp(row, "event_time")?,
        evidence: get_list(row, "evidence")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}
