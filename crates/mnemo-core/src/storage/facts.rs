//! Fact queries

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

use super::sqlite::{
    get_enum, get_list, get_optional_enum, get_optional_timestamp, get_timestamp, like_pattern,
    opt_ts, to_json, ts, Result, Storage,
};
use crate::confidence::{bump_heat, rate_decay};
use crate::memory::{Fact, FactFilter, FactType};

const FACT_COLUMNS: &str = "id, session_id, content, fact_type, category, confidence, source,
    source_id, is_persona_attribute, is_persona_event, keywords, tags, context, valid_from,
    valid_to, event_time, record_time, heat_score, access_count, last_accessed, decay_rate,
    heat_decayed_at, created_at, updated_at";

/// Rows read per page by full scans and decay sweeps
const SCAN_PAGE_SIZE: usize = 500;

/// Write every column of `fact`, replacing an existing row with the same id
pub(crate) fn put_fact(conn: &Connection, fact: &Fact) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO memory_facts ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
              ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
            FACT_COLUMNS
        ),
        params![
            fact.id,
            fact.session_id,
            fact.content,
            fact.fact_type.as_str(),
            fact.category.map(|c| c.as_str()),
            fact.confidence,
            fact.source.as_str(),
            fact.source_id,
            fact.is_persona_attribute,
            fact.is_persona_event,
            to_json(&fact.keywords),
            to_json(&fact.tags),
            fact.context,
            ts(&fact.valid_from),
            opt_ts(&fact.valid_to),
            opt_ts(&fact.event_time),
            ts(&fact.record_time),
            fact.heat_score,
            fact.access_count,
            opt_ts(&fact.last_accessed),
            fact.decay_rate,
            opt_ts(&fact.heat_decayed_at),
            ts(&fact.created_at),
            ts(&fact.updated_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn fact_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM memory_facts WHERE id = ?1", params![id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
}

pub(crate) fn load_fact(conn: &Connection, id: &str) -> rusqlite::Result<Option<Fact>> {
    conn.query_row(
        &format!("SELECT {} FROM memory_facts WHERE id = ?1", FACT_COLUMNS),
        params![id],
        row_to_fact,
    )
    .optional()
}

/// Low-confidence facts created before `older_than` plus every fact
/// created after `recent_since`
pub(crate) fn select_facts_for_snapshot(
    conn: &Connection,
    session: &str,
    low_confidence: f64,
    older_than: DateTime<Utc>,
    recent_since: DateTime<Utc>,
) -> rusqlite::Result<Vec<Fact>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM memory_facts
         WHERE session_id = ?1
           AND ((confidence < ?2 AND created_at < ?3) OR created_at >= ?4)
         ORDER BY created_at ASC",
        FACT_COLUMNS
    ))?;
    stmt.query_map(
        params![session, low_confidence, ts(&older_than), ts(&recent_since)],
        row_to_fact,
    )?
    .collect()
}

/// SQL fragment for a filter; enum names come from closed sets so they are
/// inlined, every free-text value is bound as a parameter by the caller
fn filter_clause(filter: &FactFilter) -> String {
    let mut clause = String::new();
    if !filter.include_invalid {
        clause.push_str(" AND (valid_to IS NULL OR valid_to > ?2)");
    }
    if !filter.fact_types.is_empty() {
        let names: Vec<String> = filter
            .fact_types
            .iter()
            .map(|t| format!("'{}'", t.as_str()))
            .collect();
        clause.push_str(&format!(" AND fact_type IN ({})", names.join(", ")));
    }
    if !filter.categories.is_empty() {
        let names: Vec<String> = filter
            .categories
            .iter()
            .map(|c| format!("'{}'", c.as_str()))
            .collect();
        clause.push_str(&format!(" AND category IN ({})", names.join(", ")));
    }
    if filter.min_confidence.is_some() {
        clause.push_str(" AND confidence >= ?3");
    }
    clause
}

impl Storage {
    /// Insert a new fact
    pub fn insert_fact(&self, fact: &Fact) -> Result<()> {
        let writer = self.writer()?;
        put_fact(&writer, fact)?;
        Ok(())
    }

    /// Overwrite a stored fact with `fact`
    pub fn save_fact(&self, fact: &Fact) -> Result<()> {
        self.insert_fact(fact)
    }

    /// Get a fact by id within a session
    pub fn get_fact(&self, session: &str, id: &str) -> Result<Option<Fact>> {
        let reader = self.reader()?;
        Ok(load_fact(&reader, id)?.filter(|f| f.session_id == session))
    }

    /// Hard delete. Network code closes facts instead; this exists for
    /// administrative cleanup.
    pub fn delete_fact(&self, session: &str, id: &str) -> Result<bool> {
        let writer = self.writer()?;
        let rows = writer.execute(
            "DELETE FROM memory_facts WHERE id = ?1 AND session_id = ?2",
            params![id, session],
        )?;
        writer.execute(
            "DELETE FROM memory_embeddings WHERE memory_kind = 'fact' AND memory_id = ?1",
            params![id],
        )?;
        Ok(rows > 0)
    }

    /// Close a live fact at `at`. Returns false when no live fact matched.
    pub fn close_fact(&self, session: &str, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let writer = self.writer()?;
        let rows = writer.execute(
            "UPDATE memory_facts SET valid_to = ?1, updated_at = ?1
             WHERE id = ?2 AND session_id = ?3 AND valid_to IS NULL",
            params![ts(&at), id, session],
        )?;
        Ok(rows > 0)
    }

    /// All facts passing `filter`, hottest first
    pub fn list_facts(
        &self,
        session: &str,
        filter: &FactFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Fact>> {
        let reader = self.reader()?;
        let sql = format!(
            "SELECT {} FROM memory_facts WHERE session_id = ?1{}
             ORDER BY heat_score DESC, created_at DESC LIMIT ?4",
            FACT_COLUMNS,
            filter_clause(filter)
        );
        let mut stmt = reader.prepare(&sql)?;
        let min_confidence = filter.min_confidence.unwrap_or(0.0);
        let facts = stmt
            .query_map(
                params![session, ts(&now), min_confidence, limit as i64],
                row_to_fact,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(facts)
    }

    /// Substring match on content (wildcards escaped), hottest first
    pub fn search_facts_text(
        &self,
        session: &str,
        query: &str,
        filter: &FactFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Fact>> {
        let reader = self.reader()?;
        let sql = format!(
            "SELECT {} FROM memory_facts WHERE session_id = ?1{}
             AND content LIKE ?5 ESCAPE '\\'
             ORDER BY heat_score DESC, created_at DESC LIMIT ?4",
            FACT_COLUMNS,
            filter_clause(filter)
        );
        let mut stmt = reader.prepare(&sql)?;
        let min_confidence = filter.min_confidence.unwrap_or(0.0);
        let facts = stmt
            .query_map(
                params![
                    session,
                    ts(&now),
                    min_confidence,
                    limit as i64,
                    like_pattern(query)
                ],
                row_to_fact,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(facts)
    }

    /// Live facts of one type above a confidence floor, most confident first
    pub fn facts_by_type(
        &self,
        session: &str,
        fact_type: FactType,
        min_confidence: f64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Fact>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_facts
             WHERE session_id = ?1 AND fact_type = ?2 AND confidence >= ?3
               AND (valid_to IS NULL OR valid_to > ?4)
             ORDER BY confidence DESC, created_at DESC LIMIT ?5",
            FACT_COLUMNS
        ))?;
        let facts = stmt
            .query_map(
                params![session, fact_type.as_str(), min_confidence, ts(&now), limit as i64],
                row_to_fact,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(facts)
    }

    /// Live persona attributes, most confident first
    pub fn persona_attributes(&self, session: &str, now: DateTime<Utc>) -> Result<Vec<Fact>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_facts
             WHERE session_id = ?1 AND is_persona_attribute = 1
               AND (valid_to IS NULL OR valid_to > ?2)
             ORDER BY confidence DESC, created_at DESC",
            FACT_COLUMNS
        ))?;
        let facts = stmt
            .query_map(params![session, ts(&now)], row_to_fact)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(facts)
    }

    /// Persona events, most recent event first
    pub fn persona_events(&self, session: &str, limit: usize) -> Result<Vec<Fact>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_facts
             WHERE session_id = ?1 AND is_persona_event = 1
             ORDER BY COALESCE(event_time, created_at) DESC LIMIT ?2",
            FACT_COLUMNS
        ))?;
        let facts = stmt
            .query_map(params![session, limit as i64], row_to_fact)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(facts)
    }

    /// Live facts that are not the source of any link, newest first
    pub fn unlinked_facts(&self, session: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<Fact>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_facts f
             WHERE f.session_id = ?1 AND (f.valid_to IS NULL OR f.valid_to > ?2)
               AND NOT EXISTS (
                   SELECT 1 FROM memory_links l
                   WHERE l.source_kind = 'fact' AND l.source_id = f.id
               )
             ORDER BY f.created_at DESC LIMIT ?3",
            FACT_COLUMNS
        ))?;
        let facts = stmt
            .query_map(params![session, ts(&now), limit as i64], row_to_fact)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(facts)
    }

    /// Live fact counts per category (uncategorised facts under "uncategorized")
    pub fn count_facts_by_category(
        &self,
        session: &str,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, i64>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT COALESCE(category, 'uncategorized'), COUNT(*) FROM memory_facts
             WHERE session_id = ?1 AND (valid_to IS NULL OR valid_to > ?2)
             GROUP BY COALESCE(category, 'uncategorized')",
        )?;
        let counts = stmt
            .query_map(params![session, ts(&now)], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(counts)
    }

    /// Record a read of each fact: access +1, `last_accessed`, heat bump
    pub fn record_fact_access(
        &self,
        session: &str,
        ids: &[String],
        heat_bump: f64,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.transaction(|tx| {
            let mut touched = 0;
            let mut stmt = tx.prepare(
                "SELECT heat_score FROM memory_facts WHERE id = ?1 AND session_id = ?2",
            )?;
            let mut update = tx.prepare(
                "UPDATE memory_facts
                 SET access_count = access_count + 1, last_accessed = ?1, heat_score = ?2
                 WHERE id = ?3",
            )?;
            for id in ids {
                let heat: Option<f64> = stmt
                    .query_row(params![id, session], |row| row.get(0))
                    .optional()?;
                if let Some(heat) = heat {
                    update.execute(params![ts(&now), bump_heat(heat, heat_bump), id])?;
                    touched += 1;
                }
            }
            Ok(touched)
        })
    }

    /// Live fact whose trimmed content equals `content`, ignoring ASCII case
    pub fn find_live_fact_by_content(
        &self,
        session: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Fact>> {
        let reader = self.reader()?;
        let fact = reader
            .query_row(
                &format!(
                    "SELECT {} FROM memory_facts
                     WHERE session_id = ?1 AND (valid_to IS NULL OR valid_to > ?2)
                       AND lower(trim(content)) = lower(trim(?3))
                     ORDER BY created_at ASC LIMIT 1",
                    FACT_COLUMNS
                ),
                params![session, ts(&now), content],
                row_to_fact,
            )
            .optional()?;
        Ok(fact)
    }

    /// Feed every live fact to `visit` in insertion order, one page at a
    /// time, until it returns false.
    ///
    /// The reader lock is released between pages.
    pub fn scan_live_facts<F>(&self, session: &str, now: DateTime<Utc>, mut visit: F) -> Result<()>
    where
        F: FnMut(Fact) -> bool,
    {
        let mut after: i64 = 0;
        loop {
            let page: Vec<(i64, Fact)> = {
                let reader = self.reader()?;
                let mut stmt = reader.prepare(&format!(
                    "SELECT rowid AS scan_key, {} FROM memory_facts
                     WHERE session_id = ?1 AND (valid_to IS NULL OR valid_to > ?2) AND rowid > ?3
                     ORDER BY rowid LIMIT ?4",
                    FACT_COLUMNS
                ))?;
                stmt.query_map(
                    params![session, ts(&now), after, SCAN_PAGE_SIZE as i64],
                    |row| Ok((row.get("scan_key")?, row_to_fact(row)?)),
                )?
                .collect::<rusqlite::Result<_>>()?
            };
            let last_page = page.len() < SCAN_PAGE_SIZE;
            for (key, fact) in page {
                after = key;
                if !visit(fact) {
                    return Ok(());
                }
            }
            if last_page {
                return Ok(());
            }
        }
    }

    /// Live facts with heat at or above `min_heat`, hottest first
    pub fn hot_facts(
        &self,
        session: &str,
        min_heat: f64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Fact>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_facts
             WHERE session_id = ?1 AND heat_score >= ?2 AND (valid_to IS NULL OR valid_to > ?3)
             ORDER BY heat_score DESC LIMIT ?4",
            FACT_COLUMNS
        ))?;
        let facts = stmt
            .query_map(params![session, min_heat, ts(&now), limit as i64], row_to_fact)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(facts)
    }

    /// Live facts with heat below `threshold`, coldest first
    pub fn cold_facts(
        &self,
        session: &str,
        threshold: f64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Fact>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_facts
             WHERE session_id = ?1 AND heat_score < ?2 AND (valid_to IS NULL OR valid_to > ?3)
             ORDER BY heat_score ASC LIMIT ?4",
            FACT_COLUMNS
        ))?;
        let facts = stmt
            .query_map(params![session, threshold, ts(&now), limit as i64], row_to_fact)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(facts)
    }

    /// Decay heat of live facts idle for at least `min_idle`.
    ///
    /// Each fact is charged only for time since its last access or last
    /// sweep, so repeated sweeps never raise heat and never double-charge.
    pub(crate) fn decay_fact_heat(
        tx: &Connection,
        session: &str,
        min_idle: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut select = tx.prepare(&format!(
            "SELECT rowid AS scan_key, {} FROM memory_facts
             WHERE session_id = ?1 AND heat_score > 0.0 AND valid_to IS NULL AND rowid > ?2
             ORDER BY rowid LIMIT ?3",
            FACT_COLUMNS
        ))?;
        let mut update = tx.prepare(
            "UPDATE memory_facts SET heat_score = ?1, heat_decayed_at = ?2 WHERE id = ?3",
        )?;

        let mut decayed = 0;
        let mut after: i64 = 0;
        loop {
            let page: Vec<(i64, Fact)> = select
                .query_map(params![session, after, SCAN_PAGE_SIZE as i64], |row| {
                    Ok((row.get("scan_key")?, row_to_fact(row)?))
                })?
                .collect::<rusqlite::Result<_>>()?;
            let last_page = page.len() < SCAN_PAGE_SIZE;

            for (key, fact) in page {
                after = key;
                let last_touch = fact.last_accessed.unwrap_or(fact.created_at);
                if now - last_touch < min_idle {
                    continue;
                }
                let anchor = fact.decay_anchor();
                if anchor >= now {
                    continue;
                }
                let idle_days = (now - anchor).num_seconds() as f64 / 86_400.0;
                let heat = rate_decay(fact.heat_score, idle_days, fact.decay_rate);
                if heat < fact.heat_score {
                    update.execute(params![heat, ts(&now), fact.id])?;
                    decayed += 1;
                }
            }
            if last_page {
                return Ok(decayed);
            }
        }
    }
}

/// Convert a row to Fact
pub(crate) fn row_to_fact(row: &rusqlite::Row) -> rusqlite::Result<Fact> {
    Ok(Fact {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        content: row.get("content")?,
        fact_type: get_enum(row, "fact_type")?,
        category: get_optional_enum(row, "category")?,
        confidence: row.get("confidence")?,
        source: get_enum(row, "source")?,
        source_id: row.get("source_id")?,
        is_persona_attribute: row.get("is_persona_attribute")?,
        is_persona_event: row.get("is_persona_event")?,
        keywords: get_list(row, "keywords")?,
        tags: get_list(row, "tags")?,
        context: row.get("context")?,
        valid_from: get_timestamp(row, "valid_from")?,
        valid_to: get_optional_timestamp(row, "valid_to")?,
        event_time: get_optional_timestamp(row, "event_time")?,
        record_time: get_timestamp(row, "record_time")?,
        heat_score: row.get("heat_score")?,
        access_count: row.get("access_count")?,
        last_accessed: get_optional_timestamp(row, "last_accessed")?,
        decay_rate: row.get("decay_rate")?,
        heat_decayed_at: get_optional_timestamp(row, "heat_decayed_at")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}
