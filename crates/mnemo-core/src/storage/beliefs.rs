//! Belief queries

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::sqlite::{
    get_enum, get_list, get_optional_timestamp, get_timestamp, like_pattern, opt_ts, to_json, ts,
    Result, Storage,
};
use crate::confidence::time_decay;
use crate::memory::{Belief, BeliefType, ConfidenceEntry};

/// Rows read per page by decay sweeps
const DECAY_PAGE_SIZE: usize = 500;

const BELIEF_COLUMNS: &str = "id, session_id, belief, belief_type, confidence,
    confidence_history, supporting_facts, contradicting_facts, formed_at, last_reinforced,
    last_challenged, times_reinforced, times_challenged, status, superseded_by, decayed_at,
    created_at, updated_at";

pub(crate) fn put_belief(conn: &Connection, belief: &Belief) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO memory_beliefs ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            BELIEF_COLUMNS
        ),
        params![
            belief.id,
            belief.session_id,
            belief.belief,
            belief.belief_type.as_str(),
            belief.confidence,
            to_json(&belief.confidence_history),
            to_json(&belief.supporting_facts),
            to_json(&belief.contradicting_facts),
            ts(&belief.formed_at),
            opt_ts(&belief.last_reinforced),
            opt_ts(&belief.last_challenged),
            belief.times_reinforced,
            belief.times_challenged,
            belief.status.as_str(),
            belief.superseded_by,
            opt_ts(&belief.decayed_at),
            ts(&belief.created_at),
            ts(&belief.updated_at),
        ],
    )?;
    Ok(())
}

/// Low-confidence beliefs formed before `older_than`
pub(crate) fn select_beliefs_for_snapshot(
    conn: &Connection,
    session: &str,
    low_confidence: f64,
    older_than: DateTime<Utc>,
) -> rusqlite::Result<Vec<Belief>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM memory_beliefs
         WHERE session_id = ?1 AND confidence < ?2 AND created_at < ?3
         ORDER BY created_at ASC",
        BELIEF_COLUMNS
    ))?;
    stmt.query_map(params![session, low_confidence, ts(&older_than)], row_to_belief)?
        .collect()
}

pub(crate) fn load_belief(conn: &Connection, id: &str) -> rusqlite::Result<Option<Belief>> {
    conn.query_row(
        &format!("SELECT {} FROM memory_beliefs WHERE id = ?1", BELIEF_COLUMNS),
        params![id],
        row_to_belief,
    )
    .optional()
}

fn type_clause(types: &[BeliefType]) -> String {
    if types.is_empty() {
        return String::new();
    }
    let names: Vec<String> = types.iter().map(|t| format!("'{}'", t.as_str())).collect();
    format!(" AND belief_type IN ({})", names.join(", "))
}

impl Storage {
    /// Insert or fully overwrite a belief
    pub fn save_belief(&self, belief: &Belief) -> Result<()> {
        let writer = self.writer()?;
        put_belief(&writer, belief)?;
        Ok(())
    }

    /// Write several beliefs atomically (used by supersede)
    pub fn save_beliefs(&self, beliefs: &[&Belief]) -> Result<()> {
        self.transaction(|tx| {
            for belief in beliefs {
                put_belief(tx, belief)?;
            }
            Ok(())
        })
    }

    pub fn get_belief(&self, session: &str, id: &str) -> Result<Option<Belief>> {
        let reader = self.reader()?;
        Ok(load_belief(&reader, id)?.filter(|b| b.session_id == session))
    }

    /// Active beliefs whose text contains `fragment` (case-insensitive)
    pub fn find_active_beliefs_containing(&self, session: &str, fragment: &str) -> Result<Vec<Belief>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_beliefs
             WHERE session_id = ?1 AND status = 'active' AND belief LIKE ?2 ESCAPE '\\'
             ORDER BY confidence DESC",
            BELIEF_COLUMNS
        ))?;
        let beliefs = stmt
            .query_map(params![session, like_pattern(fragment)], row_to_belief)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(beliefs)
    }

    /// Active beliefs at or above `min_confidence`, most confident first
    pub fn active_beliefs(
        &self,
        session: &str,
        min_confidence: f64,
        types: &[BeliefType],
        limit: usize,
    ) -> Result<Vec<Belief>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_beliefs
             WHERE session_id = ?1 AND status = 'active' AND confidence >= ?2{}
             ORDER BY confidence DESC, formed_at DESC LIMIT ?3",
            BELIEF_COLUMNS,
            type_clause(types)
        ))?;
        let beliefs = stmt
            .query_map(params![session, min_confidence, limit as i64], row_to_belief)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(beliefs)
    }

    /// Active beliefs strictly between the two bounds, most challenged first
    pub fn uncertain_beliefs(
        &self,
        session: &str,
        lower: f64,
        upper: f64,
        limit: usize,
    ) -> Result<Vec<Belief>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_beliefs
             WHERE session_id = ?1 AND status = 'active' AND confidence > ?2 AND confidence < ?3
             ORDER BY times_challenged DESC, confidence ASC LIMIT ?4",
            BELIEF_COLUMNS
        ))?;
        let beliefs = stmt
            .query_map(params![session, lower, upper, limit as i64], row_to_belief)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(beliefs)
    }

    /// Active beliefs mentioning `domain`
    pub fn count_beliefs_mentioning(&self, session: &str, domain: &str) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row(
            "SELECT COUNT(*) FROM memory_beliefs
             WHERE session_id = ?1 AND status = 'active' AND belief LIKE ?2 ESCAPE '\\'",
            params![session, like_pattern(domain)],
            |row| row.get(0),
        )?)
    }

    /// Hard delete, for administrative cleanup
    pub fn delete_belief(&self, session: &str, id: &str) -> Result<bool> {
        let writer = self.writer()?;
        let rows = writer.execute(
            "DELETE FROM memory_beliefs WHERE id = ?1 AND session_id = ?2",
            params![id, session],
        )?;
        Ok(rows > 0)
    }

    /// Lower confidence of active beliefs not confirmed for `idle`.
    ///
    /// Charged from the later of the last confirmation and the last sweep,
    /// so re-running never lowers twice for the same period.
    pub(crate) fn decay_belief_confidence(
        tx: &Connection,
        session: &str,
        idle: Duration,
        rate: f64,
        floor: f64,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut select = tx.prepare(&format!(
            "SELECT rowid AS scan_key, {} FROM memory_beliefs
             WHERE session_id = ?1 AND status = 'active' AND confidence > ?2 AND rowid > ?3
             ORDER BY rowid LIMIT ?4",
            BELIEF_COLUMNS
        ))?;
        let mut update = tx.prepare(
            "UPDATE memory_beliefs SET confidence = ?1, decayed_at = ?2 WHERE id = ?3",
        )?;

        let mut decayed = 0;
        let mut after: i64 = 0;
        loop {
            let page: Vec<(i64, Belief)> = select
                .query_map(params![session, floor, after, DECAY_PAGE_SIZE as i64], |row| {
                    Ok((row.get("scan_key")?, row_to_belief(row)?))
                })?
                .collect::<rusqlite::Result<_>>()?;
            let last_page = page.len() < DECAY_PAGE_SIZE;

            for (key, belief) in page {
                after = key;
                if now - belief.last_confirmed() < idle {
                    continue;
                }
                let anchor = belief.decay_anchor();
                if anchor >= now {
                    continue;
                }
                let days = (now - anchor).num_seconds() as f64 / 86_400.0;
                let confidence = time_decay(belief.confidence, days, rate, floor);
                if confidence < belief.confidence {
                    update.execute(params![confidence, ts(&now), belief.id])?;
                    decayed += 1;
                }
            }
            if last_page {
                return Ok(decayed);
            }
        }
    }
}

pub(crate) fn row_to_belief(row: &rusqlite::Row) -> rusqlite::Result<Belief> {
    let history: String = row.get("confidence_history")?;
    let confidence_history: Vec<ConfidenceEntry> = serde_json::from_str(&history).unwrap_or_default();

    Ok(Belief {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        belief: row.get("belief")?,
        belief_type: get_enum(row, "belief_type")?,
        confidence: row.get("confidence")?,
        confidence_history,
        supporting_facts: get_list(row, "supporting_facts")?,
        contradicting_facts: get_list(row, "contradicting_facts")?,
        formed_at: get_timestamp(row, "formed_at")?,
        last_reinforced: get_optional_timestamp(row, "last_reinforced")?,
        last_challenged: get_optional_timestamp(row, "last_challenged")?,
        times_reinforced: row.get("times_reinforced")?,
        times_challenged: row.get("times_challenged")?,
        status: get_enum(row, "status")?,
        superseded_by: row.get("superseded_by")?,
        decayed_at: get_optional_timestamp(row, "decayed_at")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BeliefInput;
    use crate::storage::sqlite::test_support::create_test_storage;

    #[test]
    fn test_belief_round_trip_with_history() {
        let (storage, _dir) = create_test_storage();
        let now = Utc::now();
        let belief = Belief::from_input("s", BeliefInput::new("User is a night owl"), now);
        storage.save_belief(&belief).unwrap();

        let loaded = storage.get_belief("s", &belief.id).unwrap().unwrap();
        assert_eq!(loaded.confidence_history.len(), 1);
        assert_eq!(loaded.status, belief.status);
        assert!(storage.get_belief("t", &belief.id).unwrap().is_none());

        let found = storage.find_active_beliefs_containing("s", "NIGHT OWL").unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_belief_decay_respects_idle_window() {
        let (storage, _dir) = create_test_storage();
        let formed = Utc::now() - Duration::days(30);
        let stale = Belief::from_input("s", BeliefInput::new("stale").with_confidence(0.6), formed);
        let fresh = Belief::from_input("s", BeliefInput::new("fresh").with_confidence(0.6), Utc::now());
        storage.save_belief(&stale).unwrap();
        storage.save_belief(&fresh).unwrap();

        let now = Utc::now();
        let decayed = storage
            .transaction(|tx| {
                Storage::decay_belief_confidence(tx, "s", Duration::days(7), 0.01, 0.1, now)
            })
            .unwrap();
        assert_eq!(decayed, 1);

        let stale_after = storage.get_belief("s", &stale.id).unwrap().unwrap();
        assert!(stale_after.confidence < 0.6);
        assert!(stale_after.confidence >= 0.1);
        let fresh_after = storage.get_belief("s", &fresh.id).unwrap().unwrap();
        assert_eq!(fresh_after.confidence, 0.6);

        let again = storage
            .transaction(|tx| {
                Storage::decay_belief_confidence(tx, "s", Duration::days(7), 0.01, 0.1, now)
            })
            .unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn test_belief_decay_crosses_page_boundary() {
        let (storage, _dir) = create_test_storage();
        let formed = Utc::now() - Duration::days(30);
        let total = DECAY_PAGE_SIZE + 3;
        for i in 0..total {
            let input = BeliefInput::new(format!("belief {}", i)).with_confidence(0.6);
            storage.save_belief(&Belief::from_input("s", input, formed)).unwrap();
        }

        let now = Utc::now();
        let decayed = storage
            .transaction(|tx| {
                Storage::decay_belief_confidence(tx, "s", Duration::days(7), 0.01, 0.1, now)
            })
            .unwrap();
        assert_eq!(decayed, total);
    }
}
