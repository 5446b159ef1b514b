//! Topic and keyword index queries

use rusqlite::{params, Connection, OptionalExtension};

use super::sqlite::{get_list, get_optional_timestamp, get_timestamp, opt_ts, to_json, ts, Result, Storage};
use crate::memory::{KeywordIndex, Topic};

const TOPIC_COLUMNS: &str = "id, session_id, topic, description, message_ids, message_count,
    first_discussed, last_discussed, summary, key_points, created_at, updated_at";

const KEYWORD_COLUMNS: &str = "id, session_id, keyword, message_ids, fact_ids, occurrence_count, created_at";

fn put_topic(conn: &Connection, topic: &Topic) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO memory_topics ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            TOPIC_COLUMNS
        ),
        params![
            topic.id,
            topic.session_id,
            topic.topic,
            topic.description,
            to_json(&topic.message_ids),
            topic.message_count,
            opt_ts(&topic.first_discussed),
            opt_ts(&topic.last_discussed),
            topic.summary,
            to_json(&topic.key_points),
            ts(&topic.created_at),
            ts(&topic.updated_at),
        ],
    )?;
    Ok(())
}

fn put_keyword(conn: &Connection, keyword: &KeywordIndex) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO memory_keyword_index ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            KEYWORD_COLUMNS
        ),
        params![
            keyword.id,
            keyword.session_id,
            keyword.keyword,
            to_json(&keyword.message_ids),
            to_json(&keyword.fact_ids),
            keyword.occurrence_count,
            ts(&keyword.created_at),
        ],
    )?;
    Ok(())
}

impl Storage {
    // ========================================================================
    // TOPICS
    // ========================================================================

    pub fn save_topic(&self, topic: &Topic) -> Result<()> {
        let writer = self.writer()?;
        put_topic(&writer, topic)?;
        Ok(())
    }

    pub fn get_topic(&self, session: &str, name: &str) -> Result<Option<Topic>> {
        let reader = self.reader()?;
        Ok(reader
            .query_row(
                &format!(
                    "SELECT {} FROM memory_topics WHERE session_id = ?1 AND topic = ?2",
                    TOPIC_COLUMNS
                ),
                params![session, name],
                row_to_topic,
            )
            .optional()?)
    }

    /// Most recently discussed topics first
    pub fn recent_topics(&self, session: &str, limit: usize) -> Result<Vec<Topic>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_topics WHERE session_id = ?1
             ORDER BY last_discussed DESC, updated_at DESC LIMIT ?2",
            TOPIC_COLUMNS
        ))?;
        let topics = stmt
            .query_map(params![session, limit as i64], row_to_topic)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(topics)
    }

    // ========================================================================
    // KEYWORDS
    // ========================================================================

    /// Write several keyword rows in one transaction
    pub fn save_keywords(&self, keywords: &[KeywordIndex]) -> Result<()> {
        self.transaction(|tx| {
            for keyword in keywords {
                put_keyword(tx, keyword)?;
            }
            Ok(())
        })
    }

    pub fn get_keyword(&self, session: &str, keyword: &str) -> Result<Option<KeywordIndex>> {
        let reader = self.reader()?;
        Ok(reader
            .query_row(
                &format!(
                    "SELECT {} FROM memory_keyword_index WHERE session_id = ?1 AND keyword = ?2",
                    KEYWORD_COLUMNS
                ),
                params![session, keyword],
                row_to_keyword,
            )
            .optional()?)
    }

    /// Keywords ordered by how often they occurred
    pub fn top_keywords(&self, session: &str, limit: usize) -> Result<Vec<KeywordIndex>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_keyword_index WHERE session_id = ?1
             ORDER BY occurrence_count DESC, keyword ASC LIMIT ?2",
            KEYWORD_COLUMNS
        ))?;
        let keywords = stmt
            .query_map(params![session, limit as i64], row_to_keyword)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(keywords)
    }
}

fn row_to_topic(row: &rusqlite::Row) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        topic: row.get("topic")?,
        description: row.get("description")?,
        message_ids: get_list(row, "message_ids")?,
        message_count: row.get("message_count")?,
        first_discussed: get_optional_timestamp(row, "first_discussed")?,
        last_discussed: get_optional_timestamp(row, "last_discussed")?,
        summary: row.get("summary")?,
        key_points: get_list(row, "key_points")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

fn row_to_keyword(row: &rusqlite::Row) -> rusqlite::Result<KeywordIndex> {
    Ok(KeywordIndex {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        keyword: row.get("keyword")?,
        message_ids: get_list(row, "message_ids")?,
        fact_ids: get_list(row, "fact_ids")?,
        occurrence_count: row.get("occurrence_count")?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::test_support::create_test_storage;
    use chrono::{Duration, Utc};

    #[test]
    fn test_topics_order_by_last_discussed() {
        let (storage, _dir) = create_test_storage();
        let now = Utc::now();

        let mut older = Topic::new("s", "rust", now);
        older.index_message("m1", now - Duration::hours(2));
        let mut newer = Topic::new("s", "cooking", now);
        newer.index_message("m2", now);
        storage.save_topic(&older).unwrap();
        storage.save_topic(&newer).unwrap();

        let recent = storage.recent_topics("s", 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].topic, "cooking");

        let loaded = storage.get_topic("s", "rust").unwrap().unwrap();
        assert_eq!(loaded.message_ids, vec!["m1".to_string()]);
        assert!(storage.get_topic("other", "rust").unwrap().is_none());
    }

    #[test]
    fn test_keywords_rank_by_occurrence() {
        let (storage, _dir) = create_test_storage();
        let now = Utc::now();

        let mut coffee = KeywordIndex::new("s", "coffee", now);
        coffee.index_message("m1");
        coffee.index_message("m2");
        let mut tea = KeywordIndex::new("s", "tea", now);
        tea.index_message("m3");
        storage.save_keywords(&[coffee, tea]).unwrap();

        let top = storage.top_keywords("s", 5).unwrap();
        assert_eq!(top[0].keyword, "coffee");
        assert_eq!(top[0].occurrence_count, 2);
        assert_eq!(storage.get_keyword("s", "tea").unwrap().unwrap().message_ids.len(), 1);
    }
}
