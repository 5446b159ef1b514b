//! Experience and procedure queries

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

use super::sqlite::{
    get_enum, get_list, get_map, get_optional_timestamp, get_timestamp, like_pattern, opt_ts,
    to_json, ts, Result, Storage,
};
use crate::memory::{Experience, ExperienceType, Outcome, Procedure};

const EXPERIENCE_COLUMNS: &str = "id, session_id, experience_type, description, action_taken,
    outcome, outcome_details, lesson_learned, should_repeat, occurred_at, duration_seconds,
    agent_id, related_facts, related_entities, is_procedural, procedure_id, created_at";

const PROCEDURE_COLUMNS: &str = "id, session_id, name, description, procedure_type,
    success_count, failure_count, avg_success_rate, avg_time_saved, experience_ids, version,
    last_used, created_at, updated_at";

/// A cluster of experiences sharing `(experience_type, action_taken)`
#[derive(Debug, Clone, PartialEq)]
pub struct ExperienceCluster {
    pub experience_type: ExperienceType,
    pub action_taken: String,
    pub count: i64,
    pub success_rate: f64,
    pub avg_duration: f64,
    pub experience_ids: Vec<String>,
}

fn put_experience(conn: &Connection, experience: &Experience) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO memory_experiences ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            EXPERIENCE_COLUMNS
        ),
        params![
            experience.id,
            experience.session_id,
            experience.experience_type.as_str(),
            experience.description,
            experience.action_taken,
            experience.outcome.as_str(),
            to_json(&experience.outcome_details),
            experience.lesson_learned,
            experience.should_repeat,
            ts(&experience.occurred_at),
            experience.duration_seconds,
            experience.agent_id,
            to_json(&experience.related_facts),
            to_json(&experience.related_entities),
            experience.is_procedural,
            experience.procedure_id,
            ts(&experience.created_at),
        ],
    )?;
    Ok(())
}

fn type_clause(types: &[ExperienceType]) -> String {
    if types.is_empty() {
        return String::new();
    }
    let names: Vec<String> = types.iter().map(|t| format!("'{}'", t.as_str())).collect();
    format!(" AND experience_type IN ({})", names.join(", "))
}

fn outcome_clause(outcomes: &[Outcome]) -> String {
    if outcomes.is_empty() {
        return String::new();
    }
    let names: Vec<String> = outcomes.iter().map(|o| format!("'{}'", o.as_str())).collect();
    format!(" AND outcome IN ({})", names.join(", "))
}

impl Storage {
    pub fn insert_experience(&self, experience: &Experience) -> Result<()> {
        let writer = self.writer()?;
        put_experience(&writer, experience)?;
        Ok(())
    }

    pub fn get_experience(&self, session: &str, id: &str) -> Result<Option<Experience>> {
        let reader = self.reader()?;
        let experience = reader
            .query_row(
                &format!(
                    "SELECT {} FROM memory_experiences WHERE id = ?1 AND session_id = ?2",
                    EXPERIENCE_COLUMNS
                ),
                params![id, session],
                row_to_experience,
            )
            .optional()?;
        Ok(experience)
    }

    /// Most recent experiences, optionally filtered by type, outcome and age
    pub fn recent_experiences(
        &self,
        session: &str,
        limit: usize,
        types: &[ExperienceType],
        outcomes: &[Outcome],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Experience>> {
        let reader = self.reader()?;
        let sql = format!(
            "SELECT {} FROM memory_experiences
             WHERE session_id = ?1 AND occurred_at >= ?2{}{}
             ORDER BY occurred_at DESC LIMIT ?3",
            EXPERIENCE_COLUMNS,
            type_clause(types),
            outcome_clause(outcomes)
        );
        let since = since.map(|t| ts(&t)).unwrap_or_default();
        let mut stmt = reader.prepare(&sql)?;
        let experiences = stmt
            .query_map(params![session, since, limit as i64], row_to_experience)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(experiences)
    }

    /// Substring match on description, action and lesson
    pub fn search_experiences_text(
        &self,
        session: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Experience>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_experiences
             WHERE session_id = ?1
               AND (description LIKE ?2 ESCAPE '\\'
                    OR action_taken LIKE ?2 ESCAPE '\\'
                    OR lesson_learned LIKE ?2 ESCAPE '\\')
             ORDER BY occurred_at DESC LIMIT ?3",
            EXPERIENCE_COLUMNS
        ))?;
        let experiences = stmt
            .query_map(params![session, like_pattern(query), limit as i64], row_to_experience)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(experiences)
    }

    /// Every experience of a session, newest first (used for vector ranking)
    pub fn all_experiences(&self, session: &str, limit: usize) -> Result<Vec<Experience>> {
        self.recent_experiences(session, limit, &[], &[], None)
    }

    pub fn agent_experiences(&self, session: &str, agent_id: &str, limit: usize) -> Result<Vec<Experience>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_experiences
             WHERE session_id = ?1 AND agent_id = ?2
             ORDER BY occurred_at DESC LIMIT ?3",
            EXPERIENCE_COLUMNS
        ))?;
        let experiences = stmt
            .query_map(params![session, agent_id, limit as i64], row_to_experience)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(experiences)
    }

    /// Outcome counts for experiences since `since`, optionally of one type
    pub fn experience_outcomes(
        &self,
        session: &str,
        experience_type: Option<ExperienceType>,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<String, i64>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT outcome, COUNT(*) FROM memory_experiences
             WHERE session_id = ?1 AND occurred_at >= ?2{}
             GROUP BY outcome",
            type_clause(&experience_type.into_iter().collect::<Vec<_>>())
        ))?;
        let counts = stmt
            .query_map(params![session, ts(&since)], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(counts)
    }

    /// Experiences that recorded a lesson, newest first
    pub fn experiences_with_lessons(&self, session: &str, limit: usize) -> Result<Vec<Experience>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_experiences
             WHERE session_id = ?1 AND lesson_learned IS NOT NULL AND lesson_learned != ''
             ORDER BY occurred_at DESC LIMIT ?2",
            EXPERIENCE_COLUMNS
        ))?;
        let experiences = stmt
            .query_map(params![session, limit as i64], row_to_experience)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(experiences)
    }

    /// Flag an experience as procedural. Returns false for unknown ids.
    pub fn mark_experience_procedural(
        &self,
        session: &str,
        id: &str,
        procedure_id: Option<&str>,
    ) -> Result<bool> {
        let writer = self.writer()?;
        let rows = writer.execute(
            "UPDATE memory_experiences SET is_procedural = 1, procedure_id = COALESCE(?1, procedure_id)
             WHERE id = ?2 AND session_id = ?3",
            params![procedure_id, id, session],
        )?;
        Ok(rows > 0)
    }

    /// Experiences whose description or lesson mentions `domain`
    pub fn count_experiences_mentioning(&self, session: &str, domain: &str) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row(
            "SELECT COUNT(*) FROM memory_experiences
             WHERE session_id = ?1
               AND (description LIKE ?2 ESCAPE '\\' OR lesson_learned LIKE ?2 ESCAPE '\\')",
            params![session, like_pattern(domain)],
            |row| row.get(0),
        )?)
    }

    pub fn count_experiences_by_type(&self, session: &str) -> Result<BTreeMap<String, i64>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT experience_type, COUNT(*) FROM memory_experiences
             WHERE session_id = ?1 GROUP BY experience_type",
        )?;
        let counts = stmt
            .query_map(params![session], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(counts)
    }

    /// Groups of `(experience_type, action_taken)` with at least
    /// `min_count` members and a success rate of at least `min_success_rate`,
    /// largest first
    pub fn experience_clusters(
        &self,
        session: &str,
        min_count: i64,
        min_success_rate: f64,
        limit: usize,
    ) -> Result<Vec<ExperienceCluster>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT experience_type, action_taken, COUNT(*) AS n,
                    AVG(CASE WHEN outcome = 'success' THEN 1.0 ELSE 0.0 END) AS rate,
                    AVG(COALESCE(duration_seconds, 0)) AS avg_duration
             FROM memory_experiences
             WHERE session_id = ?1 AND action_taken IS NOT NULL
             GROUP BY experience_type, action_taken
             HAVING n >= ?2 AND rate >= ?3
             ORDER BY n DESC, action_taken ASC
             LIMIT ?4",
        )?;
        let groups: Vec<(String, String, i64, f64, f64)> = stmt
            .query_map(params![session, min_count, min_success_rate, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut ids_stmt = reader.prepare(
            "SELECT id FROM memory_experiences
             WHERE session_id = ?1 AND experience_type = ?2 AND action_taken = ?3
             ORDER BY occurred_at ASC",
        )?;
        let mut clusters = Vec::with_capacity(groups.len());
        for (experience_type, action_taken, count, success_rate, avg_duration) in groups {
            let Some(experience_type) = ExperienceType::parse_name(&experience_type) else {
                continue;
            };
            let experience_ids = ids_stmt
                .query_map(params![session, experience_type.as_str(), action_taken], |row| {
                    row.get(0)
                })?
                .filter_map(|r| r.ok())
                .collect();
            clusters.push(ExperienceCluster {
                experience_type,
                action_taken,
                count,
                success_rate,
                avg_duration,
                experience_ids,
            });
        }
        Ok(clusters)
    }

    // ========================================================================
    // PROCEDURES
    // ========================================================================

    pub fn insert_procedure(&self, procedure: &Procedure) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            &format!(
                "INSERT INTO memory_procedures ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                PROCEDURE_COLUMNS
            ),
            params![
                procedure.id,
                procedure.session_id,
                procedure.name,
                procedure.description,
                procedure.procedure_type.as_str(),
                procedure.success_count,
                procedure.failure_count,
                procedure.avg_success_rate,
                procedure.avg_time_saved,
                to_json(&procedure.experience_ids),
                procedure.version,
                opt_ts(&procedure.last_used),
                ts(&procedure.created_at),
                ts(&procedure.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_procedure_by_name(&self, session: &str, name: &str) -> Result<Option<Procedure>> {
        let reader = self.reader()?;
        let procedure = reader
            .query_row(
                &format!(
                    "SELECT {} FROM memory_procedures WHERE session_id = ?1 AND name = ?2",
                    PROCEDURE_COLUMNS
                ),
                params![session, name],
                row_to_procedure,
            )
            .optional()?;
        Ok(procedure)
    }

    pub fn list_procedures(&self, session: &str) -> Result<Vec<Procedure>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM memory_procedures WHERE session_id = ?1
             ORDER BY avg_success_rate DESC, success_count DESC",
            PROCEDURE_COLUMNS
        ))?;
        let procedures = stmt
            .query_map(params![session], row_to_procedure)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(procedures)
    }
}

fn row_to_experience(row: &rusqlite::Row) -> rusqlite::Result<Experience> {
    Ok(Experience {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        experience_type: get_enum(row, "experience_type")?,
        description: row.get("description")?,
        action_taken: row.get("action_taken")?,
        outcome: get_enum(row, "outcome")?,
        outcome_details: get_map(row, "outcome_details")?,
        lesson_learned: row.get("lesson_learned")?,
        should_repeat: row.get("should_repeat")?,
        occurred_at: get_timestamp(row, "occurred_at")?,
        duration_seconds: row.get("duration_seconds")?,
        agent_id: row.get("agent_id")?,
        related_facts: get_list(row, "related_facts")?,
        related_entities: get_list(row, "related_entities")?,
        is_procedural: row.get("is_procedural")?,
        procedure_id: row.get("procedure_id")?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

fn row_to_procedure(row: &rusqlite::Row) -> rusqlite::Result<Procedure> {
    Ok(Procedure {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        procedure_type: get_enum(row, "procedure_type")?,
        success_count: row.get("success_count")?,
        failure_count: row.get("failure_count")?,
        avg_success_rate: row.get("avg_success_rate")?,
        avg_time_saved: row.get("avg_time_saved")?,
        experience_ids: get_list(row, "experience_ids")?,
        version: row.get("version")?,
        last_used: get_optional_timestamp(row, "last_used")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}
