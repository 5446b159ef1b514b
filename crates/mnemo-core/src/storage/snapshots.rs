//! Capturing and restoring record copies

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};

use super::beliefs::{load_belief, put_belief, select_beliefs_for_snapshot};
use super::facts::{load_fact, put_fact, select_facts_for_snapshot};
use super::graph::{load_relationship, put_relationship, select_relationships_for_snapshot};
use super::sqlite::{Result, Storage};
use crate::memory::{Belief, Fact, Relationship};

/// Which records a capture takes
#[derive(Debug, Clone, Copy)]
pub struct CaptureWindow {
    /// Records below this confidence are pruning candidates
    pub low_confidence: f64,
    /// Pruning candidates must be older than this
    pub older_than: DateTime<Utc>,
    /// Facts created from here on are consolidation candidates
    pub recent_since: DateTime<Utc>,
}

/// Value copies read in one transaction
#[derive(Debug, Clone, Default)]
pub struct CapturedRecords {
    pub facts: Vec<Fact>,
    pub beliefs: Vec<Belief>,
    pub relationships: Vec<Relationship>,
}

/// Records touched by one restore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreCounts {
    /// Captured records that no longer existed and were re-inserted
    pub inserted: usize,
    /// Existing records whose mutable fields were put back
    pub updated: usize,
}

impl RestoreCounts {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

fn restore_fact(conn: &Connection, captured: &Fact, counts: &mut RestoreCounts) -> rusqlite::Result<()> {
    match load_fact(conn, &captured.id)? {
        None => {
            put_fact(conn, captured)?;
            counts.inserted += 1;
        }
        Some(mut current) => {
            if current.confidence != captured.confidence
                || current.valid_from != captured.valid_from
                || current.valid_to != captured.valid_to
            {
                current.confidence = captured.confidence;
                current.valid_from = captured.valid_from;
                current.valid_to = captured.valid_to;
                put_fact(conn, &current)?;
                counts.updated += 1;
            }
        }
    }
    Ok(())
}

fn restore_belief(conn: &Connection, captured: &Belief, counts: &mut RestoreCounts) -> rusqlite::Result<()> {
    match load_belief(conn, &captured.id)? {
        None => {
            put_belief(conn, captured)?;
            counts.inserted += 1;
        }
        Some(mut current) => {
            if current.status != captured.status
                || current.confidence != captured.confidence
                || current.superseded_by != captured.superseded_by
                || current.confidence_history != captured.confidence_history
            {
                current.status = captured.status;
                current.confidence = captured.confidence;
                current.superseded_by = captured.superseded_by.clone();
                current.confidence_history = captured.confidence_history.clone();
                put_belief(conn, &current)?;
                counts.updated += 1;
            }
        }
    }
    Ok(())
}

fn restore_relationship(
    conn: &Connection,
    captured: &Relationship,
    counts: &mut RestoreCounts,
) -> rusqlite::Result<()> {
    match load_relationship(conn, &captured.id)? {
        None => {
            put_relationship(conn, captured)?;
            counts.inserted += 1;
        }
        Some(mut current) => {
            if current.strength != captured.strength
                || current.confidence != captured.confidence
                || current.valid_to != captured.valid_to
            {
                current.strength = captured.strength;
                current.confidence = captured.confidence;
                current.valid_to = captured.valid_to;
                put_relationship(conn, &current)?;
                counts.updated += 1;
            }
        }
    }
    Ok(())
}

impl Storage {
    /// Read the at-risk records of a session in one read transaction.
    ///
    /// Fails if any row cannot be decoded.
    pub fn capture_snapshot(&self, session: &str, window: &CaptureWindow) -> Result<CapturedRecords> {
        let mut reader = self.reader()?;
        let tx = reader.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let captured = CapturedRecords {
            facts: select_facts_for_snapshot(
                &tx,
                session,
                window.low_confidence,
                window.older_than,
                window.recent_since,
            )?,
            beliefs: select_beliefs_for_snapshot(
                &tx,
                session,
                window.low_confidence,
                window.older_than,
            )?,
            relationships: select_relationships_for_snapshot(
                &tx,
                session,
                window.low_confidence,
                window.older_than,
            )?,
        };
        tx.commit()?;
        Ok(captured)
    }

    /// Put captured records back in one writer transaction.
    ///
    /// Missing records are re-inserted whole; existing ones only get their
    /// confidence, status and validity fields back. Running it again with
    /// the same records changes nothing.
    pub fn restore_records(
        &self,
        facts: &[Fact],
        beliefs: &[Belief],
        relationships: &[Relationship],
    ) -> Result<RestoreCounts> {
        self.transaction(|tx| {
            let mut counts = RestoreCounts::default();
            for fact in facts {
                restore_fact(tx, fact, &mut counts)?;
            }
            for belief in beliefs {
                restore_belief(tx, belief, &mut counts)?;
            }
            for rel in relationships {
                restore_relationship(tx, rel, &mut counts)?;
            }
            Ok(counts)
        })
    }
}
