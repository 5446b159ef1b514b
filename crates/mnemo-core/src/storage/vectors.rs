//! Embedding vectors stored as little-endian f32 BLOBs

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::sqlite::{get_enum, ts, Result, Storage};
use crate::embeddings::Embedding;
use crate::memory::MemoryKind;

/// One stored vector with the record it belongs to
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub memory_kind: MemoryKind,
    pub memory_id: String,
    pub embedding: Embedding,
    pub model: String,
}

impl Storage {
    /// Store or replace the vector of one record
    pub fn save_embedding(
        &self,
        session: &str,
        kind: MemoryKind,
        memory_id: &str,
        embedding: &Embedding,
        model: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO memory_embeddings
             (memory_kind, memory_id, session_id, embedding, dimensions, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                kind.as_str(),
                memory_id,
                session,
                embedding.to_bytes(),
                embedding.dimensions as i64,
                model,
                ts(&now),
            ],
        )?;
        Ok(())
    }

    pub fn get_embedding(&self, kind: MemoryKind, memory_id: &str) -> Result<Option<Embedding>> {
        let reader = self.reader()?;
        let bytes: Option<Vec<u8>> = reader
            .query_row(
                "SELECT embedding FROM memory_embeddings WHERE memory_kind = ?1 AND memory_id = ?2",
                params![kind.as_str(), memory_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.and_then(|b| Embedding::from_bytes(&b)))
    }

    /// Every vector of one kind in a session; undecodable blobs are skipped
    pub fn load_embeddings(&self, session: &str, kind: MemoryKind) -> Result<Vec<StoredEmbedding>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT memory_kind, memory_id, embedding, model FROM memory_embeddings
             WHERE session_id = ?1 AND memory_kind = ?2",
        )?;
        let rows = stmt
            .query_map(params![session, kind.as_str()], |row| {
                let bytes: Vec<u8> = row.get("embedding")?;
                Ok((
                    get_enum::<MemoryKind>(row, "memory_kind")?,
                    row.get::<_, String>("memory_id")?,
                    bytes,
                    row.get::<_, String>("model")?,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(memory_kind, memory_id, bytes, model)| {
                Embedding::from_bytes(&bytes).map(|embedding| StoredEmbedding {
                    memory_kind,
                    memory_id,
                    embedding,
                    model,
                })
            })
            .collect();
        Ok(rows)
    }

    pub fn delete_embedding(&self, kind: MemoryKind, memory_id: &str) -> Result<bool> {
        let writer = self.writer()?;
        let rows = writer.execute(
            "DELETE FROM memory_embeddings WHERE memory_kind = ?1 AND memory_id = ?2",
            params![kind.as_str(), memory_id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::test_support::create_test_storage;

    #[test]
    fn test_embeddings_are_scoped_by_session_and_kind() {
        let (storage, _dir) = create_test_storage();
        let now = Utc::now();
        let vector = Embedding::new(vec![0.5, -0.25, 1.0]);

        storage
            .save_embedding("s", MemoryKind::Fact, "f1", &vector, "test", now)
            .unwrap();
        storage
            .save_embedding("s", MemoryKind::Entity, "e1", &vector, "test", now)
            .unwrap();
        storage
            .save_embedding("other", MemoryKind::Fact, "f2", &vector, "test", now)
            .unwrap();

        let facts = storage.load_embeddings("s", MemoryKind::Fact).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].memory_id, "f1");
        assert_eq!(facts[0].embedding.vector, vector.vector);

        assert!(storage.delete_embedding(MemoryKind::Fact, "f1").unwrap());
        assert!(storage.get_embedding(MemoryKind::Fact, "f1").unwrap().is_none());
    }
}
