use async_trait::async_trait;
use agentx_traits::{BackendError, MemoryBackend};
use agentx_types::{InteractionType, MemoryEntry, MemoryId, ScoredEntry};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use super::rank_by_similarity;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memory_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    interaction_type TEXT NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    metadata TEXT NOT NULL,
    created_at_us INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memory_entries_created
    ON memory_entries(created_at_us, seq);
CREATE INDEX IF NOT EXISTS idx_memory_entries_type
    ON memory_entries(interaction_type, created_at_us);
";

const COLUMNS: &str = "id, interaction_type, content, embedding, metadata, created_at_us";

/// SQLite-backed memory; embeddings are stored as little-endian f32 blobs.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            BackendError::new(format!(
                "Failed to open memory database {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, BackendError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_entries(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<MemoryEntry>, BackendError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params, RawRow::from_row)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        rows.into_iter().map(RawRow::decode).collect()
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl MemoryBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&mut self, entry: MemoryEntry) -> Result<(), BackendError> {
        let content = serde_json::to_string(&entry.content).map_err(json_err)?;
        let metadata = serde_json::to_string(&entry.metadata).map_err(json_err)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO memory_entries
                (id, interaction_type, content, embedding, metadata, created_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.interaction_type.as_str(),
                content,
                serialize_f32_vec(&entry.embedding),
                metadata,
                entry.created_at.timestamp_micros(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn remove(&mut self, id: &str) -> Result<Option<MemoryEntry>, BackendError> {
        let existing = self.get(id).await?;
        if existing.is_some() {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM memory_entries WHERE id = ?1", [id])
                .map_err(db_err)?;
        }
        Ok(existing)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, BackendError> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {} FROM memory_entries WHERE id = ?1", COLUMNS),
                [id],
                RawRow::from_row,
            )
            .optional()
            .map_err(db_err)?
        };
        raw.map(RawRow::decode).transpose()
    }

    async fn len(&self) -> Result<usize, BackendError> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_entries", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count as usize)
    }

    async fn oldest(&self) -> Result<Option<MemoryEntry>, BackendError> {
        let sql = format!(
            "SELECT {} FROM memory_entries ORDER BY created_at_us ASC, seq ASC LIMIT 1",
            COLUMNS
        );
        Ok(self.query_entries(&sql, &[])?.into_iter().next())
    }

    async fn recent(
        &self,
        limit: usize,
        interaction_type: Option<&InteractionType>,
    ) -> Result<Vec<MemoryEntry>, BackendError> {
        let limit = limit as i64;
        match interaction_type {
            Some(kind) => {
                let sql = format!(
                    "SELECT {} FROM memory_entries WHERE interaction_type = ?1
                     ORDER BY created_at_us DESC, seq DESC LIMIT ?2",
                    COLUMNS
                );
                self.query_entries(&sql, &[&kind.as_str(), &limit])
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM memory_entries ORDER BY created_at_us DESC, seq DESC LIMIT ?1",
                    COLUMNS
                );
                self.query_entries(&sql, &[&limit])
            }
        }
    }

    async fn nearest(
        &self,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, BackendError> {
        // brute-force scan; memory is bounded so this stays small
        let sql = format!("SELECT {} FROM memory_entries ORDER BY seq ASC", COLUMNS);
        let entries = self.query_entries(&sql, &[])?;
        Ok(rank_by_similarity(entries.iter(), query, threshold, limit))
    }

    async fn remove_older_than(
        &mut self,
        interaction_type: &InteractionType,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MemoryId>, BackendError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let ids = {
            let mut stmt = tx
                .prepare(
                    "SELECT id FROM memory_entries
                     WHERE interaction_type = ?1 AND created_at_us < ?2
                     ORDER BY seq ASC",
                )
                .map_err(db_err)?;
            let ids = stmt
                .query_map(
                    params![interaction_type.as_str(), cutoff.timestamp_micros()],
                    |row| row.get::<_, String>(0),
                )
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            ids
        };
        tx.execute(
            "DELETE FROM memory_entries WHERE interaction_type = ?1 AND created_at_us < ?2",
            params![interaction_type.as_str(), cutoff.timestamp_micros()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(ids)
    }
}

/// Columns as stored, decoded after the statement is released.
struct RawRow {
    id: String,
    interaction_type: String,
    content: String,
    embedding: Vec<u8>,
    metadata: String,
    created_at_us: i64,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            interaction_type: row.get(1)?,
            content: row.get(2)?,
            embedding: row.get(3)?,
            metadata: row.get(4)?,
            created_at_us: row.get(5)?,
        })
    }

    fn decode(self) -> Result<MemoryEntry, BackendError> {
        let content = serde_json::from_str(&self.content).map_err(json_err)?;
        let metadata: HashMap<String, String> =
            serde_json::from_str(&self.metadata).map_err(json_err)?;
        let created_at = DateTime::<Utc>::from_timestamp_micros(self.created_at_us)
            .ok_or_else(|| {
                BackendError::new(format!("invalid timestamp {} for {}", self.created_at_us, self.id))
            })?;

        Ok(MemoryEntry {
            id: self.id,
            interaction_type: InteractionType::from(self.interaction_type),
            content,
            embedding: deserialize_f32_vec(&self.embedding),
            metadata,
            created_at,
        })
    }
}

fn db_err(e: rusqlite::Error) -> BackendError {
    BackendError::new(format!("sqlite: {}", e))
}

fn json_err(e: serde_json::Error) -> BackendError {
    BackendError::new(format!("json: {}", e))
}

fn serialize_f32_vec(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|&f| f.to_le_bytes()).collect()
}

fn deserialize_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
