use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::codec::{decode_vector, encode_vector};
use super::error::{IndexError, MemoryError, Result, StorageError};
use super::schema;

/// Upper bound on pooled SQLite connections.
const POOL_MAX_SIZE: u32 = 8;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An archived document under analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viability {
    pub id: i64,
    pub title: String,
    pub client_name: String,
    pub viability_type: String,
    /// UTC, as written by SQLite's `CURRENT_TIMESTAMP`.
    pub upload_date: NaiveDateTime,
    pub processed: bool,
    pub file_path: String,
    pub summary: Option<String>,
    pub llm_feedback: Option<String>,
    pub overall_score: Option<f64>,
}

/// Fields supplied when a viability is first archived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewViability {
    pub title: String,
    pub client_name: String,
    pub viability_type: String,
    pub file_path: String,
}

/// Partial update written by the analysis step. `None` leaves a column as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViabilityUpdate {
    pub processed: Option<bool>,
    pub summary: Option<String>,
    pub llm_feedback: Option<String>,
    pub overall_score: Option<f64>,
}

impl ViabilityUpdate {
    pub fn is_empty(&self) -> bool {
        self.processed.is_none()
            && self.summary.is_none()
            && self.llm_feedback.is_none()
            && self.overall_score.is_none()
    }
}

/// A persisted chunk together with its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: i64,
    pub viability_id: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// One turn of a conversation about a viability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogEntry {
    pub id: i64,
    pub viability_id: Option<i64>,
    pub role: String,
    pub message: String,
    pub timestamp: NaiveDateTime,
}

// ---------------------------------------------------------------------------
// ViabilityStore
// ---------------------------------------------------------------------------

/// SQLite-backed store for viabilities, their chunks and chat logs.
///
/// Connections come from an `r2d2` pool, so the store is cheaply cloneable
/// and safe to share across tasks. Each write that spans several rows runs in
/// a single `IMMEDIATE` transaction; WAL mode lets readers keep seeing the
/// last committed state while it is open.
#[derive(Clone)]
pub struct ViabilityStore {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl std::fmt::Debug for ViabilityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViabilityStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ViabilityStore {
    /// Open (or create) the database file at `path` and apply migrations.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path).with_init(|c| schema::configure_connection(c));
        let pool = Pool::builder().max_size(POOL_MAX_SIZE).build(manager)?;

        {
            let conn = pool.get()?;
            schema::run_migrations(&conn)?;
        }

        info!(db = %path.display(), "viability store ready");

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Location of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // -- viabilities --------------------------------------------------------

    /// Insert a new viability row and return its freshly assigned id.
    pub fn create_viability(&self, new: &NewViability) -> Result<i64> {
        let conn = self.pool.get()?;
        let id = insert_viability(&conn, new)?;
        debug!(viability_id = id, "viability created");
        Ok(id)
    }

    /// Insert a viability and all of its chunks atomically.
    ///
    /// Either every row becomes visible at once or, on failure, none does.
    /// Vectors must match each other and the dimension already stored.
    pub fn insert_viability_with_chunks(
        &self,
        new: &NewViability,
        chunks: &[(String, Vec<f32>)],
    ) -> Result<i64> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        check_dimensions(&tx, chunks.iter().map(|(_, v)| v.len()))?;
        let id = insert_viability(&tx, new)?;
        for (text, vector) in chunks {
            insert_chunk(&tx, id, text, vector)?;
        }

        tx.commit()?;
        debug!(viability_id = id, chunks = chunks.len(), "viability and chunks committed");
        Ok(id)
    }

    pub fn get_viability(&self, id: i64) -> Result<Viability> {
        let conn = self.pool.get()?;
        conn.query_row(
            &format!("{VIABILITY_SELECT} WHERE id = ?1"),
            [id],
            viability_from_row,
        )
        .optional()?
        .ok_or(MemoryError::NotFound { viability_id: id })
    }

    /// All viabilities, oldest first.
    pub fn list_viabilities(&self) -> Result<Vec<Viability>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("{VIABILITY_SELECT} ORDER BY id"))?;
        let rows = stmt
            .query_map([], viability_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Apply a partial update. Fails with `NotFound` for an unknown id.
    pub fn update_viability(&self, id: i64, update: &ViabilityUpdate) -> Result<()> {
        let conn = self.pool.get()?;

        if update.is_empty() {
            return if viability_exists(&conn, id)? {
                Ok(())
            } else {
                Err(MemoryError::NotFound { viability_id: id })
            };
        }

        let changed = conn.execute(
            "UPDATE viabilities SET
                processed     = COALESCE(?2, processed),
                summary       = COALESCE(?3, summary),
                llm_feedback  = COALESCE(?4, llm_feedback),
                overall_score = COALESCE(?5, overall_score)
             WHERE id = ?1",
            params![
                id,
                update.processed,
                update.summary,
                update.llm_feedback,
                update.overall_score
            ],
        )?;

        if changed == 0 {
            return Err(MemoryError::NotFound { viability_id: id });
        }
        debug!(viability_id = id, "viability updated");
        Ok(())
    }

    /// Delete a viability. Its chunks and chat logs go with it.
    pub fn delete_viability(&self, id: i64) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute("DELETE FROM viabilities WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(MemoryError::NotFound { viability_id: id });
        }
        info!(viability_id = id, "viability deleted");
        Ok(())
    }

    // -- chunks -------------------------------------------------------------

    /// Append a single chunk and its vector to an existing viability.
    pub fn add_chunk(&self, viability_id: i64, text: &str, vector: &[f32]) -> Result<i64> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !viability_exists(&tx, viability_id)? {
            return Err(MemoryError::Referential { viability_id });
        }
        check_dimensions(&tx, std::iter::once(vector.len()))?;
        let id = insert_chunk(&tx, viability_id, text, vector)?;

        tx.commit()?;
        Ok(id)
    }

    /// Every persisted chunk with its decoded vector, in insertion order.
    ///
    /// Runs as a single statement, so the result reflects one committed
    /// snapshot of the table.
    pub fn list_all_chunks_with_vectors(&self) -> Result<Vec<ChunkRecord>> {
        let conn = self.pool.get()?;
        query_chunks(
            &conn,
            "SELECT id, viability_id, chunk_text, embedding FROM embeddings ORDER BY id",
            rusqlite::params![],
        )
    }

    /// Chunks of one viability in storage order. Concatenated, their text is
    /// the document text that was ingested.
    pub fn chunks_for_viability(&self, viability_id: i64) -> Result<Vec<ChunkRecord>> {
        let conn = self.pool.get()?;
        query_chunks(
            &conn,
            "SELECT id, viability_id, chunk_text, embedding FROM embeddings
             WHERE viability_id = ?1 ORDER BY id",
            [viability_id],
        )
    }

    /// Dimension of the vectors in the store, or `None` while it is empty.
    pub fn stored_dimensions(&self) -> Result<Option<usize>> {
        let conn = self.pool.get()?;
        stored_dimensions(&conn)
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // -- chat logs ----------------------------------------------------------

    pub fn append_chat_log(
        &self,
        viability_id: Option<i64>,
        role: &str,
        message: &str,
    ) -> Result<i64> {
        let conn = self.pool.get()?;
        if let Some(vid) = viability_id {
            if !viability_exists(&conn, vid)? {
                return Err(MemoryError::Referential { viability_id: vid });
            }
        }
        conn.execute(
            "INSERT INTO chat_logs (viability_id, role, message) VALUES (?1, ?2, ?3)",
            params![viability_id, role, message],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn chat_logs_for(&self, viability_id: i64) -> Result<Vec<ChatLogEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, viability_id, role, message, timestamp FROM chat_logs
             WHERE viability_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([viability_id], |row| {
                Ok(ChatLogEntry {
                    id: row.get(0)?,
                    viability_id: row.get(1)?,
                    role: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    message: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    timestamp: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

const VIABILITY_SELECT: &str = "SELECT id, title, client_name, viability_type, upload_date, \
     processed, file_path, summary, llm_feedback, overall_score FROM viabilities";

fn viability_from_row(row: &Row<'_>) -> rusqlite::Result<Viability> {
    Ok(Viability {
        id: row.get(0)?,
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        client_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        viability_type: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        upload_date: row.get(4)?,
        processed: row.get::<_, Option<bool>>(5)?.unwrap_or(false),
        file_path: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        summary: row.get(7)?,
        llm_feedback: row.get(8)?,
        overall_score: row.get(9)?,
    })
}

fn insert_viability(conn: &Connection, new: &NewViability) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO viabilities (title, client_name, viability_type, file_path)
         VALUES (?1, ?2, ?3, ?4)",
        params![new.title, new.client_name, new.viability_type, new.file_path],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_chunk(
    conn: &Connection,
    viability_id: i64,
    text: &str,
    vector: &[f32],
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO embeddings (viability_id, chunk_text, embedding) VALUES (?1, ?2, ?3)",
        params![viability_id, text, encode_vector(vector)],
    )?;
    Ok(conn.last_insert_rowid())
}

fn stored_dimensions(conn: &Connection) -> Result<Option<usize>> {
    let first = conn
        .query_row(
            "SELECT id, embedding FROM embeddings ORDER BY id LIMIT 1",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
        )
        .optional()?;

    match first {
        Some((id, blob)) => Ok(Some(decode_vector(id, &blob)?.len())),
        None => Ok(None),
    }
}

/// Reject vectors whose length differs from the stored dimension, or from
/// the first of `lengths` when the store is empty.
fn check_dimensions(conn: &Connection, lengths: impl IntoIterator<Item = usize>) -> Result<()> {
    let mut lengths = lengths.into_iter().peekable();
    let Some(&first) = lengths.peek() else {
        return Ok(());
    };
    let expected = stored_dimensions(conn)?.unwrap_or(first);

    match lengths.find(|&actual| actual != expected) {
        Some(actual) => Err(IndexError::DimensionMismatch { expected, actual }.into()),
        None => Ok(()),
    }
}

fn viability_exists(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM viabilities WHERE id = ?1", [id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
}

fn query_chunks<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ChunkRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    raw.into_iter()
        .map(|(id, viability_id, text, blob)| -> Result<ChunkRecord> {
            Ok(ChunkRecord {
                id,
                viability_id,
                text,
                embedding: decode_vector(id, &blob)?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
