//! Chunk and file catalog backed by SQLite
//!
//! Every connection in the pool runs in WAL mode so readers never block on
//! the single writer, and a crash mid-write leaves previously committed rows
//! intact. Blocking SQLite calls are moved off the async executor with
//! `spawn_blocking`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{debug, info};

use crate::clock::AccessClock;
use crate::errors::{IndexError, Result};
use crate::schema::{CONNECTION_PRAGMAS, SCHEMA, SCHEMA_VERSION};

const CHUNK_COLUMNS: &str =
    "hash, size, file_key, chunk_index, created_at, last_accessed, access_count";
const FILE_COLUMNS: &str = "file_key, merkle_root, total_size, chunk_count, created_at, metadata";

/// A chunk row. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub hash: String,
    pub size: u64,
    pub file_key: String,
    pub chunk_index: u32,
    pub created_at: i64,
    pub last_accessed: i64,
    pub access_count: u64,
}

/// Fields supplied when storing a chunk
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub hash: String,
    pub size: u64,
    pub file_key: String,
    pub chunk_index: u32,
}

/// A file manifest row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_key: String,
    pub merkle_root: String,
    pub total_size: u64,
    pub chunk_count: u32,
    pub created_at: i64,
    pub metadata: Option<serde_json::Value>,
}

/// Fields supplied when registering a file
#[derive(Debug, Clone)]
pub struct NewFile {
    pub file_key: String,
    pub merkle_root: String,
    pub total_size: u64,
    pub chunk_count: u32,
    pub metadata: Option<serde_json::Value>,
}

/// Durable catalog of chunks and file manifests.
///
/// Cloning is cheap and shares the underlying pool.
#[derive(Clone)]
pub struct MetadataIndex {
    pool: Pool<SqliteConnectionManager>,
    clock: Arc<AccessClock>,
    path: PathBuf,
}

impl MetadataIndex {
    /// Open or create the catalog at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        task::spawn_blocking(move || Self::open_blocking(path))
            .await
            .map_err(|e| IndexError::Task(e.to_string()))?
    }

    fn open_blocking(path: PathBuf) -> Result<Self> {
        let manager = SqliteConnectionManager::file(&path)
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));

        let pool = Pool::builder()
            .max_size(8)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)?;

        let conn = pool.get()?;
        initialize(&conn)?;
        let latest = latest_timestamp(&conn)?;
        drop(conn);

        info!("Metadata index opened at {:?}", path);
        Ok(Self {
            pool,
            clock: Arc::new(AccessClock::starting_after(latest)),
            path,
        })
    }

    /// Path of the catalog file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn execute_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.pool.clone();

        task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&*conn)
        })
        .await
        .map_err(|e| IndexError::Task(e.to_string()))?
    }

    async fn execute_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.pool.clone();

        task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            // Take the write lock up front; a deferred read-then-write would
            // fail with SQLITE_BUSY_SNAPSHOT if a reader committed in between
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(|e| IndexError::Task(e.to_string()))?
    }

    /// Insert a chunk row, or update its placement if the hash is already
    /// indexed. Access tracking and `created_at` are never changed here.
    ///
    /// Returns `true` when a new row was inserted.
    pub async fn upsert_chunk(&self, chunk: NewChunk) -> Result<bool> {
        let now = self.clock.now_millis();
        self.execute_transaction(move |tx| {
            let existed = tx
                .query_row(
                    "SELECT 1 FROM chunks WHERE hash = ?1",
                    params![chunk.hash],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            tx.execute(
                r#"
                INSERT INTO chunks (hash, size, file_key, chunk_index, created_at, last_accessed, access_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)
                ON CONFLICT(hash) DO UPDATE SET
                    size = excluded.size,
                    file_key = excluded.file_key,
                    chunk_index = excluded.chunk_index
                "#,
                params![
                    chunk.hash,
                    chunk.size as i64,
                    chunk.file_key,
                    chunk.chunk_index,
                    now,
                ],
            )?;

            debug!(hash = %chunk.hash, existed, "Upserted chunk row");
            Ok(!existed)
        })
        .await
    }

    /// Get a chunk row by hash
    pub async fn get_chunk(&self, hash: &str) -> Result<Option<ChunkRecord>> {
        let hash = hash.to_string();
        self.execute_blocking(move |conn| {
            let sql = format!("SELECT {} FROM chunks WHERE hash = ?1", CHUNK_COLUMNS);
            Ok(conn
                .query_row(&sql, params![hash], chunk_from_row)
                .optional()?)
        })
        .await
    }

    /// Record a read: bump `access_count` and move `last_accessed` to now.
    /// Returns `false` if no row exists.
    pub async fn touch_chunk(&self, hash: &str) -> Result<bool> {
        let hash = hash.to_string();
        let now = self.clock.now_millis();
        self.execute_blocking(move |conn| {
            let updated = conn.execute(
                "UPDATE chunks SET last_accessed = ?2, access_count = access_count + 1 WHERE hash = ?1",
                params![hash, now],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    /// Put back a previously read row exactly as it was. Used to undo a row
    /// deletion when removing the chunk file afterwards fails.
    pub async fn restore_chunk(&self, record: ChunkRecord) -> Result<()> {
        self.execute_blocking(move |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO chunks (hash, size, file_key, chunk_index, created_at, last_accessed, access_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    record.hash,
                    record.size as i64,
                    record.file_key,
                    record.chunk_index,
                    record.created_at,
                    record.last_accessed,
                    record.access_count as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Delete a chunk row. Returns whether a row was removed.
    pub async fn delete_chunk_row(&self, hash: &str) -> Result<bool> {
        let hash = hash.to_string();
        self.execute_blocking(move |conn| {
            let deleted = conn.execute("DELETE FROM chunks WHERE hash = ?1", params![hash])?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Delete every chunk row owned by `file_key`, returning the count
    pub async fn delete_chunks_by_file_key(&self, file_key: &str) -> Result<usize> {
        let file_key = file_key.to_string();
        self.execute_blocking(move |conn| {
            Ok(conn.execute("DELETE FROM chunks WHERE file_key = ?1", params![file_key])?)
        })
        .await
    }

    /// Chunk rows for a file in `chunk_index` order
    pub async fn chunks_for_file(&self, file_key: &str) -> Result<Vec<ChunkRecord>> {
        let file_key = file_key.to_string();
        self.execute_blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM chunks WHERE file_key = ?1 ORDER BY chunk_index ASC",
                CHUNK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![file_key], chunk_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Up to `limit` chunk rows, least recently accessed first
    pub async fn lru_candidates(&self, limit: usize) -> Result<Vec<ChunkRecord>> {
        self.execute_blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM chunks ORDER BY last_accessed ASC, rowid ASC LIMIT ?1",
                CHUNK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![limit as i64], chunk_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Every indexed `(hash, size)` pair
    pub async fn all_chunk_hashes(&self) -> Result<Vec<(String, u64)>> {
        self.execute_blocking(|conn| {
            let mut stmt = conn.prepare("SELECT hash, size FROM chunks")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Sum of all chunk sizes in bytes
    pub async fn total_size(&self) -> Result<u64> {
        self.execute_blocking(|conn| {
            let total: i64 =
                conn.query_row("SELECT COALESCE(SUM(size), 0) FROM chunks", [], |row| {
                    row.get(0)
                })?;
            Ok(total as u64)
        })
        .await
    }

    /// Number of chunk rows
    pub async fn chunk_count(&self) -> Result<u64> {
        self.execute_blocking(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    /// Number of file rows
    pub async fn file_count(&self) -> Result<u64> {
        self.execute_blocking(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    /// Insert or update a file manifest. The original `created_at` survives
    /// re-registration.
    pub async fn upsert_file(&self, file: NewFile) -> Result<()> {
        let now = self.clock.now_millis();
        let metadata = file
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.execute_transaction(move |tx| {
            tx.execute(
                r#"
                INSERT INTO files (file_key, merkle_root, total_size, chunk_count, created_at, metadata)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(file_key) DO UPDATE SET
                    merkle_root = excluded.merkle_root,
                    total_size = excluded.total_size,
                    chunk_count = excluded.chunk_count,
                    metadata = excluded.metadata
                "#,
                params![
                    file.file_key,
                    file.merkle_root,
                    file.total_size as i64,
                    file.chunk_count,
                    now,
                    metadata,
                ],
            )?;
            debug!(file_key = %file.file_key, "Upserted file row");
            Ok(())
        })
        .await
    }

    /// Get a file manifest by key
    pub async fn get_file(&self, file_key: &str) -> Result<Option<FileRecord>> {
        let file_key = file_key.to_string();
        self.execute_blocking(move |conn| {
            let sql = format!("SELECT {} FROM files WHERE file_key = ?1", FILE_COLUMNS);
            Ok(conn
                .query_row(&sql, params![file_key], file_from_row)
                .optional()?)
        })
        .await
    }

    /// All file manifests, newest first
    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        self.execute_blocking(|conn| {
            let sql = format!(
                "SELECT {} FROM files ORDER BY created_at DESC, rowid DESC",
                FILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], file_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Delete a file manifest row. Chunk rows are left alone.
    pub async fn delete_file_row(&self, file_key: &str) -> Result<bool> {
        let file_key = file_key.to_string();
        self.execute_blocking(move |conn| {
            let deleted = conn.execute("DELETE FROM files WHERE file_key = ?1", params![file_key])?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Fold the WAL back into the main database file
    pub async fn checkpoint(&self) -> Result<()> {
        self.execute_blocking(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }
}

/// Create tables on a fresh catalog and reject a catalog written by a
/// different schema version.
/// Newest timestamp stored in either table, or 0 for an empty catalog
fn latest_timestamp(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        r#"
        SELECT MAX(
            (SELECT COALESCE(MAX(MAX(created_at, last_accessed)), 0) FROM chunks),
            (SELECT COALESCE(MAX(created_at), 0) FROM files)
        )
        "#,
        [],
        |row| row.get(0),
    )?)
}

fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let version: Option<u32> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match version {
        None => {
            info!("Initializing new catalog schema");
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Some(v) if v != SCHEMA_VERSION => {
            return Err(IndexError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                actual: v,
            });
        }
        Some(_) => {
            debug!("Catalog schema up to date (version {})", SCHEMA_VERSION);
        }
    }

    Ok(())
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        hash: row.get(0)?,
        size: row.get::<_, i64>(1)? as u64,
        file_key: row.get(2)?,
        chunk_index: row.get(3)?,
        created_at: row.get(4)?,
        last_accessed: row.get(5)?,
        access_count: row.get::<_, i64>(6)? as u64,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let metadata = row
        .get::<_, Option<String>>(5)?
        .map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    Ok(FileRecord {
        file_key: row.get(0)?,
        merkle_root: row.get(1)?,
        total_size: row.get::<_, i64>(2)? as u64,
        chunk_count: row.get(3)?,
        created_at: row.get(4)?,
        metadata,
    })
}
