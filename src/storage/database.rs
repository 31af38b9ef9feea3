//! SQLite chunk store with migrations
//!
//! Holds corpus snapshots, their chunks and chunk embeddings. Retrieval only
//! ever reads from it; writes come from the loader and the index builder.

use crate::error::{CiteseekError, Result};
use crate::storage::models::{BoundingBox, Chunk, ChunkMetadata, Snapshot};
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CiteseekError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| CiteseekError::Config(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool.get()?;

            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        let conn = self.pool.get()?;
        // Pragmas are per connection; the pool may hand out a fresh one.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert or update a snapshot record
    pub fn upsert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO snapshots (id, visibility, owner, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                visibility = excluded.visibility,
                owner = excluded.owner,
                status = excluded.status",
            params![
                snapshot.id,
                snapshot.visibility.as_str(),
                snapshot.owner,
                snapshot.status.as_str(),
                snapshot.created_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT id, visibility, owner, status, created_at FROM snapshots WHERE id = ?1",
                params![id],
                SnapshotRow::from_row,
            )
            .optional()?;

        row.map(SnapshotRow::into_snapshot).transpose()
    }

    pub fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, visibility, owner, status, created_at FROM snapshots ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([], SnapshotRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(SnapshotRow::into_snapshot).collect()
    }

    /// Insert a chunk (and its embedding, when present).
    ///
    /// Chunks are immutable: inserting an id that already exists is a no-op and
    /// returns `false`.
    pub fn insert_chunk(&self, chunk: &Chunk) -> Result<bool> {
        let metadata = serde_json::to_string(&chunk.metadata).map_err(|e| CiteseekError::Json {
            source: e,
            context: format!("Failed to encode metadata for chunk {}", chunk.id),
        })?;
        let bbox = chunk
            .bbox
            .map(|b| serde_json::to_string(&b.to_array()))
            .transpose()
            .map_err(|e| CiteseekError::Json {
                source: e,
                context: format!("Failed to encode bbox for chunk {}", chunk.id),
            })?;

        let conn = self.get_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO chunks
                (id, document_id, snapshot_id, content, page_number, section_title, bbox, category, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                chunk.id,
                chunk.document_id,
                chunk.snapshot_id,
                chunk.content,
                chunk.page_number,
                chunk.section_title,
                bbox,
                chunk.category.as_str(),
                metadata,
            ],
        )?;
        drop(conn);

        if inserted > 0 {
            if let Some(embedding) = &chunk.embedding {
                self.attach_embedding(&chunk.id, embedding, "ingested")?;
            }
        }

        Ok(inserted > 0)
    }

    /// Attach or repair the embedding of an existing chunk
    pub fn attach_embedding(&self, chunk_id: &str, vector: &[f32], model: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO embeddings (chunk_id, vector, dimension, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(chunk_id) DO UPDATE SET
                vector = excluded.vector,
                dimension = excluded.dimension,
                model = excluded.model,
                created_at = excluded.created_at",
            params![
                chunk_id,
                encode_vector(vector),
                vector.len() as i64,
                model,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Fetch chunks by id, without embeddings. Unknown ids are skipped.
    pub fn get_chunks_by_id(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let mut chunks = Vec::with_capacity(ids.len());

        // Stay well under SQLite's bound-parameter limit.
        for batch in ids.chunks(500) {
            let placeholders = (1..=batch.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("{} WHERE c.id IN ({})", CHUNK_SELECT, placeholders);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(batch.iter()), ChunkRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for row in rows {
                chunks.push(row.into_chunk(false)?);
            }
        }

        Ok(chunks)
    }

    /// All chunks of a snapshot with their embeddings, ordered by id
    pub fn chunks_for_snapshot(&self, snapshot_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE c.snapshot_id = ?1 ORDER BY c.id", CHUNK_SELECT);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![snapshot_id], ChunkRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(|row| row.into_chunk(true)).collect()
    }

    /// Delete a document; its chunks and embeddings cascade
    pub fn delete_document(&self, document_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(deleted)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let snapshot_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let embedding_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        let document_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT document_id) FROM chunks",
            [],
            |row| row.get(0),
        )?;

        Ok(DbStats {
            snapshot_count: snapshot_count as usize,
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
            embedding_count: embedding_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub snapshot_count: usize,
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedding_count: usize,
}

const CHUNK_SELECT: &str = "SELECT c.id, c.document_id, c.snapshot_id, c.content, c.page_number,
        c.section_title, c.bbox, c.category, c.metadata, e.vector
    FROM chunks c LEFT JOIN embeddings e ON e.chunk_id = c.id";

struct SnapshotRow {
    id: String,
    visibility: String,
    owner: Option<String>,
    status: String,
    created_at: i64,
}

impl SnapshotRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            visibility: row.get(1)?,
            owner: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_snapshot(self) -> Result<Snapshot> {
        let corrupt = |message: String| CiteseekError::CorruptRecord {
            id: self.id.clone(),
            message,
        };
        let visibility = self.visibility.parse().map_err(corrupt)?;
        let status = self.status.parse().map_err(corrupt)?;
        let created_at =
            chrono::DateTime::from_timestamp(self.created_at, 0).unwrap_or_else(Utc::now);

        Ok(Snapshot {
            id: self.id,
            visibility,
            owner: self.owner,
            status,
            created_at,
        })
    }
}

struct ChunkRow {
    id: String,
    document_id: String,
    snapshot_id: String,
    content: String,
    page_number: Option<u32>,
    section_title: Option<String>,
    bbox: Option<String>,
    category: String,
    metadata: Option<String>,
    vector: Option<Vec<u8>>,
}

impl ChunkRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            snapshot_id: row.get(2)?,
            content: row.get(3)?,
            page_number: row.get(4)?,
            section_title: row.get(5)?,
            bbox: row.get(6)?,
            category: row.get(7)?,
            metadata: row.get(8)?,
            vector: row.get(9)?,
        })
    }

    fn into_chunk(self, with_embedding: bool) -> Result<Chunk> {
        let id = self.id;
        let corrupt = |message: String| CiteseekError::CorruptRecord {
            id: id.clone(),
            message,
        };

        let category = self.category.parse().map_err(corrupt)?;

        let bbox = match self.bbox {
            Some(raw) => {
                let coords: [f32; 4] =
                    serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))?;
                Some(BoundingBox::from(coords))
            }
            None => None,
        };

        let metadata: ChunkMetadata = match self.metadata {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))?,
            None => ChunkMetadata::default(),
        };

        let embedding = match (with_embedding, self.vector) {
            (true, Some(bytes)) => Some(decode_vector(&bytes).map_err(corrupt)?),
            _ => None,
        };

        Ok(Chunk {
            id,
            document_id: self.document_id,
            snapshot_id: self.snapshot_id,
            content: self.content,
            embedding,
            page_number: self.page_number,
            section_title: self.section_title,
            bbox,
            category,
            metadata,
        })
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> std::result::Result<Vec<f32>, String> {
    if bytes.len() % 4 != 0 {
        return Err(format!("embedding blob has {} bytes", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE snapshots (
        id TEXT PRIMARY KEY,
        visibility TEXT NOT NULL,
        owner TEXT,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        snapshot_id TEXT NOT NULL,
        content TEXT NOT NULL,
        page_number INTEGER,
        section_title TEXT,
        bbox TEXT,       -- JSON [x0, y0, x1, y1]
        category TEXT NOT NULL,
        metadata TEXT,   -- JSON metadata
        FOREIGN KEY (snapshot_id) REFERENCES snapshots(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_snapshot ON chunks(snapshot_id);
    CREATE INDEX idx_chunks_document ON chunks(document_id);

    CREATE TABLE embeddings (
        chunk_id TEXT PRIMARY KEY,
        vector BLOB NOT NULL,
        dimension INTEGER NOT NULL,
        model TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
    );
    "#,
];
