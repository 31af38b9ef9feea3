//! Storage layer for citeseek
//!
//! Provides the snapshot/chunk store consumed by retrieval and the on-disk
//! layout shared with the keyword index.

pub mod database;
pub mod models;

use crate::error::{CiteseekError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use database::{Database, DbPool, DbStats};
pub use models::{
    BoundingBox, Chunk, ChunkMetadata, ElementCategory, Snapshot, SnapshotManifest,
    SnapshotStatus, Visibility,
};

/// Read-only view of the corpus used by retrieval
///
/// Implementations must never mutate chunks; a retrieval call only reads.
pub trait ChunkStore: Send + Sync {
    /// Look up a snapshot by id
    fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>>;

    /// Hydrate chunks after scoring. Unknown ids are omitted from the output.
    fn get_chunks_by_id(&self, ids: &[String]) -> Result<Vec<Chunk>>;
}

impl ChunkStore for Database {
    fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        Database::get_snapshot(self, id)
    }

    fn get_chunks_by_id(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        Database::get_chunks_by_id(self, ids)
    }
}

/// Storage manager owning the data directory layout
pub struct StorageManager {
    pub database: Arc<Database>,
    base_path: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager rooted at `base_path`
    pub fn new(base_path: PathBuf) -> Result<Self> {
        let store = base_path.join("store");

        for dir in [store.clone(), store.join("keywords")] {
            std::fs::create_dir_all(&dir).map_err(|e| CiteseekError::Io {
                source: e,
                context: format!("Failed to create directory: {}", dir.display()),
            })?;
        }

        let database = Arc::new(Database::new(&store.join("db.sqlite"))?);

        Ok(Self {
            database,
            base_path,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory of the tantivy keyword index
    pub fn keyword_index_path(&self) -> PathBuf {
        self.base_path.join("store").join("keywords")
    }
}
