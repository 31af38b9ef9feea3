//! Component wiring
//!
//! Owns the store, both search indexes and the service clients, and hands out
//! retrievers configured from one resolved `Config`.

use crate::access::snapshot_allows;
use crate::config::Config;
use crate::embedding::{
    provider_from_config, EmbeddingProvider, IndexReport, KeywordIndex, SnapshotIndexer,
    VectorIndex,
};
use crate::error::Result;
use crate::generation::{generator_from_config, TextGenerator};
use crate::retrieval::{HybridRetriever, QueryRequest, QueryResponse, RetrievalError};
use crate::search::{KeywordSearch, SemanticSearch};
use crate::storage::{ChunkStore, SnapshotManifest, StorageManager};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EMBED_BATCH_SIZE: usize = 32;
const EMBED_MAX_CONCURRENT: usize = 4;

/// Outcome of importing a snapshot manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: usize,
    /// Chunks already present; stored chunks are never overwritten
    pub skipped: usize,
    pub index: IndexReport,
}

pub struct Engine {
    config: Config,
    storage: StorageManager,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Option<Arc<dyn TextGenerator>>,
    vector_index: Arc<VectorIndex>,
    keyword_index: Arc<Mutex<KeywordIndex>>,
    /// Snapshots whose vector graph was built or restored in this process
    restored: Mutex<HashSet<String>>,
}

impl Engine {
    /// Open the data directory and build service clients from `config`
    pub fn open(config: Config, data_dir: PathBuf) -> Result<Self> {
        let embedder = provider_from_config(&config.embedding)?;
        let generator = generator_from_config(&config.generation)?;
        Self::with_providers(config, data_dir, embedder, generator)
    }

    /// Open the data directory with caller-supplied service clients
    pub fn with_providers(
        config: Config,
        data_dir: PathBuf,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Result<Self> {
        let storage = StorageManager::new(data_dir)?;
        let keyword_index = KeywordIndex::new(storage.keyword_index_path())?;
        let vector_index = VectorIndex::from_config(&config.indexing);

        Ok(Self {
            config,
            storage,
            embedder,
            generator,
            vector_index: Arc::new(vector_index),
            keyword_index: Arc::new(Mutex::new(keyword_index)),
            restored: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Import an already-chunked snapshot and index it
    pub async fn load_manifest(&self, manifest: SnapshotManifest) -> Result<LoadReport> {
        let database = &self.storage.database;
        database.upsert_snapshot(&manifest.snapshot)?;

        let mut report = LoadReport::default();
        for mut chunk in manifest.chunks {
            // Chunks belong to the manifest's snapshot whatever they claim
            chunk.snapshot_id = manifest.snapshot.id.clone();
            if database.insert_chunk(&chunk)? {
                report.inserted += 1;
            } else {
                report.skipped += 1;
            }
        }

        report.index = self.index_snapshot(&manifest.snapshot.id).await?;

        info!(
            "Loaded snapshot {}: {} chunks inserted, {} already present",
            manifest.snapshot.id, report.inserted, report.skipped
        );
        Ok(report)
    }

    /// (Re)build the search indexes of one snapshot from the store,
    /// embedding chunks that lack a usable vector
    pub async fn index_snapshot(&self, snapshot_id: &str) -> Result<IndexReport> {
        let indexer = SnapshotIndexer::new(
            Some(Arc::clone(&self.embedder)),
            Arc::clone(&self.vector_index),
            Arc::clone(&self.keyword_index),
            EMBED_BATCH_SIZE,
            EMBED_MAX_CONCURRENT,
        );
        let report = indexer
            .index_snapshot(&self.storage.database, snapshot_id)
            .await?;
        self.restored.lock().await.insert(snapshot_id.to_string());
        Ok(report)
    }

    /// Vector graphs live in memory only. Before the first permitted query
    /// on a snapshot in this process, reload its graph from stored vectors.
    ///
    /// Read-only: nothing is embedded or written, the keyword index (on disk)
    /// is left alone, and each snapshot is attempted once per process even
    /// when it has no usable vectors.
    async fn restore_vectors(&self, request: &QueryRequest, cancel: &CancellationToken) -> Result<()> {
        let scope_id = request.scope_id.as_str();
        let Some(snapshot) = self.storage.database.get_snapshot(scope_id)? else {
            return Ok(());
        };
        if !snapshot.status.is_queryable() || !snapshot_allows(&snapshot, &request.requester) {
            return Ok(());
        }

        // Held across the restore so concurrent first queries wait for one load
        let mut restored = self.restored.lock().await;
        if !restored.insert(scope_id.to_string()) {
            return Ok(());
        }

        let database = Arc::clone(&self.storage.database);
        let vector_index = Arc::clone(&self.vector_index);
        let snapshot_id = scope_id.to_string();
        let load = tokio::task::spawn_blocking(move || -> Result<(usize, usize)> {
            let chunks = database.chunks_for_snapshot(&snapshot_id)?;
            let (mut loaded, mut skipped) = (0, 0);
            for chunk in &chunks {
                let inserted = chunk
                    .embedding
                    .as_deref()
                    .map(|embedding| vector_index.insert(&snapshot_id, &chunk.id, embedding));
                match inserted {
                    Some(Ok(_)) => loaded += 1,
                    Some(Err(e)) => {
                        debug!("Chunk {} not restored: {}", chunk.id, e);
                        skipped += 1;
                    }
                    None => skipped += 1,
                }
            }
            Ok((loaded, skipped))
        });

        let (loaded, skipped) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetrievalError::Cancelled.into()),
            joined = load => joined.map_err(|e| anyhow::anyhow!("Vector restore task failed: {}", e))??,
        };
        drop(restored);

        if skipped > 0 {
            warn!(
                "Snapshot {} has {} chunks without a usable vector; run `citeseek load` to repair",
                scope_id, skipped
            );
        }
        info!("Restored {} vectors for snapshot {}", loaded, scope_id);
        Ok(())
    }

    /// Retriever over this engine's store and indexes
    pub fn retriever(&self) -> HybridRetriever {
        let store: Arc<dyn ChunkStore> = self.storage.database.clone();
        let semantic = SemanticSearch::new(
            Arc::clone(&self.vector_index),
            self.config.indexing.hnsw_ef_search,
        )
        .with_threshold(self.config.retrieval.similarity_threshold);
        let keyword = KeywordSearch::new(Arc::clone(&self.keyword_index));

        let retriever = HybridRetriever::new(
            store,
            Arc::clone(&self.embedder),
            self.config.retrieval.clone(),
        )
        .with_engine(Arc::new(semantic))
        .with_engine(Arc::new(keyword));

        match &self.generator {
            Some(generator) => {
                retriever.with_generator(Arc::clone(generator), self.config.generation.max_tokens)
            }
            None => retriever,
        }
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        self.query_with_cancel(request, CancellationToken::new())
            .await
    }

    pub async fn query_with_cancel(
        &self,
        request: &QueryRequest,
        cancel: CancellationToken,
    ) -> Result<QueryResponse> {
        self.restore_vectors(request, &cancel).await?;
        Ok(self
            .retriever()
            .retrieve_with_cancel(request, cancel)
            .await?)
    }
}
