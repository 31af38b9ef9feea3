/// Snapshot index builder
///
/// Loads a snapshot's chunks from the store, repairs missing embeddings and
/// feeds both search indexes.
use super::{EmbeddingError, EmbeddingProvider, KeywordIndex, VectorIndex};
use crate::storage::{Chunk, Database};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Counts reported after indexing one snapshot
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub chunks: usize,
    /// Embeddings generated for chunks that arrived without a usable one
    pub repaired: usize,
    pub vector_indexed: usize,
    pub keyword_indexed: usize,
    /// Chunks that could not be made searchable by vector
    pub failed: usize,
    pub duration_ms: u64,
}

/// Builds the per-snapshot vector and keyword indexes
///
/// Embedding repair runs in batches of `batch_size`, at most `max_concurrent`
/// batches in flight. Without a provider, chunks lacking an embedding stay
/// keyword-only.
pub struct SnapshotIndexer {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_index: Arc<VectorIndex>,
    keyword_index: Arc<Mutex<KeywordIndex>>,
    batch_size: usize,
    max_concurrent: usize,
}

impl SnapshotIndexer {
    pub fn new(
        provider: Option<Arc<dyn EmbeddingProvider>>,
        vector_index: Arc<VectorIndex>,
        keyword_index: Arc<Mutex<KeywordIndex>>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            vector_index,
            keyword_index,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Index every chunk of `snapshot_id`
    pub async fn index_snapshot(&self, database: &Database, snapshot_id: &str) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let mut chunks = database.chunks_for_snapshot(snapshot_id)?;

        info!(
            "Indexing snapshot {} ({} chunks)",
            snapshot_id,
            chunks.len()
        );

        let mut report = IndexReport {
            chunks: chunks.len(),
            ..Default::default()
        };

        report.repaired = self.repair_embeddings(database, &mut chunks).await?;

        for chunk in &chunks {
            let Some(embedding) = &chunk.embedding else {
                report.failed += 1;
                continue;
            };
            match self.vector_index.insert(snapshot_id, &chunk.id, embedding) {
                Ok(_) => report.vector_indexed += 1,
                Err(e) => {
                    warn!("Chunk {} not vector-indexed: {}", chunk.id, e);
                    report.failed += 1;
                }
            }
        }

        {
            let mut keyword_index = self.keyword_index.lock().await;
            for chunk in &chunks {
                keyword_index.insert(snapshot_id, &chunk.id, &chunk.content)?;
                report.keyword_indexed += 1;
            }
            keyword_index.commit()?;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Indexed snapshot {}: {} vectors, {} keyword docs, {} repaired, {} failed, {}ms",
            snapshot_id,
            report.vector_indexed,
            report.keyword_indexed,
            report.repaired,
            report.failed,
            report.duration_ms
        );

        Ok(report)
    }

    /// Embed chunks whose stored vector is missing or has the wrong dimension
    async fn repair_embeddings(&self, database: &Database, chunks: &mut [Chunk]) -> Result<usize> {
        let dimension = self.vector_index.dimension();
        let needs_repair: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.embedding.as_ref().map_or(true, |e| e.len() != dimension))
            .map(|(i, _)| i)
            .collect();

        if needs_repair.is_empty() {
            return Ok(0);
        }

        let Some(provider) = &self.provider else {
            warn!(
                "{} chunks lack a usable embedding and no provider is configured",
                needs_repair.len()
            );
            for &i in &needs_repair {
                chunks[i].embedding = None;
            }
            return Ok(0);
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for batch in needs_repair.chunks(self.batch_size) {
            let positions = batch.to_vec();
            let texts: Vec<String> = positions
                .iter()
                .map(|&i| chunks[i].content.clone())
                .collect();
            let provider = Arc::clone(provider);
            let permit = Arc::clone(&semaphore).acquire_owned().await?;

            tasks.spawn(async move {
                let result = provider.embed_batch(&texts).await;
                drop(permit);
                (positions, result)
            });
        }

        let mut repaired = 0;
        while let Some(joined) = tasks.join_next().await {
            let (positions, result): (Vec<usize>, Result<Vec<Vec<f32>>, EmbeddingError>) = joined?;
            match result {
                Ok(vectors) => {
                    for (i, vector) in positions.into_iter().zip(vectors) {
                        database.attach_embedding(&chunks[i].id, &vector, provider.model_name())?;
                        chunks[i].embedding = Some(vector);
                        repaired += 1;
                    }
                }
                Err(e) => {
                    warn!("Embedding batch of {} chunks failed: {}", positions.len(), e);
                    for i in positions {
                        chunks[i].embedding = None;
                    }
                }
            }
        }

        debug!("Repaired {} embeddings", repaired);
        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChunkMetadata, ElementCategory, Snapshot, Visibility};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.1; 4];
            v[text.len() % 4] = 1.0;
            Ok(v)
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "axis"
        }
    }

    fn chunk(id: &str, content: &str, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: "doc".to_string(),
            snapshot_id: "s1".to_string(),
            content: content.to_string(),
            embedding,
            page_number: Some(1),
            section_title: None,
            bbox: None,
            category: ElementCategory::NarrativeText,
            metadata: ChunkMetadata::default(),
        }
    }

    fn seeded_db(temp: &TempDir) -> Database {
        let db = Database::new(&temp.path().join("db.sqlite")).unwrap();
        db.upsert_snapshot(&Snapshot::new("s1", Visibility::Public, None))
            .unwrap();
        db.insert_chunk(&chunk("a", "anchor bolts", Some(vec![1.0, 0.0, 0.0, 0.0])))
            .unwrap();
        db.insert_chunk(&chunk("b", "foundation depth", None)).unwrap();
        db.insert_chunk(&chunk("c", "wrong size", Some(vec![1.0, 0.0])))
            .unwrap();
        db
    }

    fn indexes() -> (Arc<VectorIndex>, Arc<Mutex<KeywordIndex>>) {
        (
            Arc::new(VectorIndex::new(4, 50, 8)),
            Arc::new(Mutex::new(KeywordIndex::in_memory().unwrap())),
        )
    }

    #[tokio::test]
    async fn test_repairs_missing_embeddings() {
        let temp = TempDir::new().unwrap();
        let db = seeded_db(&temp);
        let (vectors, keywords) = indexes();

        let indexer = SnapshotIndexer::new(
            Some(Arc::new(AxisEmbedder)),
            Arc::clone(&vectors),
            Arc::clone(&keywords),
            1,
            2,
        );
        let report = indexer.index_snapshot(&db, "s1").await.unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(report.repaired, 2);
        assert_eq!(report.vector_indexed, 3);
        assert_eq!(report.keyword_indexed, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(vectors.len_for("s1"), 3);

        let stored = db.chunks_for_snapshot("s1").unwrap();
        assert!(stored.iter().all(|c| c.embedding.as_ref().map(Vec::len) == Some(4)));

        let hits = keywords.lock().await.search("s1", "foundation", 5).unwrap();
        assert_eq!(hits[0].chunk_id, "b");
    }

    #[tokio::test]
    async fn test_without_provider_chunks_stay_keyword_only() {
        let temp = TempDir::new().unwrap();
        let db = seeded_db(&temp);
        let (vectors, keywords) = indexes();

        let indexer = SnapshotIndexer::new(None, Arc::clone(&vectors), keywords, 8, 1);
        let report = indexer.index_snapshot(&db, "s1").await.unwrap();

        assert_eq!(report.vector_indexed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.keyword_indexed, 3);
    }
}
