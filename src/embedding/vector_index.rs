/// HNSW vector index for similarity search
use hnsw_rs::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

use crate::config::IndexingConfig;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Index lock poisoned")]
    LockPoisoned,
}

/// Nearest-neighbour match with cosine similarity
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub chunk_id: String,
    /// Cosine similarity in [-1, 1], higher is more similar
    pub score: f32,
}

/// One HNSW graph per snapshot
struct ScopeGraph {
    hnsw: Hnsw<'static, f32, DistCosine>,
    /// Internal HNSW id -> chunk id
    chunk_ids: Vec<String>,
    known: HashSet<String>,
}

/// Scoped HNSW vector index
///
/// Every snapshot gets its own graph, so the snapshot filter is an exact
/// match by construction and the traversal never evaluates any other
/// predicate. Similarity thresholds are not accepted here at all: callers
/// that want one apply it to the returned candidates.
pub struct VectorIndex {
    graphs: RwLock<HashMap<String, ScopeGraph>>,
    dimension: usize,
    m: usize,
    ef_construction: usize,
    max_elements: usize,
}

impl VectorIndex {
    /// Create a new vector index
    ///
    /// # Arguments
    /// * `dimension` - Vector dimension (must match embedding dimension)
    /// * `ef_construction` - HNSW construction parameter (higher = better recall, slower build)
    /// * `m` - HNSW M parameter (number of connections per layer)
    pub fn new(dimension: usize, ef_construction: usize, m: usize) -> Self {
        Self {
            graphs: RwLock::new(HashMap::new()),
            dimension,
            m,
            ef_construction,
            max_elements: 10_000,
        }
    }

    pub fn from_config(cfg: &IndexingConfig) -> Self {
        Self {
            max_elements: cfg.max_elements.max(1),
            ..Self::new(cfg.vector_dim, cfg.hnsw_ef_construction, cfg.hnsw_m)
        }
    }

    fn new_graph(&self) -> ScopeGraph {
        ScopeGraph {
            hnsw: Hnsw::<f32, DistCosine>::new(
                self.m,
                self.max_elements,
                16, // max_layer
                self.ef_construction,
                DistCosine,
            ),
            chunk_ids: Vec::new(),
            known: HashSet::new(),
        }
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(VectorIndexError::InvalidVector(
                "vector contains non-finite values".to_string(),
            ));
        }
        if vector.iter().all(|v| *v == 0.0) {
            return Err(VectorIndexError::InvalidVector(
                "zero vector has no direction".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert a chunk vector into its snapshot's graph.
    ///
    /// Returns `false` when the chunk is already indexed.
    pub fn insert(
        &self,
        snapshot_id: &str,
        chunk_id: &str,
        vector: &[f32],
    ) -> Result<bool, VectorIndexError> {
        self.check_vector(vector)?;

        let mut graphs = self
            .graphs
            .write()
            .map_err(|_| VectorIndexError::LockPoisoned)?;
        let graph = graphs
            .entry(snapshot_id.to_string())
            .or_insert_with(|| self.new_graph());

        if !graph.known.insert(chunk_id.to_string()) {
            return Ok(false);
        }

        let data = vector.to_vec();
        let internal_id = graph.chunk_ids.len();
        graph.hnsw.insert((&data, internal_id));
        graph.chunk_ids.push(chunk_id.to_string());

        Ok(true)
    }

    /// Search for the k nearest chunks inside one snapshot
    ///
    /// # Returns
    /// Matches sorted by similarity descending, ties by chunk id. An unknown
    /// snapshot yields no matches.
    pub fn search(
        &self,
        snapshot_id: &str,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<VectorMatch>, VectorIndexError> {
        self.check_vector(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let graphs = self
            .graphs
            .read()
            .map_err(|_| VectorIndexError::LockPoisoned)?;
        let Some(graph) = graphs.get(snapshot_id) else {
            return Ok(Vec::new());
        };

        let neighbours = graph.hnsw.search(query, k, ef_search.max(k));

        let mut matches: Vec<VectorMatch> = neighbours
            .into_iter()
            .filter_map(|n| {
                let chunk_id = graph.chunk_ids.get(n.d_id)?;
                let score = 1.0 - n.distance;
                score.is_finite().then(|| VectorMatch {
                    chunk_id: chunk_id.clone(),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(k);

        Ok(matches)
    }

    /// Number of vectors indexed for a snapshot
    pub fn len_for(&self, snapshot_id: &str) -> usize {
        self.graphs
            .read()
            .map(|g| g.get(snapshot_id).map_or(0, |graph| graph.chunk_ids.len()))
            .unwrap_or(0)
    }

    /// Total number of indexed vectors
    pub fn len(&self) -> usize {
        self.graphs
            .read()
            .map(|g| g.values().map(|graph| graph.chunk_ids.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Drop a snapshot's graph entirely
    pub fn remove_snapshot(&self, snapshot_id: &str) -> Result<bool, VectorIndexError> {
        let mut graphs = self
            .graphs
            .write()
            .map_err(|_| VectorIndexError::LockPoisoned)?;
        Ok(graphs.remove(snapshot_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_index_creation() {
        let index = VectorIndex::new(8, 200, 16);
        assert_eq!(index.dimension(), 8);
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_insert_and_search() {
        let index = VectorIndex::new(8, 200, 16);

        let mut near = vec![0.0; 8];
        near[0] = 0.9;
        near[1] = 0.1;

        index.insert("s1", "a", &unit(8, 0)).unwrap();
        index.insert("s1", "b", &unit(8, 1)).unwrap();
        index.insert("s1", "c", &near).unwrap();

        let results = index.search("s1", &unit(8, 0), 2, 50).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "a");
        assert!((results[0].score - 1.0).abs() < 1e-4);
        assert_eq!(results[1].chunk_id, "c");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_search_is_scoped_to_snapshot() {
        let index = VectorIndex::new(4, 100, 8);
        index.insert("s1", "mine", &unit(4, 0)).unwrap();
        index.insert("s2", "theirs", &unit(4, 0)).unwrap();

        let results = index.search("s1", &unit(4, 0), 10, 50).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "mine");

        assert!(index.search("s3", &unit(4, 0), 10, 50).unwrap().is_empty());
        assert_eq!(index.len_for("s2"), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let index = VectorIndex::new(4, 100, 8);
        assert!(index.insert("s1", "a", &unit(4, 0)).unwrap());
        assert!(!index.insert("s1", "a", &unit(4, 1)).unwrap());
        assert_eq!(index.len_for("s1"), 1);
    }

    #[test]
    fn test_vector_validation() {
        let index = VectorIndex::new(4, 100, 8);
        assert!(matches!(
            index.insert("s1", "a", &[1.0; 3]),
            Err(VectorIndexError::InvalidDimension { .. })
        ));
        assert!(matches!(
            index.insert("s1", "a", &[0.0; 4]),
            Err(VectorIndexError::InvalidVector(_))
        ));
        assert!(index.search("s1", &[f32::NAN, 0.0, 0.0, 1.0], 1, 10).is_err());
    }

    #[test]
    fn test_remove_snapshot() {
        let index = VectorIndex::new(4, 100, 8);
        index.insert("s1", "a", &unit(4, 0)).unwrap();
        assert!(index.remove_snapshot("s1").unwrap());
        assert!(index.is_empty());
    }
}
