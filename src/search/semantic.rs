use super::{ScopedSearch, SearchError, SearchHit, SearchMethod};
use crate::embedding::VectorIndex;
use crate::variation::QueryVariation;
use async_trait::async_trait;
use std::sync::Arc;

/// Approximate nearest-neighbour search over the per-snapshot HNSW graphs
pub struct SemanticSearch {
    index: Arc<VectorIndex>,
    ef_search: usize,
    threshold: Option<f32>,
}

impl SemanticSearch {
    pub fn new(index: Arc<VectorIndex>, ef_search: usize) -> Self {
        Self {
            index,
            ef_search,
            threshold: None,
        }
    }

    /// Drop returned candidates below `threshold`. The graph traversal itself
    /// never sees it.
    pub fn with_threshold(mut self, threshold: Option<f32>) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl ScopedSearch for SemanticSearch {
    fn method(&self) -> SearchMethod {
        SearchMethod::Semantic
    }

    async fn search(
        &self,
        query: &QueryVariation,
        scope_id: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let vector = query
            .embedding
            .as_deref()
            .ok_or(SearchError::MissingEmbedding)?;

        let matches = self
            .index
            .search(scope_id, vector, k, self.ef_search)
            .map_err(|e| SearchError::Backend(e.to_string()))?;

        let threshold = self.threshold.unwrap_or(f32::NEG_INFINITY);
        Ok(matches
            .into_iter()
            .filter(|m| m.score >= threshold)
            .map(|m| SearchHit {
                chunk_id: m.chunk_id,
                raw_score: m.score,
            })
            .collect())
    }
}
