use super::{ScopedSearch, SearchError, SearchHit, SearchMethod};
use crate::embedding::KeywordIndex;
use crate::variation::QueryVariation;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// BM25 search over the shared tantivy index
pub struct KeywordSearch {
    index: Arc<Mutex<KeywordIndex>>,
}

impl KeywordSearch {
    pub fn new(index: Arc<Mutex<KeywordIndex>>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ScopedSearch for KeywordSearch {
    fn method(&self) -> SearchMethod {
        SearchMethod::Keyword
    }

    async fn search(
        &self,
        query: &QueryVariation,
        scope_id: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let index = self.index.lock().await;
        let matches = index
            .search(scope_id, &query.text, k)
            .map_err(|e| SearchError::Backend(e.to_string()))?;

        Ok(matches
            .into_iter()
            .map(|m| SearchHit {
                chunk_id: m.chunk_id,
                raw_score: m.score,
            })
            .collect())
    }
}
