//! Scoped search engines
//!
//! Vector and keyword search sit behind one `ScopedSearch` capability so a
//! deployment can swap either backend (local index or managed service)
//! without touching orchestration.

mod keyword;
mod semantic;

pub use keyword::KeywordSearch;
pub use semantic::SemanticSearch;

use crate::variation::QueryVariation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search backend failed: {0}")]
    Backend(String),

    #[error("Search backend unavailable: {0}")]
    Unavailable(String),

    #[error("Query variation has no embedding")]
    MissingEmbedding,
}

impl SearchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SearchError::Unavailable(_))
    }
}

/// Retrieval method that produced a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Semantic,
    Keyword,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Semantic => "semantic",
            SearchMethod::Keyword => "keyword",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate from one engine. `raw_score` is only comparable within the
/// list that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub raw_score: f32,
}

/// Search restricted to one corpus snapshot
///
/// Implementations return at most `k` hits, best first, and never return a
/// chunk from any other snapshot.
#[async_trait]
pub trait ScopedSearch: Send + Sync {
    fn method(&self) -> SearchMethod;

    async fn search(
        &self,
        query: &QueryVariation,
        scope_id: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError>;
}
