//! Hybrid retrieval & ranking
//!
//! Fans a query out over (variation × method) sub-searches, fuses the ranked
//! lists and assembles access-checked passages with citations.

mod assembler;
mod fusion;
mod highlight;
mod hybrid;

pub use assembler::{assemble, citation, ConfidenceBand, RetrievedPassage};
pub use fusion::{fuse, Contribution, FusedResult, FusionParams, FusionStrategy, ResultList};
pub use highlight::{dedupe_highlights, Highlight};
pub use hybrid::{HybridRetriever, RequestSettings, RetrievalError};

use crate::access::Requester;
use crate::config::RetrievalConfig;
use serde::{Deserialize, Serialize};

/// Per-request method weights for weighted fusion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodWeights {
    pub semantic: f32,
    pub keyword: f32,
}

impl MethodWeights {
    /// Weights from per-request overrides; an unset side keeps its configured
    /// value. `None` when neither side is overridden.
    pub fn from_overrides(
        semantic: Option<f32>,
        keyword: Option<f32>,
        cfg: &RetrievalConfig,
    ) -> Option<Self> {
        if semantic.is_none() && keyword.is_none() {
            return None;
        }
        Some(Self {
            semantic: semantic.unwrap_or(cfg.semantic_weight),
            keyword: keyword.unwrap_or(cfg.keyword_weight),
        })
    }
}

/// Inbound retrieval request. Unset fields fall back to configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub scope_id: String,
    #[serde(default)]
    pub requester: Requester,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub variation_count: Option<usize>,
    #[serde(default)]
    pub fusion_strategy: Option<FusionStrategy>,
    #[serde(default)]
    pub method_weights: Option<MethodWeights>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, scope_id: impl Into<String>, requester: Requester) -> Self {
        Self {
            query: query.into(),
            scope_id: scope_id.into(),
            requester,
            top_k: None,
            variation_count: None,
            fusion_strategy: None,
            method_weights: None,
        }
    }
}

/// Whether every sub-search contributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Complete,
    /// Some sub-searches failed or timed out and contributed nothing
    Partial,
    /// No sub-search succeeded; results are empty
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<RetrievedPassage>,
    pub status: ResponseStatus,
}

impl QueryResponse {
    pub fn empty(status: ResponseStatus) -> Self {
        Self {
            results: Vec::new(),
            status,
        }
    }
}
