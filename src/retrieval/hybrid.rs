//! Hybrid search orchestration across query variations and search methods

use crate::access::snapshot_allows;
use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::generation::TextGenerator;
use crate::retrieval::{
    assemble, fuse, FusionParams, QueryRequest, QueryResponse, ResponseStatus, ResultList,
};
use crate::retry::{with_retry, CallFailure};
use crate::search::{ScopedSearch, SearchError, SearchHit, SearchMethod};
use crate::storage::{Chunk, ChunkStore};
use crate::variation::{QueryVariation, QueryVariationGenerator, VariationKind};
use ahash::AHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Scope not found: {0}")]
    ScopeNotFound(String),

    #[error("Scope is not queryable: {0}")]
    ScopeUnavailable(String),

    #[error("Chunk store error: {0}")]
    Store(String),

    #[error("Retrieval cancelled")]
    Cancelled,
}

impl RetrievalError {
    /// Errors caused by the request itself; never retried
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RetrievalError::InvalidRequest(_)
                | RetrievalError::ScopeNotFound(_)
                | RetrievalError::ScopeUnavailable(_)
        )
    }
}

/// Configuration merged with per-request overrides
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub top_k: usize,
    pub variation_count: usize,
    /// Hits requested from each sub-search
    pub candidates: usize,
    pub fusion: FusionParams,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
}

impl RequestSettings {
    pub fn resolve(cfg: &RetrievalConfig, request: &QueryRequest) -> Result<Self, RetrievalError> {
        let top_k = request.top_k.unwrap_or(cfg.top_k);
        if top_k == 0 {
            return Err(RetrievalError::InvalidRequest(
                "top_k must be greater than 0".to_string(),
            ));
        }
        if top_k > cfg.max_top_k {
            return Err(RetrievalError::InvalidRequest(format!(
                "top_k {} exceeds the maximum of {}",
                top_k, cfg.max_top_k
            )));
        }

        let (semantic_weight, keyword_weight) = match request.method_weights {
            Some(w) => (w.semantic, w.keyword),
            None => (cfg.semantic_weight, cfg.keyword_weight),
        };
        let weights_ok = semantic_weight.is_finite()
            && keyword_weight.is_finite()
            && semantic_weight >= 0.0
            && keyword_weight >= 0.0
            && semantic_weight + keyword_weight > 0.0;
        if !weights_ok {
            return Err(RetrievalError::InvalidRequest(
                "Method weights must be non-negative with a positive sum".to_string(),
            ));
        }

        Ok(Self {
            top_k,
            // Slots past the generated kinds would only repeat them
            variation_count: request
                .variation_count
                .unwrap_or(cfg.variation_count)
                .min(VariationKind::GENERATED.len()),
            candidates: top_k.saturating_mul(cfg.candidate_multiplier.max(1)),
            fusion: FusionParams {
                strategy: request.fusion_strategy.unwrap_or(cfg.fusion_strategy),
                rank_constant: cfg.rank_constant,
                normalize: cfg.normalize_scores,
            },
            semantic_weight,
            keyword_weight,
        })
    }

    fn method_weight(&self, method: SearchMethod) -> f32 {
        match method {
            SearchMethod::Semantic => self.semantic_weight,
            SearchMethod::Keyword => self.keyword_weight,
        }
    }
}

/// Result of one (variation, method) sub-search
struct SubCall {
    variation_index: usize,
    variation_kind: VariationKind,
    method: SearchMethod,
    engine_index: usize,
    elapsed: Duration,
    result: Result<Vec<SearchHit>, CallFailure>,
}

/// Hybrid retriever combining every configured search engine with query
/// variations
///
/// Stateless across requests: everything a request needs is resolved from
/// the configuration held here plus the request itself.
pub struct HybridRetriever {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    engines: Vec<Arc<dyn ScopedSearch>>,
    variations: QueryVariationGenerator,
    config: RetrievalConfig,
}

impl HybridRetriever {
    /// Create a retriever with no engines and query expansion disabled
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        let variations = QueryVariationGenerator::new(
            None,
            0,
            Duration::from_millis(config.generation_timeout_ms),
            Duration::from_millis(config.retry_backoff_ms),
        );
        Self {
            store,
            embedder,
            engines: Vec::new(),
            variations,
            config,
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn ScopedSearch>) -> Self {
        self.engines.push(engine);
        self
    }

    /// Enable query variations through `generator`
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>, max_tokens: u32) -> Self {
        self.variations = QueryVariationGenerator::new(
            Some(generator),
            max_tokens,
            Duration::from_millis(self.config.generation_timeout_ms),
            Duration::from_millis(self.config.retry_backoff_ms),
        );
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Run a retrieval request to completion
    pub async fn retrieve(&self, request: &QueryRequest) -> Result<QueryResponse, RetrievalError> {
        self.retrieve_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run a retrieval request that stops as soon as `cancel` fires
    ///
    /// Cancellation aborts every in-flight sub-call and discards partial
    /// results.
    pub async fn retrieve_with_cancel(
        &self,
        request: &QueryRequest,
        cancel: CancellationToken,
    ) -> Result<QueryResponse, RetrievalError> {
        let request_id = Uuid::new_v4();
        let start = Instant::now();

        let query = request.query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "Query text cannot be empty".to_string(),
            ));
        }
        if request.scope_id.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "scope_id cannot be empty".to_string(),
            ));
        }
        let settings = RequestSettings::resolve(&self.config, request)?;

        let snapshot = self
            .store
            .get_snapshot(&request.scope_id)
            .map_err(|e| RetrievalError::Store(e.to_string()))?
            .ok_or_else(|| RetrievalError::ScopeNotFound(request.scope_id.clone()))?;
        if !snapshot.status.is_queryable() {
            return Err(RetrievalError::ScopeUnavailable(request.scope_id.clone()));
        }

        if !snapshot_allows(&snapshot, &request.requester) {
            debug!("[{}] Requester not allowed on scope; returning nothing", request_id);
            return Ok(QueryResponse::empty(ResponseStatus::Complete));
        }

        let variations = self
            .variations
            .generate(query, settings.variation_count, &cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }

        let calls = self
            .run_sub_searches(request_id, &variations, &request.scope_id, &settings, &cancel)
            .await?;

        let total = calls.len();
        let failed = calls.iter().filter(|c| c.result.is_err()).count();
        if total == 0 || failed == total {
            warn!(
                "[{}] All {} sub-searches failed; no results available",
                request_id, total
            );
            return Ok(QueryResponse::empty(ResponseStatus::Unavailable));
        }

        let mut candidate_ids: Vec<String> = calls
            .iter()
            .filter_map(|c| c.result.as_ref().ok())
            .flatten()
            .map(|hit| hit.chunk_id.clone())
            .collect();
        candidate_ids.sort();
        candidate_ids.dedup();

        let chunks: AHashMap<String, Chunk> = match self.store.get_chunks_by_id(&candidate_ids) {
            Ok(chunks) => chunks
                .into_iter()
                .filter(|c| c.snapshot_id == snapshot.id)
                .map(|c| (c.id.clone(), c))
                .collect(),
            Err(e) => {
                warn!("[{}] Chunk hydration failed: {}", request_id, e);
                return Ok(QueryResponse::empty(ResponseStatus::Unavailable));
            }
        };
        let dropped = candidate_ids.len() - chunks.len();
        if dropped > 0 {
            debug!(
                "[{}] Dropped {} candidates outside the scope or missing from the store",
                request_id, dropped
            );
        }

        let weights = &self.config.variation_weights;
        let lists: Vec<ResultList> = calls
            .into_iter()
            .filter_map(|call| {
                let hits: Vec<SearchHit> = call
                    .result
                    .ok()?
                    .into_iter()
                    .filter(|hit| chunks.contains_key(&hit.chunk_id))
                    .collect();
                let variation_weight = match call.variation_kind {
                    VariationKind::Original => weights.original,
                    VariationKind::SemanticExpansion => weights.semantic_expansion,
                    VariationKind::HypotheticalDocument => weights.hypothetical_document,
                    VariationKind::Formal => weights.formal,
                };
                Some(ResultList {
                    variation_index: call.variation_index,
                    variation_kind: call.variation_kind,
                    method: call.method,
                    weight: settings.method_weight(call.method) * variation_weight,
                    hits,
                })
            })
            .collect();

        let fused = fuse(
            &lists,
            &settings.fusion,
            |id| chunks.get(id).and_then(|c| c.page_number),
            settings.top_k,
        );
        let results = assemble(
            fused,
            &chunks,
            self.config.confidence_high,
            self.config.confidence_medium,
        );

        let status = if failed > 0 {
            ResponseStatus::Partial
        } else {
            ResponseStatus::Complete
        };

        info!(
            "[{}] Retrieved {} results from {} variations ({} of {} sub-searches failed, {}) in {}ms",
            request_id,
            results.len(),
            variations.len(),
            failed,
            total,
            settings.fusion.strategy,
            start.elapsed().as_millis()
        );

        Ok(QueryResponse { results, status })
    }

    /// Issue every (variation, engine) pair concurrently and return the
    /// outcomes ordered by (variation index, method)
    async fn run_sub_searches(
        &self,
        request_id: Uuid,
        variations: &[QueryVariation],
        scope_id: &str,
        settings: &RequestSettings,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubCall>, RetrievalError> {
        let call_count = variations.len() * self.engines.len();
        if call_count == 0 {
            return Ok(Vec::new());
        }

        let workers = match self.config.max_concurrency {
            0 => call_count,
            n => n.min(call_count),
        };
        let semaphore = Arc::new(Semaphore::new(workers));
        let timeout = Duration::from_millis(self.config.search_timeout_ms);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        let mut tasks = JoinSet::new();
        let mut pending = Vec::with_capacity(call_count);
        for (variation_index, variation) in variations.iter().enumerate() {
            for (engine_index, engine) in self.engines.iter().enumerate() {
                pending.push((variation_index, variation.kind, engine.method(), engine_index));
                let engine = Arc::clone(engine);
                let embedder = Arc::clone(&self.embedder);
                let semaphore = Arc::clone(&semaphore);
                let mut variation = variation.clone();
                let scope_id = scope_id.to_string();
                let k = settings.candidates;

                tasks.spawn(async move {
                    let method = engine.method();
                    let variation_kind = variation.kind;
                    let start = Instant::now();

                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            search_one(&*engine, &*embedder, &mut variation, &scope_id, k, timeout, backoff)
                                .await
                        }
                        Err(e) => Err(CallFailure::Failed(e.to_string())),
                    };

                    SubCall {
                        variation_index,
                        variation_kind,
                        method,
                        engine_index,
                        elapsed: start.elapsed(),
                        result,
                    }
                });
            }
        }

        let mut calls = Vec::with_capacity(call_count);
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    debug!("[{}] Cancelled with {} sub-searches in flight", request_id, tasks.len());
                    return Err(RetrievalError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok(call) => {
                    match &call.result {
                        Ok(hits) => debug!(
                            "[{}] {} search for {} variation returned {} hits in {}ms",
                            request_id,
                            call.method,
                            call.variation_kind,
                            hits.len(),
                            call.elapsed.as_millis()
                        ),
                        Err(failure) => warn!(
                            "[{}] {} search for {} variation degraded to empty after {}ms: {}",
                            request_id,
                            call.method,
                            call.variation_kind,
                            call.elapsed.as_millis(),
                            failure
                        ),
                    }
                    calls.push(call);
                }
                Err(e) => warn!("[{}] Sub-search task failed: {}", request_id, e),
            }
        }

        // A task that panicked never reported back; count it as failed
        for (variation_index, variation_kind, method, engine_index) in pending {
            let reported = calls
                .iter()
                .any(|c| c.variation_index == variation_index && c.engine_index == engine_index);
            if !reported {
                calls.push(SubCall {
                    variation_index,
                    variation_kind,
                    method,
                    engine_index,
                    elapsed: Duration::ZERO,
                    result: Err(CallFailure::Failed("sub-search task panicked".to_string())),
                });
            }
        }

        calls.sort_by_key(|c| (c.variation_index, c.method, c.engine_index));
        Ok(calls)
    }
}

/// One sub-search, embedding the variation first when the engine needs a
/// vector
async fn search_one(
    engine: &dyn ScopedSearch,
    embedder: &dyn EmbeddingProvider,
    variation: &mut QueryVariation,
    scope_id: &str,
    k: usize,
    timeout: Duration,
    backoff: Duration,
) -> Result<Vec<SearchHit>, CallFailure> {
    if engine.method() == SearchMethod::Semantic && variation.embedding.is_none() {
        let text = variation.text.as_str();
        let vector = with_retry(timeout, backoff, EmbeddingError::is_transient, || {
            embedder.embed(text)
        })
        .await?;
        variation.embedding = Some(vector);
    }

    let variation = &*variation;
    with_retry(timeout, backoff, SearchError::is_transient, || {
        engine.search(variation, scope_id, k)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{FusionStrategy, MethodWeights};
    use crate::access::Requester;

    #[test]
    fn test_settings_fall_back_to_config() {
        let cfg = RetrievalConfig::default();
        let request = QueryRequest::new("q", "s1", Requester::anonymous());
        let settings = RequestSettings::resolve(&cfg, &request).unwrap();

        assert_eq!(settings.top_k, 5);
        assert_eq!(settings.candidates, 20);
        assert_eq!(settings.variation_count, 3);
        assert_eq!(settings.fusion.strategy, FusionStrategy::RankFusion);
        assert_eq!(settings.method_weight(SearchMethod::Semantic), 0.6);
    }

    #[test]
    fn test_settings_apply_overrides() {
        let cfg = RetrievalConfig::default();
        let mut request = QueryRequest::new("q", "s1", Requester::anonymous());
        request.top_k = Some(2);
        request.variation_count = Some(0);
        request.fusion_strategy = Some(FusionStrategy::Weighted);
        request.method_weights = Some(MethodWeights {
            semantic: 1.0,
            keyword: 0.0,
        });

        let settings = RequestSettings::resolve(&cfg, &request).unwrap();
        assert_eq!(settings.top_k, 2);
        assert_eq!(settings.candidates, 8);
        assert_eq!(settings.variation_count, 0);
        assert_eq!(settings.fusion.strategy, FusionStrategy::Weighted);
        assert_eq!(settings.method_weight(SearchMethod::Keyword), 0.0);
    }

    #[test]
    fn test_invalid_overrides_are_client_errors() {
        let cfg = RetrievalConfig::default();
        let mut request = QueryRequest::new("q", "s1", Requester::anonymous());
        request.top_k = Some(0);
        let err = RequestSettings::resolve(&cfg, &request).unwrap_err();
        assert!(err.is_client_error());

        request.top_k = None;
        request.method_weights = Some(MethodWeights {
            semantic: -1.0,
            keyword: 0.5,
        });
        assert!(RequestSettings::resolve(&cfg, &request).is_err());
        assert!(!RetrievalError::Cancelled.is_client_error());
    }

    #[test]
    fn test_oversized_requests_bounded() {
        let cfg = RetrievalConfig::default();
        let mut request = QueryRequest::new("q", "s1", Requester::anonymous());
        request.top_k = Some(usize::MAX / 8);
        let err = RequestSettings::resolve(&cfg, &request).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidRequest(_)));

        request.top_k = Some(cfg.max_top_k);
        request.variation_count = Some(500);
        let settings = RequestSettings::resolve(&cfg, &request).unwrap();
        assert_eq!(settings.candidates, cfg.max_top_k * cfg.candidate_multiplier);
        assert_eq!(settings.variation_count, VariationKind::GENERATED.len());
    }
}
