use crate::config::Config;
use crate::error::{CiteseekError, Result, ValidationError};
use crate::variation::VariationKind;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_generation(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_highlight(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CiteseekError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;
        if embedding.provider != "local" && embedding.provider != "remote" {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!(
                    "Invalid provider: {}. Must be 'local' or 'remote'",
                    embedding.provider
                ),
            ));
        }

        if embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        } else if embedding.dimension != config.indexing.vector_dim {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                format!(
                    "Index dimension {} does not match embedding dimension {}",
                    config.indexing.vector_dim, embedding.dimension
                ),
            ));
        }

        if embedding.provider == "remote" && embedding.api_base.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.api_base",
                "Remote embedding requires an API base URL",
            ));
        }

        if embedding.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_ms",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_generation(config: &Config, errors: &mut Vec<ValidationError>) {
        let generation = &config.generation;
        if !generation.enabled {
            return;
        }

        if generation.api_base.trim().is_empty() {
            errors.push(ValidationError::new(
                "generation.api_base",
                "Generation requires an API base URL when enabled",
            ));
        }

        if generation.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "generation.model",
                "Generation model cannot be empty when enabled",
            ));
        }

        if generation.max_tokens == 0 {
            errors.push(ValidationError::new(
                "generation.max_tokens",
                "max_tokens must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;
        if indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }
        if indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "ef_construction must be greater than 0",
            ));
        }
        if indexing.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_search",
                "ef_search must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        if retrieval.top_k > retrieval.max_top_k {
            errors.push(ValidationError::new(
                "retrieval.max_top_k",
                format!(
                    "max_top_k {} is smaller than the default top_k {}",
                    retrieval.max_top_k, retrieval.top_k
                ),
            ));
        }

        if retrieval.variation_count > VariationKind::GENERATED.len() {
            errors.push(ValidationError::new(
                "retrieval.variation_count",
                format!(
                    "At most {} generated variations are supported",
                    VariationKind::GENERATED.len()
                ),
            ));
        }

        if retrieval.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.candidate_multiplier",
                "candidate_multiplier must be at least 1",
            ));
        }

        if retrieval.semantic_weight < 0.0 || retrieval.keyword_weight < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.semantic_weight",
                "Method weights cannot be negative",
            ));
        } else if retrieval.semantic_weight + retrieval.keyword_weight <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.keyword_weight",
                "At least one method weight must be positive",
            ));
        }

        let weights = &retrieval.variation_weights;
        if [
            weights.original,
            weights.semantic_expansion,
            weights.hypothetical_document,
            weights.formal,
        ]
        .iter()
        .any(|w| *w < 0.0)
        {
            errors.push(ValidationError::new(
                "retrieval.variation_weights",
                "Variation weights cannot be negative",
            ));
        }

        if !(retrieval.rank_constant > 0.0) {
            errors.push(ValidationError::new(
                "retrieval.rank_constant",
                "Rank constant must be greater than 0",
            ));
        }

        if let Some(threshold) = retrieval.similarity_threshold {
            if !(-1.0..=1.0).contains(&threshold) {
                errors.push(ValidationError::new(
                    "retrieval.similarity_threshold",
                    format!("Threshold {} outside [-1, 1]", threshold),
                ));
            }
        }

        if retrieval.search_timeout_ms == 0 || retrieval.generation_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.search_timeout_ms",
                "Timeouts must be greater than 0",
            ));
        }

        let bands_ok = (0.0..=1.0).contains(&retrieval.confidence_medium)
            && (0.0..=1.0).contains(&retrieval.confidence_high)
            && retrieval.confidence_medium <= retrieval.confidence_high;
        if !bands_ok {
            errors.push(ValidationError::new(
                "retrieval.confidence_high",
                "Confidence bands must satisfy 0 <= medium <= high <= 1",
            ));
        }
    }

    fn validate_highlight(config: &Config, errors: &mut Vec<ValidationError>) {
        let highlight = &config.highlight;
        if !(highlight.iou_threshold > 0.0 && highlight.iou_threshold <= 1.0) {
            errors.push(ValidationError::new(
                "highlight.iou_threshold",
                "IoU threshold must be in (0, 1]",
            ));
        }
        if !(highlight.containment_fraction > 0.0 && highlight.containment_fraction <= 1.0) {
            errors.push(ValidationError::new(
                "highlight.containment_fraction",
                "Containment fraction must be in (0, 1]",
            ));
        }
    }
}
