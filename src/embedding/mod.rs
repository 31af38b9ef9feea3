/// Embedding & indexing
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local embedding, RemoteEmbeddingProvider for HTTP
/// - HNSW graphs per snapshot for vector similarity search
/// - Tantivy for keyword search
/// - SnapshotIndexer to build both indexes from the chunk store
mod batch;
mod keyword_index;
mod provider;
mod remote;
mod vector_index;

pub use batch::{IndexReport, SnapshotIndexer};
pub use keyword_index::{KeywordIndex, KeywordIndexError, KeywordMatch};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use remote::RemoteEmbeddingProvider;
pub use vector_index::{VectorIndex, VectorIndexError, VectorMatch};

use crate::config::EmbeddingConfig;
use std::sync::Arc;

/// Construct the provider selected by `embedding.provider`
pub fn provider_from_config(
    cfg: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match cfg.provider.as_str() {
        "local" => {
            let provider = FastEmbedProvider::new(&cfg.model)?;
            if provider.dimension() != cfg.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: cfg.dimension,
                    actual: provider.dimension(),
                });
            }
            Ok(Arc::new(provider))
        }
        "remote" => Ok(Arc::new(RemoteEmbeddingProvider::from_config(cfg)?)),
        other => Err(EmbeddingError::InitializationError(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_rejected() {
        let cfg = EmbeddingConfig {
            provider: "cloud".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            provider_from_config(&cfg),
            Err(EmbeddingError::InitializationError(_))
        ));
    }

    #[test]
    fn test_remote_provider_from_config() {
        let cfg = EmbeddingConfig {
            provider: "remote".to_string(),
            model: "text-embedding-3-small".to_string(),
            ..Default::default()
        };
        let provider = provider_from_config(&cfg).unwrap();
        assert_eq!(provider.model_name(), "text-embedding-3-small");
        assert_eq!(provider.dimension(), 1024);
    }
}
