//! Configuration management for citeseek
//!
//! Loads the TOML configuration, applies named profiles and `CITESEEK_*`
//! environment overrides, then validates the result. The resolved values are
//! handed explicitly to each component; nothing here is process-global.

use crate::error::{CiteseekError, Result};
use crate::retrieval::FusionStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub highlight: HighlightConfig,
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: "1.0.0".to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.citeseek"),
        }
    }
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "local" (fastembed) or "remote" (OpenAI-compatible HTTP)
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub api_base: String,
    pub path: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "bge-large-en-v1.5".to_string(),
            dimension: 1024,
            api_base: "https://api.openai.com".to_string(),
            path: "/v1/embeddings".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// Text-generation service configuration (query variations)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub enabled: bool,
    pub api_base: String,
    pub path: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: "https://api.openai.com".to_string(),
            path: "/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 8_000,
            max_tokens: 256,
        }
    }
}

/// HNSW index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub vector_dim: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_search: usize,
    /// Capacity hint per snapshot graph
    pub max_elements: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            vector_dim: 1024,
            hnsw_ef_construction: 200,
            hnsw_m: 16,
            hnsw_ef_search: 64,
            max_elements: 100_000,
        }
    }
}

/// Relative weight of each query variation kind in weighted fusion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariationWeights {
    pub original: f32,
    pub semantic_expansion: f32,
    pub hypothetical_document: f32,
    pub formal: f32,
}

impl Default for VariationWeights {
    fn default() -> Self {
        Self {
            original: 1.0,
            semantic_expansion: 1.0,
            hypothetical_document: 1.0,
            formal: 1.0,
        }
    }
}

/// Retrieval and fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Final result count when the request does not specify one
    pub top_k: usize,
    /// Largest `top_k` a request may ask for
    pub max_top_k: usize,
    /// Non-original query variations to generate
    pub variation_count: usize,
    /// Each sub-search fetches `top_k * candidate_multiplier` candidates
    pub candidate_multiplier: usize,
    pub fusion_strategy: FusionStrategy,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    /// Rank fusion smoothing constant
    pub rank_constant: f32,
    /// Rescale fused scores into [0, 1]
    pub normalize_scores: bool,
    /// Advisory cut applied to returned semantic candidates only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
    pub search_timeout_ms: u64,
    pub generation_timeout_ms: u64,
    /// Upper bound on concurrent sub-calls; 0 means one worker per sub-call
    pub max_concurrency: usize,
    pub retry_backoff_ms: u64,
    pub confidence_high: f32,
    pub confidence_medium: f32,
    pub variation_weights: VariationWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_top_k: 50,
            variation_count: 3,
            candidate_multiplier: 4,
            fusion_strategy: FusionStrategy::RankFusion,
            semantic_weight: 0.6,
            keyword_weight: 0.4,
            rank_constant: 10.0,
            normalize_scores: true,
            similarity_threshold: None,
            search_timeout_ms: 5_000,
            generation_timeout_ms: 8_000,
            max_concurrency: 0,
            retry_backoff_ms: 200,
            confidence_high: 0.75,
            confidence_medium: 0.4,
            variation_weights: VariationWeights::default(),
        }
    }
}

/// Highlight deduplication thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub iou_threshold: f32,
    pub containment_fraction: f32,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.8,
            containment_fraction: 1.0,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_strategy: Option<FusionStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_constant: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CiteseekError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CiteseekError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| CiteseekError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load `path` if it exists, otherwise start from defaults. Either way
    /// env overrides and `profile` are applied and the result is validated.
    pub fn load_or_default(path: &Path, profile: Option<&str>) -> Result<Self> {
        if path.exists() {
            return match profile {
                Some(profile) => Self::load_with_profile(path, profile),
                None => Self::load(path),
            };
        }

        tracing::warn!(
            "Config file not found, using defaults. Run 'citeseek config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        Self::finish(config, profile)
    }

    fn finish(mut config: Config, profile: Option<&str>) -> Result<Self> {
        if let Some(profile) = profile {
            config.apply_profile(profile)?;
        }
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| CiteseekError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(strategy) = overrides.fusion_strategy {
            self.retrieval.fusion_strategy = strategy;
        }
        if let Some(k) = overrides.rank_constant {
            self.retrieval.rank_constant = k;
        }
        if let Some(w) = overrides.semantic_weight {
            self.retrieval.semantic_weight = w;
        }
        if let Some(w) = overrides.keyword_weight {
            self.retrieval.keyword_weight = w;
        }
        if let Some(n) = overrides.variation_count {
            self.retrieval.variation_count = n;
        }
        if let Some(enabled) = overrides.generation_enabled {
            self.generation.enabled = enabled;
        }
        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: CITESEEK_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("CITESEEK_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
            value.parse().map_err(|_| CiteseekError::InvalidConfigValue {
                path: path.to_string(),
                message: format!("Cannot parse '{}'", value),
            })
        }

        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__API_BASE" => self.embedding.api_base = value.to_string(),
            "GENERATION__ENABLED" => self.generation.enabled = parse(path, value)?,
            "GENERATION__MODEL" => self.generation.model = value.to_string(),
            "GENERATION__API_BASE" => self.generation.api_base = value.to_string(),
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse(path, value)?,
            "RETRIEVAL__MAX_TOP_K" => self.retrieval.max_top_k = parse(path, value)?,
            "RETRIEVAL__VARIATION_COUNT" => self.retrieval.variation_count = parse(path, value)?,
            "RETRIEVAL__RANK_CONSTANT" => self.retrieval.rank_constant = parse(path, value)?,
            "RETRIEVAL__FUSION_STRATEGY" => {
                self.retrieval.fusion_strategy = parse::<FusionStrategy>(path, value)?
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            CiteseekError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("citeseek").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            highlight: HighlightConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
        assert_eq!(config.retrieval.fusion_strategy, FusionStrategy::RankFusion);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.retrieval.rank_constant = 7.0;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retrieval.rank_constant, 7.0);
        assert_eq!(loaded.highlight.iou_threshold, 0.8);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "[retrieval]\nfusion_strategy = \"weighted\"\nsemantic_weight = 1.0\nkeyword_weight = 0.0\n",
        )
        .unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retrieval.fusion_strategy, FusionStrategy::Weighted);
        assert_eq!(loaded.retrieval.keyword_weight, 0.0);
        assert_eq!(loaded.embedding.dimension, 1024);
    }

    #[test]
    fn test_profile_overrides() {
        let mut config = Config::default();
        config.profiles.insert(
            "precise".to_string(),
            ProfileOverrides {
                fusion_strategy: Some(FusionStrategy::Weighted),
                rank_constant: Some(5.0),
                ..Default::default()
            },
        );

        config.apply_profile("precise").unwrap();
        assert_eq!(config.retrieval.fusion_strategy, FusionStrategy::Weighted);
        assert_eq!(config.retrieval.rank_constant, 5.0);
        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_env_value_parsing() {
        let mut config = Config::default();
        config
            .set_value_from_env("RETRIEVAL__FUSION_STRATEGY", "weighted")
            .unwrap();
        config.set_value_from_env("RETRIEVAL__TOP_K", "9").unwrap();
        assert_eq!(config.retrieval.fusion_strategy, FusionStrategy::Weighted);
        assert_eq!(config.retrieval.top_k, 9);
        assert!(config
            .set_value_from_env("GENERATION__ENABLED", "sometimes")
            .is_err());
    }

    #[test]
    fn test_defaults_are_validated_without_file() {
        let mut config = Config::default();
        config.retrieval.rank_constant = 0.0;
        assert!(matches!(
            Config::finish(config, None),
            Err(CiteseekError::ConfigValidation { .. })
        ));

        let mut config = Config::default();
        config.profiles.insert(
            "wide".to_string(),
            ProfileOverrides {
                variation_count: Some(500),
                ..Default::default()
            },
        );
        assert!(Config::finish(config, Some("wide")).is_err());

        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("absent.toml");
        assert!(Config::load_or_default(&missing, None).is_ok());
        assert!(Config::load_or_default(&missing, Some("unknown")).is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/citeseek.toml"));
        assert!(matches!(result, Err(CiteseekError::ConfigNotFound { .. })));
    }
}
