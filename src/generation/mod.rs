//! Text-generation service client
//!
//! Used only to produce query variations. A generator never touches persisted
//! state.

mod remote;

pub use remote::RemoteGenerator;

use crate::config::GenerationConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generator initialization failed: {0}")]
    InitializationError(String),

    #[error("Generation request failed: {0}")]
    RequestError(String),

    #[error("Malformed generation response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Whether a single bounded retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::RequestError(_))
    }
}

/// Token accounting reported by the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Generated text plus usage, when the service reports it
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Generation, GenerationError>;

    fn model_name(&self) -> &str;
}

/// Construct the configured generator, `None` when generation is disabled
pub fn generator_from_config(
    cfg: &GenerationConfig,
) -> Result<Option<Arc<dyn TextGenerator>>, GenerationError> {
    if !cfg.enabled {
        return Ok(None);
    }
    Ok(Some(Arc::new(RemoteGenerator::from_config(cfg)?)))
}
