//! Query variation generation
//!
//! Expands one user query into the original plus up to N alternate
//! phrasings. Every failure path degrades to fewer variations; callers always
//! get at least the original query back.

use crate::generation::{Generation, GenerationError, TextGenerator};
use crate::retry::with_retry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a variation was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationKind {
    Original,
    SemanticExpansion,
    HypotheticalDocument,
    Formal,
}

impl VariationKind {
    /// Generated kinds, in slot order
    pub const GENERATED: [VariationKind; 3] = [
        VariationKind::SemanticExpansion,
        VariationKind::HypotheticalDocument,
        VariationKind::Formal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariationKind::Original => "original",
            VariationKind::SemanticExpansion => "semantic_expansion",
            VariationKind::HypotheticalDocument => "hypothetical_document",
            VariationKind::Formal => "formal",
        }
    }

    fn temperature(&self) -> f32 {
        match self {
            VariationKind::Original => 0.0,
            VariationKind::SemanticExpansion => 0.5,
            VariationKind::HypotheticalDocument => 0.7,
            VariationKind::Formal => 0.3,
        }
    }

    fn prompt(&self, query: &str) -> String {
        match self {
            VariationKind::Original => query.to_string(),
            VariationKind::SemanticExpansion => format!(
                "Rephrase the following search query using alternate wording and \
                 synonymous technical terms. Keep the same language as the query. \
                 Reply with the rephrased query only.\n\nQuery: {}",
                query
            ),
            VariationKind::HypotheticalDocument => format!(
                "Write a short passage, as it would appear in a technical document, \
                 that answers the following question. Keep the same language as the \
                 question. Reply with the passage only.\n\nQuestion: {}",
                query
            ),
            VariationKind::Formal => format!(
                "Rewrite the following search query in a formal, professional register. \
                 Keep the same language as the query. Reply with the rewritten query \
                 only.\n\nQuery: {}",
                query
            ),
        }
    }
}

impl fmt::Display for VariationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One phrasing of the user's query. Lives for a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryVariation {
    pub kind: VariationKind,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

impl QueryVariation {
    pub fn original(text: impl Into<String>) -> Self {
        Self {
            kind: VariationKind::Original,
            text: text.into(),
            embedding: None,
        }
    }
}

fn list_marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+").ok())
        .as_ref()
}

/// Strip quoting and list decoration that chat models like to add
fn clean_generated(kind: VariationKind, raw: &str) -> Option<String> {
    let text = match kind {
        VariationKind::HypotheticalDocument => raw.trim().to_string(),
        _ => raw.lines().map(str::trim).find(|l| !l.is_empty())?.to_string(),
    };

    let text = match list_marker() {
        Some(marker) => marker.replace(&text, "").into_owned(),
        None => text,
    };
    let text = text
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim()
        .to_string();

    (!text.is_empty()).then_some(text)
}

/// Produces query variations through a text generator
pub struct QueryVariationGenerator {
    generator: Option<Arc<dyn TextGenerator>>,
    max_tokens: u32,
    timeout: Duration,
    backoff: Duration,
}

impl QueryVariationGenerator {
    /// `generator: None` disables expansion; only the original query is used.
    pub fn new(
        generator: Option<Arc<dyn TextGenerator>>,
        max_tokens: u32,
        timeout: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            generator,
            max_tokens,
            timeout,
            backoff,
        }
    }

    /// Original query first, then up to `count` generated variations in slot
    /// order, one per generated kind at most. Duplicates of an earlier variation and empty generations are
    /// dropped.
    pub async fn generate(
        &self,
        query: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Vec<QueryVariation> {
        let mut variations = vec![QueryVariation::original(query)];

        let Some(generator) = &self.generator else {
            return variations;
        };
        let count = count.min(VariationKind::GENERATED.len());
        if count == 0 {
            return variations;
        }

        let mut tasks = JoinSet::new();
        for slot in 0..count {
            let kind = VariationKind::GENERATED[slot % VariationKind::GENERATED.len()];
            let prompt = kind.prompt(query);
            let generator = Arc::clone(generator);
            let (max_tokens, timeout, backoff) = (self.max_tokens, self.timeout, self.backoff);

            tasks.spawn(async move {
                let start = Instant::now();
                let result = with_retry(timeout, backoff, GenerationError::is_transient, || {
                    generator.generate(&prompt, kind.temperature(), max_tokens)
                })
                .await;
                (slot, kind, start.elapsed(), result)
            });
        }

        let mut generated: Vec<Option<(VariationKind, Generation)>> = vec![None; count];
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Variation generation cancelled");
                    tasks.abort_all();
                    return variations;
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((slot, kind, elapsed, Ok(generation))) => {
                    let usage = generation.usage.unwrap_or_default();
                    info!(
                        "Generated {} variation in {}ms (tokens: prompt={}, completion={}, total={})",
                        kind,
                        elapsed.as_millis(),
                        usage.prompt_tokens,
                        usage.completion_tokens,
                        usage.total_tokens
                    );
                    generated[slot] = Some((kind, generation));
                }
                Ok((_, kind, elapsed, Err(failure))) => {
                    warn!(
                        "{} variation failed after {}ms: {}",
                        kind,
                        elapsed.as_millis(),
                        failure
                    );
                }
                Err(e) => warn!("Variation task aborted: {}", e),
            }
        }

        for (kind, generation) in generated.into_iter().flatten() {
            let Some(text) = clean_generated(kind, &generation.text) else {
                continue;
            };
            let duplicate = variations
                .iter()
                .any(|v| v.text.trim().eq_ignore_ascii_case(&text));
            if !duplicate {
                variations.push(QueryVariation {
                    kind,
                    text,
                    embedding: None,
                });
            }
        }

        debug!(
            "Using {} query variations ({} requested)",
            variations.len(),
            count + 1
        );
        variations
    }
}
