//! Turns fused results into caller-facing passages with citations

use crate::retrieval::FusedResult;
use crate::storage::{BoundingBox, Chunk};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Coarse confidence derived from the fused score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_score(score: f32, high: f32, medium: f32) -> Self {
        if score >= high {
            ConfidenceBand::High
        } else if score >= medium {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

/// One ranked, access-checked passage
///
/// Carries no fusion weights or per-method raw scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub fused_score: f32,
    pub rank: usize,
    pub contributing_methods: Vec<String>,
    pub citation: String,
    pub confidence: ConfidenceBand,
}

/// `<source>, p. <n>, § <section>`, omitting whatever is unknown
pub fn citation(chunk: &Chunk) -> String {
    let source = chunk
        .metadata
        .document_title
        .as_deref()
        .or(chunk.metadata.source_filename.as_deref())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&chunk.document_id);

    let mut parts = vec![source.trim().to_string()];
    if let Some(page) = chunk.page_number {
        parts.push(format!("p. {}", page));
    }
    if let Some(section) = chunk.section_title.as_deref().map(str::trim) {
        if !section.is_empty() {
            parts.push(format!("§ {}", section));
        }
    }
    parts.join(", ")
}

/// Pair fused results with their hydrated chunks. Results whose chunk is
/// missing from `chunks` are skipped; ranks are reassigned densely.
pub fn assemble(
    fused: Vec<FusedResult>,
    chunks: &AHashMap<String, Chunk>,
    confidence_high: f32,
    confidence_medium: f32,
) -> Vec<RetrievedPassage> {
    fused
        .into_iter()
        .filter_map(|result| {
            let chunk = chunks.get(&result.chunk_id)?;
            Some(RetrievedPassage {
                chunk_id: result.chunk_id.clone(),
                document_id: chunk.document_id.clone(),
                content: chunk.content.clone(),
                page_number: chunk.page_number,
                section_title: chunk.section_title.clone(),
                bbox: chunk.bbox,
                fused_score: result.fused_score,
                rank: 0,
                contributing_methods: result
                    .methods()
                    .iter()
                    .map(|m| m.as_str().to_string())
                    .collect(),
                citation: citation(chunk),
                confidence: ConfidenceBand::from_score(
                    result.fused_score,
                    confidence_high,
                    confidence_medium,
                ),
            })
        })
        .enumerate()
        .map(|(i, mut passage)| {
            passage.rank = i + 1;
            passage
        })
        .collect()
}
