//! Bounding-box deduplication for page highlights
//!
//! Used by geometry-aware consumers after ranking; not part of the main
//! retrieval path.

use crate::config::HighlightConfig;
use crate::storage::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A rectangle to highlight, owned by a ranked chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub document_id: String,
    pub page_number: u32,
    pub chunk_id: String,
    /// Fused rank of the owning chunk, 1 is best
    pub rank: usize,
    pub bbox: BoundingBox,
}

fn is_duplicate(a: &BoundingBox, b: &BoundingBox, cfg: &HighlightConfig) -> bool {
    let smaller = a.area().min(b.area());
    if smaller <= 0.0 {
        // Degenerate boxes only collapse into an identical box
        return a == b;
    }

    a.iou(b) > cfg.iou_threshold || a.intersection_area(b) / smaller >= cfg.containment_fraction
}

/// Remove near-duplicate and contained boxes
///
/// Boxes are compared only within the same (document, page). Of each
/// duplicate group the box of the best-ranked chunk survives. The output is
/// ordered by document, page, then rank, and `dedupe_highlights` applied to
/// its own output returns it unchanged.
pub fn dedupe_highlights(highlights: Vec<Highlight>, cfg: &HighlightConfig) -> Vec<Highlight> {
    let mut pages: BTreeMap<(String, u32), Vec<Highlight>> = BTreeMap::new();
    for highlight in highlights {
        pages
            .entry((highlight.document_id.clone(), highlight.page_number))
            .or_default()
            .push(highlight);
    }

    let mut kept_all = Vec::new();
    for (_, mut candidates) in pages {
        candidates.sort_by(|a, b| {
            a.rank
                .cmp(&b.rank)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
                .then_with(|| {
                    a.bbox
                        .to_array()
                        .iter()
                        .zip(b.bbox.to_array().iter())
                        .map(|(x, y)| x.total_cmp(y))
                        .find(|o| o.is_ne())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        let mut kept: Vec<Highlight> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !kept
                .iter()
                .any(|k| is_duplicate(&k.bbox, &candidate.bbox, cfg))
            {
                kept.push(candidate);
            }
        }
        kept_all.extend(kept);
    }

    kept_all
}

#[cfg(test)]
mod tests {
    use super::*;

    fn highlight(chunk: &str, rank: usize, page: u32, bbox: [f32; 4]) -> Highlight {
        Highlight {
            document_id: "doc".to_string(),
            page_number: page,
            chunk_id: chunk.to_string(),
            rank,
            bbox: bbox.into(),
        }
    }

    #[test]
    fn test_overlapping_boxes_keep_one() {
        let cfg = HighlightConfig::default();
        let boxes = vec![
            highlight("b", 2, 3, [12.0, 11.0, 98.0, 99.0]),
            highlight("a", 1, 3, [10.0, 10.0, 100.0, 100.0]),
        ];

        let kept = dedupe_highlights(boxes, &cfg);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk_id, "a");
    }

    #[test]
    fn test_better_rank_wins_even_if_smaller() {
        let cfg = HighlightConfig::default();
        let boxes = vec![
            highlight("outer", 4, 1, [0.0, 0.0, 200.0, 200.0]),
            highlight("inner", 1, 1, [50.0, 50.0, 60.0, 60.0]),
        ];
        let kept = dedupe_highlights(boxes, &cfg);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk_id, "inner");
    }

    #[test]
    fn test_partial_overlap_and_other_pages_survive() {
        let cfg = HighlightConfig::default();
        let boxes = vec![
            highlight("a", 1, 3, [0.0, 0.0, 100.0, 100.0]),
            highlight("b", 2, 3, [50.0, 0.0, 150.0, 100.0]),
            highlight("c", 3, 4, [0.0, 0.0, 100.0, 100.0]),
        ];
        let kept = dedupe_highlights(boxes, &cfg);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_containment_fraction() {
        let cfg = HighlightConfig {
            iou_threshold: 0.8,
            containment_fraction: 0.9,
        };
        // 95% of the small box lies inside the big one
        let boxes = vec![
            highlight("big", 1, 1, [0.0, 0.0, 100.0, 100.0]),
            highlight("small", 2, 1, [90.0, 0.0, 100.5, 10.0]),
        ];
        assert_eq!(dedupe_highlights(boxes.clone(), &cfg).len(), 1);
        assert_eq!(dedupe_highlights(boxes, &HighlightConfig::default()).len(), 2);
    }

    #[test]
    fn test_degenerate_boxes() {
        let cfg = HighlightConfig::default();
        let boxes = vec![
            highlight("a", 1, 1, [5.0, 5.0, 5.0, 50.0]),
            highlight("b", 2, 1, [5.0, 5.0, 5.0, 50.0]),
            highlight("c", 3, 1, [0.0, 0.0, 100.0, 100.0]),
        ];
        let kept = dedupe_highlights(boxes, &cfg);
        assert_eq!(
            kept.iter().map(|h| h.chunk_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
    }

    #[test]
    fn test_idempotent() {
        let cfg = HighlightConfig::default();
        let boxes = vec![
            highlight("a", 1, 3, [10.0, 10.0, 100.0, 100.0]),
            highlight("b", 2, 3, [12.0, 11.0, 98.0, 99.0]),
            highlight("c", 3, 3, [90.0, 90.0, 200.0, 200.0]),
            highlight("d", 4, 3, [95.0, 95.0, 199.0, 201.0]),
            highlight("e", 5, 7, [0.0, 0.0, 10.0, 10.0]),
            highlight("f", 6, 7, [0.0, 0.0, 10.0, 10.0]),
        ];

        let once = dedupe_highlights(boxes, &cfg);
        let twice = dedupe_highlights(once.clone(), &cfg);
        assert_eq!(once, twice);
        assert_eq!(
            once.iter().map(|h| h.chunk_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "c", "e"]
        );
    }
}
