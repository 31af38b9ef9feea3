//! Score and rank fusion for combining per-(variation, method) result lists

use crate::search::{SearchHit, SearchMethod};
use crate::variation::VariationKind;
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Fusion strategy selectable per deployment or per request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Weighted sum of per-list min-max normalized scores
    Weighted,
    /// Sum of `1 / (k + rank)` across lists
    #[default]
    RankFusion,
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::Weighted => "weighted",
            FusionStrategy::RankFusion => "rank_fusion",
        }
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted" => Ok(FusionStrategy::Weighted),
            "rank_fusion" | "rrf" => Ok(FusionStrategy::RankFusion),
            other => Err(format!(
                "Unknown fusion strategy: {} (expected 'weighted' or 'rank_fusion')",
                other
            )),
        }
    }
}

/// Ranked hits of one (variation, method) sub-search
#[derive(Debug, Clone)]
pub struct ResultList {
    pub variation_index: usize,
    pub variation_kind: VariationKind,
    pub method: SearchMethod,
    /// Pair weight for weighted fusion; ignored by rank fusion
    pub weight: f32,
    pub hits: Vec<SearchHit>,
}

/// Fusion parameters resolved for one request
#[derive(Debug, Clone, Copy)]
pub struct FusionParams {
    pub strategy: FusionStrategy,
    pub rank_constant: f32,
    /// Divide fused scores by the best attainable score, mapping them to [0, 1]
    pub normalize: bool,
}

/// How one list contributed to a fused result
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub variation_index: usize,
    pub variation_kind: VariationKind,
    pub method: SearchMethod,
    pub raw_score: f32,
    /// 1-based position within its own list
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusedResult {
    pub chunk_id: String,
    pub fused_score: f32,
    pub contributions: Vec<Contribution>,
    /// 1-based final rank
    pub rank: usize,
}

impl FusedResult {
    /// Distinct methods that found this chunk, in stable order
    pub fn methods(&self) -> Vec<SearchMethod> {
        let mut methods: Vec<SearchMethod> = self.contributions.iter().map(|c| c.method).collect();
        methods.sort();
        methods.dedup();
        methods
    }
}

/// Min-max normalize one list's raw scores. A list whose scores are all equal
/// maps every hit to 1.0.
fn min_max(hits: &[SearchHit]) -> Vec<f32> {
    let (min, max) = hits
        .iter()
        .map(|h| h.raw_score)
        .filter(|s| s.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s), hi.max(s))
        });

    let range = max - min;
    hits.iter()
        .map(|h| {
            if !h.raw_score.is_finite() {
                0.0
            } else if range > f32::EPSILON {
                (h.raw_score - min) / range
            } else {
                1.0
            }
        })
        .collect()
}

/// Fuse result lists into at most `limit` results
///
/// A chunk found by several lists appears once, with the sum of its per-list
/// scores. Input order of `lists` does not matter: lists are processed in
/// (variation index, method) order. Ties on score prefer more contributing
/// lists, then the lower page (`page_of`, unknown pages last), then chunk id.
pub fn fuse(
    lists: &[ResultList],
    params: &FusionParams,
    page_of: impl Fn(&str) -> Option<u32>,
    limit: usize,
) -> Vec<FusedResult> {
    let mut ordered: Vec<&ResultList> = lists
        .iter()
        .filter(|l| match params.strategy {
            FusionStrategy::Weighted => l.weight > 0.0,
            FusionStrategy::RankFusion => true,
        })
        .collect();
    ordered.sort_by_key(|l| (l.variation_index, l.method));

    let k = params.rank_constant;
    let mut scores: AHashMap<&str, (f32, Vec<Contribution>)> = AHashMap::new();

    for list in &ordered {
        let normalized = match params.strategy {
            FusionStrategy::Weighted => min_max(&list.hits),
            FusionStrategy::RankFusion => Vec::new(),
        };

        let mut seen: AHashSet<&str> = AHashSet::new();
        for (position, hit) in list.hits.iter().enumerate() {
            if !seen.insert(hit.chunk_id.as_str()) {
                continue;
            }
            let rank = position + 1;
            let score = match params.strategy {
                FusionStrategy::Weighted => list.weight * normalized[position],
                FusionStrategy::RankFusion => 1.0 / (k + rank as f32),
            };

            let entry = scores
                .entry(hit.chunk_id.as_str())
                .or_insert_with(|| (0.0, Vec::new()));
            entry.0 += score;
            entry.1.push(Contribution {
                variation_index: list.variation_index,
                variation_kind: list.variation_kind,
                method: list.method,
                raw_score: hit.raw_score,
                rank,
            });
        }
    }

    let ceiling = match params.strategy {
        FusionStrategy::Weighted => ordered.iter().map(|l| l.weight).sum::<f32>(),
        FusionStrategy::RankFusion => ordered.len() as f32 / (k + 1.0),
    };

    let mut fused: Vec<(FusedResult, Option<u32>)> = scores
        .into_iter()
        .map(|(chunk_id, (score, contributions))| {
            let fused_score = if params.normalize && ceiling > 0.0 {
                (score / ceiling).clamp(0.0, 1.0)
            } else {
                score
            };
            let page = page_of(chunk_id);
            (
                FusedResult {
                    chunk_id: chunk_id.to_string(),
                    fused_score,
                    contributions,
                    rank: 0,
                },
                page,
            )
        })
        .collect();

    fused.sort_by(|(a, page_a), (b, page_b)| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| b.contributions.len().cmp(&a.contributions.len()))
            .then_with(|| compare_pages(*page_a, *page_b))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    fused
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (mut result, _))| {
            result.rank = i + 1;
            result
        })
        .collect()
}

fn compare_pages(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(items: &[(&str, f32)]) -> Vec<SearchHit> {
        items
            .iter()
            .map(|(id, score)| SearchHit {
                chunk_id: id.to_string(),
                raw_score: *score,
            })
            .collect()
    }

    fn list(index: usize, method: SearchMethod, weight: f32, items: &[(&str, f32)]) -> ResultList {
        ResultList {
            variation_index: index,
            variation_kind: VariationKind::Original,
            method,
            weight,
            hits: hits(items),
        }
    }

    fn params(strategy: FusionStrategy, rank_constant: f32, normalize: bool) -> FusionParams {
        FusionParams {
            strategy,
            rank_constant,
            normalize,
        }
    }

    fn no_pages(_: &str) -> Option<u32> {
        None
    }

    fn spread(results: &[FusedResult]) -> f32 {
        let max = results.iter().map(|r| r.fused_score).fold(f32::MIN, f32::max);
        let min = results.iter().map(|r| r.fused_score).fold(f32::MAX, f32::min);
        max - min
    }

    #[test]
    fn test_rank_fusion_sums_across_lists() {
        let lists = vec![
            list(0, SearchMethod::Semantic, 1.0, &[("a", 0.9), ("b", 0.8), ("c", 0.7)]),
            list(0, SearchMethod::Keyword, 1.0, &[("b", 12.0), ("d", 9.0)]),
        ];
        let fused = fuse(&lists, &params(FusionStrategy::RankFusion, 10.0, false), no_pages, 10);

        assert_eq!(fused.len(), 4);
        assert_eq!(fused[0].chunk_id, "b");
        assert!((fused[0].fused_score - (1.0 / 12.0 + 1.0 / 11.0)).abs() < 1e-6);
        assert_eq!(fused[0].contributions.len(), 2);
        assert_eq!(
            fused[0].methods(),
            vec![SearchMethod::Semantic, SearchMethod::Keyword]
        );
        assert_eq!(fused.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_spread_increases_as_rank_constant_decreases() {
        let lists = vec![
            list(
                0,
                SearchMethod::Semantic,
                1.0,
                &[("a", 0.9), ("b", 0.8), ("c", 0.7), ("d", 0.6), ("e", 0.5)],
            ),
            list(
                0,
                SearchMethod::Keyword,
                1.0,
                &[("c", 9.0), ("a", 8.0), ("f", 7.0), ("g", 6.0), ("b", 5.0)],
            ),
        ];

        let spreads: Vec<f32> = [60.0, 30.0, 10.0, 1.0]
            .iter()
            .map(|k| spread(&fuse(&lists, &params(FusionStrategy::RankFusion, *k, false), no_pages, 10)))
            .collect();

        for pair in spreads.windows(2) {
            assert!(pair[1] > pair[0], "spreads not increasing: {:?}", spreads);
        }
        // k=60 collapses everything into a narrow band
        assert!(spreads[0] < 0.03);
    }

    #[test]
    fn test_normalized_scores_in_unit_range() {
        let lists = vec![
            list(0, SearchMethod::Semantic, 1.0, &[("a", 0.9), ("b", 0.1)]),
            list(0, SearchMethod::Keyword, 1.0, &[("a", 4.0), ("c", 2.0)]),
        ];
        for strategy in [FusionStrategy::RankFusion, FusionStrategy::Weighted] {
            let fused = fuse(&lists, &params(strategy, 10.0, true), no_pages, 10);
            assert_eq!(fused[0].chunk_id, "a");
            assert!((fused[0].fused_score - 1.0).abs() < 1e-6);
            assert!(fused.iter().all(|r| (0.0..=1.0).contains(&r.fused_score)));
        }
    }

    #[test]
    fn test_weighted_min_max_per_list() {
        // Raw scales differ by orders of magnitude; min-max puts them on par
        let lists = vec![
            list(0, SearchMethod::Semantic, 0.6, &[("a", 0.91), ("b", 0.90)]),
            list(0, SearchMethod::Keyword, 0.4, &[("b", 300.0), ("c", 100.0)]),
        ];
        let fused = fuse(&lists, &params(FusionStrategy::Weighted, 10.0, false), no_pages, 10);

        let score = |id: &str| fused.iter().find(|r| r.chunk_id == id).unwrap().fused_score;
        assert!((score("a") - 0.6).abs() < 1e-5);
        assert!((score("b") - 0.4).abs() < 1e-5);
        assert!(score("c").abs() < 1e-6);
        assert_eq!(fused[0].chunk_id, "a");
    }

    #[test]
    fn test_zero_weight_lists_do_not_contribute() {
        let lists = vec![
            list(0, SearchMethod::Semantic, 1.0, &[("en", 0.95), ("da", 0.90)]),
            list(0, SearchMethod::Keyword, 0.0, &[("en", 7.0)]),
        ];
        let fused = fuse(&lists, &params(FusionStrategy::Weighted, 10.0, true), no_pages, 10);
        assert_eq!(
            fused.iter().map(|r| r.chunk_id.as_str()).collect::<Vec<_>>(),
            vec!["en", "da"]
        );
        assert_eq!(fused[0].methods(), vec![SearchMethod::Semantic]);
    }

    #[test]
    fn test_single_score_list_maps_to_one() {
        assert_eq!(min_max(&hits(&[("a", 3.0)])), vec![1.0]);
        assert_eq!(min_max(&hits(&[("a", 2.0), ("b", 2.0)])), vec![1.0, 1.0]);
    }

    #[test]
    fn test_tie_breaks() {
        // Equal fused scores everywhere: more pairs, then page, then id
        let lists = vec![
            list(0, SearchMethod::Semantic, 1.0, &[("x", 1.0)]),
            list(0, SearchMethod::Keyword, 1.0, &[("y", 1.0)]),
            list(1, SearchMethod::Semantic, 1.0, &[("z", 1.0)]),
            list(1, SearchMethod::Keyword, 1.0, &[("w", 1.0)]),
        ];
        let pages = |id: &str| match id {
            "x" => Some(9),
            "y" => Some(2),
            "z" => None,
            _ => Some(2),
        };
        let fused = fuse(&lists, &params(FusionStrategy::RankFusion, 10.0, false), pages, 10);
        assert_eq!(
            fused.iter().map(|r| r.chunk_id.as_str()).collect::<Vec<_>>(),
            vec!["w", "y", "x", "z"]
        );

        let more_pairs = vec![
            list(0, SearchMethod::Semantic, 1.0, &[("solo", 1.0), ("pair", 0.5)]),
            list(0, SearchMethod::Keyword, 1.0, &[("pair", 1.0)]),
        ];
        let fused = fuse(&more_pairs, &params(FusionStrategy::Weighted, 10.0, false), no_pages, 10);
        assert_eq!(fused[0].chunk_id, "pair");
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let a = list(0, SearchMethod::Semantic, 1.0, &[("a", 0.9), ("b", 0.8)]);
        let b = list(0, SearchMethod::Keyword, 1.0, &[("b", 3.0), ("c", 2.0)]);
        let c = list(1, SearchMethod::Semantic, 1.0, &[("c", 0.7), ("a", 0.6)]);
        let p = params(FusionStrategy::RankFusion, 10.0, true);

        let forward = fuse(&[a.clone(), b.clone(), c.clone()], &p, no_pages, 10);
        let reversed = fuse(&[c, b, a], &p, no_pages, 10);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_identical_lists_fuse_like_one() {
        let single = list(0, SearchMethod::Semantic, 0.6, &[("a", 0.9), ("b", 0.5), ("c", 0.2)]);
        let mut twin = single.clone();
        twin.variation_index = 1;

        for strategy in [FusionStrategy::RankFusion, FusionStrategy::Weighted] {
            let p = params(strategy, 10.0, true);
            let once = fuse(std::slice::from_ref(&single), &p, no_pages, 10);
            let twice = fuse(&[single.clone(), twin.clone()], &p, no_pages, 10);

            let ids = |r: &[FusedResult]| r.iter().map(|f| f.chunk_id.clone()).collect::<Vec<_>>();
            assert_eq!(ids(&once), ids(&twice));
            for (x, y) in once.iter().zip(&twice) {
                assert!((x.fused_score - y.fused_score).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_limit_and_duplicate_hits_within_list() {
        let lists = vec![list(
            0,
            SearchMethod::Keyword,
            1.0,
            &[("a", 3.0), ("a", 2.0), ("b", 1.0)],
        )];
        let fused = fuse(&lists, &params(FusionStrategy::RankFusion, 10.0, false), no_pages, 1);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].contributions.len(), 1);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("weighted".parse::<FusionStrategy>(), Ok(FusionStrategy::Weighted));
        assert_eq!("RANK_FUSION".parse::<FusionStrategy>(), Ok(FusionStrategy::RankFusion));
        assert!("max".parse::<FusionStrategy>().is_err());
    }
}
