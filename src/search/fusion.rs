//! Fusion of lexical and semantic result lists.
//!
//! The primary ranker is weighted score fusion; Reciprocal Rank Fusion is
//! kept alongside as the tie-breaker. Refine mode adds a weighted-RRF
//! dedupe across query variants. Everything here is pure.

use std::collections::HashMap;

use super::types::{DomainHit, MatchType, Scored};

/// RRF constant: contribution of rank `r` (1-based) is `1 / (K + r)`.
pub const RRF_K: f32 = 60.0;

/// BM25 normalization constant: `s / (s + K')` maps BM25 into [0, 1).
pub const BM25_NORM_K: f32 = 8.0;

/// Weight of the semantic score when both engines found an item. The two
/// weights exceed 1.0 together so dual-engine hits outrank single-engine
/// ones.
pub const SEMANTIC_WEIGHT: f32 = 0.8;

/// Weight of the normalized BM25 score when both engines found an item.
pub const KEYWORD_WEIGHT: f32 = 0.3;

/// Fused scores closer than this are ordered by RRF instead.
pub const TIE_EPSILON: f32 = 0.001;

/// Map a raw BM25 score into [0, 1). Monotone.
pub fn normalize_bm25(score: f32) -> f32 {
    score / (score + BM25_NORM_K)
}

fn rrf_contribution(rank: usize) -> f32 {
    1.0 / (RRF_K + rank as f32)
}

/// Order fused results: fused score descending, ties under [`TIE_EPSILON`]
/// broken by RRF descending. Stable, so equal-RRF ties stay deterministic.
pub fn sort_fused<T>(results: &mut [Scored<T>]) {
    results.sort_by(|a, b| {
        if (a.fused_score - b.fused_score).abs() < TIE_EPSILON {
            b.rrf_score
                .partial_cmp(&a.rrf_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        } else {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        }
    });
}

/// Rank a semantic-only result list: scores pass through unchanged.
pub fn semantic_ranked<T: DomainHit>(hits: Vec<(T, f32)>, limit: usize) -> Vec<Scored<T>> {
    hits.into_iter()
        .enumerate()
        .take(limit)
        .map(|(i, (hit, score))| {
            let mut scored = Scored::semantic(hit, score, i + 1);
            scored.rrf_score = rrf_contribution(i + 1);
            scored
        })
        .collect()
}

/// Rank a keyword-only result list: BM25 is normalized into the score field.
pub fn keyword_ranked<T: DomainHit>(hits: Vec<(T, f32)>, limit: usize) -> Vec<Scored<T>> {
    hits.into_iter()
        .enumerate()
        .take(limit)
        .map(|(i, (hit, bm25))| {
            let mut scored = Scored::keyword(hit, bm25, i + 1);
            let normalized = normalize_bm25(bm25);
            scored.keyword_score = Some(normalized);
            scored.fused_score = normalized;
            scored.rrf_score = rrf_contribution(i + 1);
            scored
        })
        .collect()
}

/// Weighted score fusion of one semantic and one lexical list.
///
/// Items found by both engines score `0.8·semantic + 0.3·normalized_bm25`;
/// single-engine items keep their own (normalized) score. RRF accumulates
/// from every ranker that saw the item and breaks near-ties.
pub fn fuse_hybrid<T: DomainHit>(
    semantic: Vec<(T, f32)>,
    keyword: Vec<(T, f32)>,
    limit: usize,
) -> Vec<Scored<T>> {
    let mut by_key: HashMap<T::Key, Scored<T>> = HashMap::new();
    let mut order: Vec<T::Key> = Vec::new();

    for (i, (hit, score)) in semantic.into_iter().enumerate() {
        let key = hit.key();
        let mut scored = Scored::semantic(hit, score, i + 1);
        scored.rrf_score = rrf_contribution(i + 1);
        if by_key.insert(key.clone(), scored).is_none() {
            order.push(key);
        }
    }

    for (i, (hit, bm25)) in keyword.into_iter().enumerate() {
        let rank = i + 1;
        let key = hit.key();
        match by_key.get_mut(&key) {
            Some(existing) => {
                existing.hit.absorb(&hit);
                existing.bm25_raw = Some(bm25);
                existing.keyword_rank = Some(rank);
                existing.rrf_score += rrf_contribution(rank);
                existing.match_type = MatchType::Both;
            }
            None => {
                let mut scored = Scored::keyword(hit, bm25, rank);
                scored.rrf_score = rrf_contribution(rank);
                by_key.insert(key.clone(), scored);
                order.push(key);
            }
        }
    }

    let mut fused: Vec<Scored<T>> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .map(|mut scored| {
            let normalized = scored.bm25_raw.map(normalize_bm25);
            scored.keyword_score = normalized;
            scored.fused_score = match (scored.semantic_score, normalized) {
                (Some(sem), Some(kw)) => SEMANTIC_WEIGHT * sem + KEYWORD_WEIGHT * kw,
                (Some(sem), None) => sem,
                (None, Some(kw)) => kw,
                (None, None) => 0.0,
            };
            scored
        })
        .collect();

    sort_fused(&mut fused);
    fused.truncate(limit);
    fused
}

/// One query variant's contribution to the refine-mode dedupe.
pub struct WeightedVariant<T> {
    pub weight: f32,
    pub results: Vec<Scored<T>>,
}

/// Multi-query weighted-RRF dedupe.
///
/// Each variant contributes `w / (K + r + 1)` for its item at 0-based rank
/// `r`. Duplicate sightings merge with the keep-best policy: maxima of the
/// numeric signals and the most informative snippet survive.
pub fn dedupe_weighted<T: DomainHit>(
    variants: Vec<WeightedVariant<T>>,
    limit: usize,
) -> Vec<Scored<T>> {
    let mut by_key: HashMap<T::Key, (Scored<T>, f32)> = HashMap::new();
    let mut order: Vec<T::Key> = Vec::new();

    for variant in variants {
        for (rank, scored) in variant.results.into_iter().enumerate() {
            let contribution = variant.weight / (RRF_K + rank as f32 + 1.0);
            let key = scored.hit.key();
            match by_key.get_mut(&key) {
                Some((existing, weighted)) => {
                    keep_best(existing, &scored);
                    *weighted += contribution;
                }
                None => {
                    by_key.insert(key.clone(), (scored, contribution));
                    order.push(key);
                }
            }
        }
    }

    let mut merged: Vec<(Scored<T>, f32)> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .map(|(mut scored, weighted)| {
            scored.rrf_score = weighted;
            (scored, weighted)
        })
        .collect();

    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(limit);
    merged.into_iter().map(|(scored, _)| scored).collect()
}

/// Merge `other` into `target`, preserving the maximum of every numeric
/// signal and the best snippet.
fn keep_best<T: DomainHit>(target: &mut Scored<T>, other: &Scored<T>) {
    target.hit.absorb(&other.hit);
    target.semantic_score = max_opt(target.semantic_score, other.semantic_score);
    target.bm25_raw = max_opt(target.bm25_raw, other.bm25_raw);
    target.keyword_score = max_opt(target.keyword_score, other.keyword_score);
    target.fused_score = target.fused_score.max(other.fused_score);
    target.semantic_rank = min_opt(target.semantic_rank, other.semantic_rank);
    target.keyword_rank = min_opt(target.keyword_rank, other.keyword_rank);
    if target.match_type != other.match_type {
        target.match_type = MatchType::Both;
    }
}

fn max_opt(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

fn min_opt(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::types::PageHit;

    fn page(book_id: i64, page_number: i64) -> PageHit {
        PageHit {
            book_id,
            page_number,
            text_snippet: format!("صفحه {page_number}"),
            highlighted_snippet: None,
        }
    }

    #[test]
    fn test_normalize_bm25_monotone_bounded() {
        assert_eq!(normalize_bm25(0.0), 0.0);
        assert!(normalize_bm25(8.0) - 0.5 < 1e-6);
        assert!(normalize_bm25(100.0) < 1.0);
        assert!(normalize_bm25(5.0) < normalize_bm25(10.0));
    }

    #[test]
    fn test_dual_engine_hit_outranks_single() {
        let semantic = vec![(page(1, 1), 0.6), (page(2, 2), 0.59)];
        let keyword = vec![(page(1, 1), 12.0)];
        let fused = fuse_hybrid(semantic, keyword, 10);

        assert_eq!(fused[0].hit.key(), (1, 1));
        assert_eq!(fused[0].match_type, MatchType::Both);
        // 0.8 * 0.6 + 0.3 * (12 / 20) = 0.66 > 0.59
        assert!((fused[0].fused_score - 0.66).abs() < 1e-3);
        assert_eq!(fused[1].match_type, MatchType::Semantic);
    }

    #[test]
    fn test_semantic_only_passthrough() {
        let fused = fuse_hybrid(vec![(page(1, 1), 0.7)], vec![], 10);
        assert_eq!(fused[0].fused_score, 0.7);
        assert_eq!(fused[0].match_type, MatchType::Semantic);
        assert!(fused[0].keyword_rank.is_none());
    }

    #[test]
    fn test_keyword_only_normalized() {
        let fused = fuse_hybrid(vec![], vec![(page(1, 1), 8.0)], 10);
        assert!((fused[0].fused_score - 0.5).abs() < 1e-6);
        assert_eq!(fused[0].match_type, MatchType::Keyword);
        assert!(fused[0].semantic_rank.is_none());
    }

    #[test]
    fn test_every_hybrid_item_carries_a_rank() {
        let semantic = vec![(page(1, 1), 0.6), (page(2, 2), 0.5)];
        let keyword = vec![(page(2, 2), 9.0), (page(3, 3), 7.0)];
        for scored in fuse_hybrid(semantic, keyword, 10) {
            assert!(scored.semantic_rank.is_some() || scored.keyword_rank.is_some());
        }
    }

    #[test]
    fn test_near_tie_broken_by_rrf() {
        // Two items whose fused scores differ by less than the epsilon; the
        // one seen by both engines has the larger RRF and must come first.
        let semantic = vec![(page(2, 2), 0.66004), (page(1, 1), 0.6)];
        let keyword = vec![(page(1, 1), 12.0)];
        let fused = fuse_hybrid(semantic, keyword, 10);

        assert!((fused[0].fused_score - fused[1].fused_score).abs() < TIE_EPSILON);
        assert_eq!(fused[0].hit.key(), (1, 1));
    }

    #[test]
    fn test_semantic_mode_equals_truncated_list() {
        let hits = vec![(page(1, 1), 0.9), (page(2, 2), 0.8), (page(3, 3), 0.7)];
        let ranked = semantic_ranked(hits, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].hit.key(), (1, 1));
        assert_eq!(ranked[0].fused_score, 0.9);
        assert_eq!(ranked[1].hit.key(), (2, 2));
    }

    #[test]
    fn test_keyword_mode_normalizes_in_order() {
        let hits = vec![(page(1, 1), 16.0), (page(2, 2), 8.0)];
        let ranked = keyword_ranked(hits, 10);
        assert!((ranked[0].fused_score - 16.0 / 24.0).abs() < 1e-6);
        assert!((ranked[1].fused_score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dedupe_ubiquitous_item_wins() {
        // Item (1,1) appears at rank 0 in all three variants; (2,2) appears
        // once at the same rank with the heaviest weight.
        let variants = vec![
            WeightedVariant {
                weight: 1.0,
                results: keyword_ranked(vec![(page(1, 1), 10.0)], 10),
            },
            WeightedVariant {
                weight: 0.9,
                results: keyword_ranked(vec![(page(2, 2), 10.0)], 10),
            },
            WeightedVariant {
                weight: 0.5,
                results: keyword_ranked(vec![(page(1, 1), 9.0)], 10),
            },
        ];
        let deduped = dedupe_weighted(variants, 10);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].hit.key(), (1, 1));
        assert!(deduped[0].rrf_score > deduped[1].rrf_score);
    }

    #[test]
    fn test_dedupe_keeps_max_signals() {
        let mut strong = keyword_ranked(vec![(page(1, 1), 20.0)], 10);
        strong[0].semantic_score = Some(0.9);

        let weak = keyword_ranked(vec![(page(1, 1), 5.0)], 10);

        let deduped = dedupe_weighted(
            vec![
                WeightedVariant { weight: 1.0, results: weak },
                WeightedVariant { weight: 0.5, results: strong },
            ],
            10,
        );
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].bm25_raw, Some(20.0));
        assert_eq!(deduped[0].semantic_score, Some(0.9));
    }

    #[test]
    fn test_dedupe_respects_limit() {
        let results: Vec<_> = (0..5).map(|i| (page(i, i), 10.0 - i as f32)).collect();
        let variants = vec![WeightedVariant {
            weight: 1.0,
            results: keyword_ranked(results, 10),
        }];
        assert_eq!(dedupe_weighted(variants, 3).len(), 3);
    }

    #[test]
    fn test_empty_inputs() {
        let fused: Vec<Scored<PageHit>> = fuse_hybrid(vec![], vec![], 10);
        assert!(fused.is_empty());
        let deduped: Vec<Scored<PageHit>> = dedupe_weighted(vec![], 10);
        assert!(deduped.is_empty());
    }
}
