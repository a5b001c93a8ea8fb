//! Score fusion for hybrid retrieval
//!
//! Two fusion modes over the dense and keyword candidate lists:
//! - Weighted sum of min-max normalized scores: s = α·dense + (1−α)·bm25
//! - Reciprocal rank fusion: s = Σ 1/(c + rank), c = 60
//!
//! Chunks are deduplicated by id. Ties break on the higher dense score,
//! then the lower chunk id.

use crate::RetrievedChunk;
use std::collections::HashMap;
use uuid::Uuid;

/// Fusion mode selected by configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionMode {
    /// α·dense + (1−α)·bm25 over min-max normalized scores
    Weighted { alpha: f32 },
    /// Reciprocal rank fusion with constant c
    Rrf { c: f32 },
}

impl FusionMode {
    /// Parse the configuration knob; unknown values fall back to weighted
    pub fn from_config(mode: &str, alpha: f32, rrf_c: f32) -> Self {
        match mode {
            "rrf" => FusionMode::Rrf { c: rrf_c },
            "weighted" => FusionMode::Weighted { alpha },
            other => {
                tracing::warn!(mode = other, "Unknown fusion mode, using weighted");
                FusionMode::Weighted { alpha }
            }
        }
    }
}

struct Candidate {
    chunk: RetrievedChunk,
    dense_score: f32,
    dense_norm: Option<f32>,
    dense_rank: Option<usize>,
    bm25_norm: Option<f32>,
    bm25_rank: Option<usize>,
}

/// Min-max normalize a score list into [0, 1]
fn min_max(scores: &[f32]) -> Vec<f32> {
    let Some(&max) = scores.iter().max_by(|a, b| a.total_cmp(b)) else {
        return Vec::new();
    };
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let range = max - min;
    if range <= f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Fuse dense and keyword results into a single ranked list of up to
/// `limit` chunks
pub fn fuse(
    dense: Vec<RetrievedChunk>,
    keyword: Vec<RetrievedChunk>,
    mode: FusionMode,
    limit: usize,
) -> Vec<RetrievedChunk> {
    let dense_norms = min_max(&dense.iter().map(|c| c.score).collect::<Vec<_>>());
    let bm25_norms = min_max(&keyword.iter().map(|c| c.score).collect::<Vec<_>>());

    let mut candidates: HashMap<Uuid, Candidate> = HashMap::new();

    for (rank, chunk) in dense.into_iter().enumerate() {
        candidates.insert(
            chunk.chunk_id,
            Candidate {
                dense_score: chunk.score,
                dense_norm: Some(dense_norms[rank]),
                dense_rank: Some(rank + 1),
                bm25_norm: None,
                bm25_rank: None,
                chunk,
            },
        );
    }

    for (rank, chunk) in keyword.into_iter().enumerate() {
        match candidates.get_mut(&chunk.chunk_id) {
            Some(candidate) => {
                candidate.bm25_norm = Some(bm25_norms[rank]);
                candidate.bm25_rank = Some(rank + 1);
            }
            None => {
                candidates.insert(
                    chunk.chunk_id,
                    Candidate {
                        dense_score: 0.0,
                        dense_norm: None,
                        dense_rank: None,
                        bm25_norm: Some(bm25_norms[rank]),
                        bm25_rank: Some(rank + 1),
                        chunk,
                    },
                );
            }
        }
    }

    let mut fused: Vec<(f32, f32, RetrievedChunk)> = candidates
        .into_values()
        .map(|candidate| {
            let score = match mode {
                FusionMode::Weighted { alpha } => {
                    alpha * candidate.dense_norm.unwrap_or(0.0)
                        + (1.0 - alpha) * candidate.bm25_norm.unwrap_or(0.0)
                }
                FusionMode::Rrf { c } => {
                    let dense = candidate.dense_rank.map(|r| 1.0 / (c + r as f32)).unwrap_or(0.0);
                    let bm25 = candidate.bm25_rank.map(|r| 1.0 / (c + r as f32)).unwrap_or(0.0);
                    dense + bm25
                }
            };
            (score, candidate.dense_score, candidate.chunk)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| b.1.total_cmp(&a.1))
            .then_with(|| a.2.chunk_id.cmp(&b.2.chunk_id))
    });
    fused.truncate(limit);

    // Normalize RRF scores to [0, 1] so downstream thresholds see one scale
    let max_score = fused.first().map(|(s, _, _)| *s).unwrap_or(0.0);

    fused
        .into_iter()
        .map(|(score, _, mut chunk)| {
            chunk.score = if matches!(mode, FusionMode::Rrf { .. }) && max_score > 0.0 {
                score / max_score
            } else {
                score
            };
            chunk
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::chunk;

    #[test]
    fn test_weighted_fusion_prefers_both_lists() {
        // A and B in dense, B and D in keyword; B should come first
        let dense = vec![chunk(1, "a", 0.9), chunk(2, "b", 0.8), chunk(3, "c", 0.7)];
        let keyword = vec![chunk(2, "b", 0.9), chunk(1, "a", 0.6), chunk(4, "d", 0.5)];

        let fused = fuse(dense, keyword, FusionMode::Weighted { alpha: 0.5 }, 10);

        assert_eq!(fused[0].chunk_id, Uuid::from_u128(2));
        assert!(fused.iter().any(|c| c.chunk_id == Uuid::from_u128(4)));
    }

    #[test]
    fn test_rrf_fusion_prefers_both_lists() {
        let dense = vec![chunk(1, "a", 0.9), chunk(2, "b", 0.8), chunk(3, "c", 0.7)];
        let keyword = vec![chunk(2, "b", 0.9), chunk(1, "a", 0.6), chunk(4, "d", 0.5)];

        let fused = fuse(dense, keyword, FusionMode::Rrf { c: 60.0 }, 10);

        // B at ranks (2, 1) beats A at ranks (1, 2) only on tie-break; both
        // must outrank single-list C and D
        let top_two: Vec<Uuid> = fused[..2].iter().map(|c| c.chunk_id).collect();
        assert!(top_two.contains(&Uuid::from_u128(1)));
        assert!(top_two.contains(&Uuid::from_u128(2)));
        assert!((fused[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_alpha_one_is_dense_only_ordering() {
        let dense = vec![chunk(1, "a", 0.9), chunk(2, "b", 0.5)];
        let keyword = vec![chunk(2, "b", 0.99)];

        let fused = fuse(dense, keyword, FusionMode::Weighted { alpha: 1.0 }, 10);
        assert_eq!(fused[0].chunk_id, Uuid::from_u128(1));
    }

    #[test]
    fn test_dedup_keeps_single_entry() {
        let dense = vec![chunk(7, "a", 0.9)];
        let keyword = vec![chunk(7, "a", 0.8)];

        let fused = fuse(dense, keyword, FusionMode::Weighted { alpha: 0.7 }, 10);
        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn test_tie_break_on_dense_then_id() {
        // Two chunks present only in the keyword list share a fused score;
        // the lower chunk id wins
        let keyword = vec![chunk(9, "a", 0.5), chunk(8, "b", 0.5)];
        let fused = fuse(Vec::new(), keyword, FusionMode::Weighted { alpha: 0.7 }, 10);
        assert_eq!(fused[0].chunk_id, Uuid::from_u128(8));
    }

    #[test]
    fn test_limit_is_respected() {
        let dense: Vec<_> = (1..=8).map(|i| chunk(i, "a", 1.0 - i as f32 * 0.1)).collect();
        let fused = fuse(dense, Vec::new(), FusionMode::Rrf { c: 60.0 }, 3);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_min_max_constant_scores() {
        assert_eq!(min_max(&[0.5, 0.5]), vec![1.0, 1.0]);
        assert!(min_max(&[]).is_empty());
    }
}
