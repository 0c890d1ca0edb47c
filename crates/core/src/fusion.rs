//! Weighted score fusion of the lexical and semantic result lists.
//!
//! Each method's raw scores are min-max normalized within its own list to
//! `[0, 1]` (a list of equal scores, including a single hit, normalizes to
//! 1.0). The fused score is
//! `lexical_weight * lexical + semantic_weight * semantic`, where a chunk
//! missing from one list contributes 0 for that term. Candidates are the union
//! of both lists.

use crate::error::RagError;
use crate::models::{FusedHit, FusedResult, MethodScore, ScoredChunk};
use crate::traits::{KeywordIndex, VectorIndex};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub lexical: f64,
    pub semantic: f64,
}

pub struct FusionRetriever<K, V>
where
    K: KeywordIndex,
    V: VectorIndex,
{
    keyword: K,
    vector: V,
    weights: FusionWeights,
    top_n: usize,
}

impl<K, V> FusionRetriever<K, V>
where
    K: KeywordIndex + Send + Sync,
    V: VectorIndex + Send + Sync,
{
    pub fn new(keyword: K, vector: V, weights: FusionWeights, top_n: usize) -> Self {
        Self {
            keyword,
            vector,
            weights,
            top_n,
        }
    }

    pub(crate) fn keyword(&self) -> &K {
        &self.keyword
    }

    pub(crate) fn vector(&self) -> &V {
        &self.vector
    }

    /// Queries both indexes for `k` candidates each and fuses the union.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<FusedResult, RagError> {
        if question.trim().is_empty() {
            return Err(RagError::EmptyQuestion);
        }
        if k == 0 || self.top_n == 0 {
            return Ok(FusedResult::empty(question));
        }

        let (lexical_hits, semantic_hits) = tokio::try_join!(
            self.keyword.search_keyword(question, k),
            self.vector.search_vector(question, k)
        )?;

        debug!(
            lexical = lexical_hits.len(),
            semantic = semantic_hits.len(),
            "retrieved candidates"
        );

        Ok(FusedResult {
            question: question.to_string(),
            hits: fuse(&lexical_hits, &semantic_hits, self.weights, self.top_n),
        })
    }
}

/// Merges two ranked lists. Order is fused score descending, then semantic
/// score descending, then chunk order.
pub fn fuse(
    lexical: &[ScoredChunk],
    semantic: &[ScoredChunk],
    weights: FusionWeights,
    top_n: usize,
) -> Vec<FusedHit> {
    let mut by_chunk: HashMap<usize, FusedHit> = HashMap::new();

    for (hit, score) in normalize(lexical) {
        let entry = by_chunk
            .entry(hit.chunk.chunk_index)
            .or_insert_with(|| empty_hit(hit));
        if entry.lexical.is_none() {
            entry.lexical = Some(score);
        }
    }

    for (hit, score) in normalize(semantic) {
        let entry = by_chunk
            .entry(hit.chunk.chunk_index)
            .or_insert_with(|| empty_hit(hit));
        if entry.semantic.is_none() {
            entry.semantic = Some(score);
        }
    }

    let mut fused: Vec<FusedHit> = by_chunk
        .into_values()
        .map(|mut hit| {
            hit.fused_score = weights.lexical * hit.lexical_normalized()
                + weights.semantic * hit.semantic_normalized();
            hit
        })
        .collect();

    fused.sort_by(|left, right| {
        right
            .fused_score
            .total_cmp(&left.fused_score)
            .then(right.semantic_normalized().total_cmp(&left.semantic_normalized()))
            .then(left.chunk.chunk_index.cmp(&right.chunk.chunk_index))
    });
    fused.truncate(top_n);
    fused
}

fn empty_hit(hit: &ScoredChunk) -> FusedHit {
    FusedHit {
        chunk: hit.chunk.clone(),
        fused_score: 0.0,
        lexical: None,
        semantic: None,
    }
}

/// Min-max over the finite scores of one list. A NaN or infinite score
/// normalizes to 0.0 so it can never lead the fused order.
fn normalize(hits: &[ScoredChunk]) -> Vec<(&ScoredChunk, MethodScore)> {
    let bounds = min_max(hits);

    hits.iter()
        .map(|hit| {
            let normalized = match bounds {
                Some((min, max)) if hit.score.is_finite() => {
                    let range = max - min;
                    if range < f64::EPSILON {
                        1.0
                    } else {
                        (hit.score - min) / range
                    }
                }
                _ => 0.0,
            };
            (
                hit,
                MethodScore {
                    raw: hit.score,
                    normalized,
                    rank: hit.rank,
                },
            )
        })
        .collect()
}

fn min_max(hits: &[ScoredChunk]) -> Option<(f64, f64)> {
    hits.iter()
        .map(|hit| hit.score)
        .filter(|score| score.is_finite())
        .fold(None, |bounds, score| match bounds {
            None => Some((score, score)),
            Some((min, max)) => Some((min.min(score), max.max(score))),
        })
}
