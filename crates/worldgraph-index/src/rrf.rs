//! Reciprocal rank fusion of the vector and full-text rankings.

use std::collections::BTreeMap;

use worldgraph_core::ChunkId;

/// Damping constant: keeps the top few ranks from dominating the fused score.
pub const RRF_K: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: ChunkId,
    /// 1-based rank in the vector list.
    pub vec_rank: Option<usize>,
    /// 1-based rank in the full-text list.
    pub fts_rank: Option<usize>,
    pub score: f64,
}

/// `1/(k + fts_rank) + 1/(k + vec_rank)`, a missing rank contributing 0.
pub fn rrf_score(vec_rank: Option<usize>, fts_rank: Option<usize>) -> f64 {
    let part = |rank: Option<usize>| rank.map(|r| 1.0 / (RRF_K + r as f64)).unwrap_or(0.0);
    part(fts_rank) + part(vec_rank)
}

/// Full outer join of two ranked id lists (best first), scored with
/// [`rrf_score`], sorted by score descending (ties by id) and truncated.
pub fn fuse(vec_ids: &[ChunkId], fts_ids: &[ChunkId], limit: usize) -> Vec<FusedCandidate> {
    let mut ranks: BTreeMap<&ChunkId, (Option<usize>, Option<usize>)> = BTreeMap::new();
    for (i, id) in vec_ids.iter().enumerate() {
        ranks.entry(id).or_default().0.get_or_insert(i + 1);
    }
    for (i, id) in fts_ids.iter().enumerate() {
        ranks.entry(id).or_default().1.get_or_insert(i + 1);
    }

    let mut out: Vec<FusedCandidate> = ranks
        .into_iter()
        .map(|(id, (vec_rank, fts_rank))| FusedCandidate {
            chunk_id: id.clone(),
            vec_rank,
            fts_rank,
            score: rrf_score(vec_rank, fts_rank),
        })
        .collect();
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    out.truncate(limit);
    out
}
