use proptest::prelude::*;
use worldgraph_core::ChunkId;
use worldgraph_index::{fuse, rrf_score};

proptest! {
    #[test]
    fn fused_scores_are_sorted_and_bounded(
        vec_ids in proptest::collection::vec("[a-f]{1,2}", 0..12),
        fts_ids in proptest::collection::vec("[a-f]{1,2}", 0..12),
        limit in 1usize..20,
    ) {
        let vec_ids: Vec<ChunkId> = vec_ids.into_iter().map(ChunkId::from_stored).collect();
        let fts_ids: Vec<ChunkId> = fts_ids.into_iter().map(ChunkId::from_stored).collect();
        let fused = fuse(&vec_ids, &fts_ids, limit);

        prop_assert!(fused.len() <= limit);
        for pair in fused.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
        for candidate in &fused {
            prop_assert!(candidate.vec_rank.is_some() || candidate.fts_rank.is_some());
            prop_assert!(candidate.score <= rrf_score(Some(1), Some(1)) + 1e-12);
            prop_assert_eq!(candidate.score, rrf_score(candidate.vec_rank, candidate.fts_rank));
        }
    }
}
