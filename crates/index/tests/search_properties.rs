use persona_rank_index::{ExactIndex, VectorIndex};
use proptest::prelude::*;

proptest! {
    #[test]
    fn exact_search_is_sorted_and_bounded(
        vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 6), 0..40),
        query in prop::collection::vec(-1.0f32..1.0, 6),
        k in 0usize..50,
    ) {
        let ids: Vec<usize> = (0..vectors.len()).collect();
        let count = vectors.len();
        let index = ExactIndex::new(vectors, ids, 6).unwrap();
        let hits = index.search(&query, k).unwrap();
        prop_assert_eq!(hits.len(), k.min(count));
        for pair in hits.windows(2) {
            prop_assert!(
                pair[0].similarity > pair[1].similarity
                    || (pair[0].similarity == pair[1].similarity
                        && pair[0].position < pair[1].position)
            );
        }
    }

    #[test]
    fn exact_search_is_repeatable(
        vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), 1..30),
        query in prop::collection::vec(-1.0f32..1.0, 4),
    ) {
        let ids: Vec<usize> = (0..vectors.len()).collect();
        let index = ExactIndex::new(vectors, ids, 4).unwrap();
        let first = index.search(&query, 10).unwrap();
        let second = index.search(&query, 10).unwrap();
        prop_assert_eq!(first, second);
    }
}
