use proptest::prelude::*;
use persona_rank_core::{
    BBox, BlockId, BlockStore, Candidate, FontStatClassifier, FusionConfig, FusionRanker,
    StructuralTag, TextBlock,
};

proptest! {
    #[test]
    fn ranks_are_contiguous(pool in candidate_pool(), top_k in 1usize..30) {
        let ranked = ranker(0.8, top_k).rank(pool.clone());
        prop_assert_eq!(ranked.len(), top_k.min(pool.len()));
        for (idx, section) in ranked.iter().enumerate() {
            prop_assert_eq!(section.rank, idx + 1);
        }
    }

    #[test]
    fn ranking_is_deterministic(pool in candidate_pool(), alpha in 0.0f32..=1.0) {
        let first = ranker(alpha, 15).rank(pool.clone());
        let second = ranker(alpha, 15).rank(pool);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn final_scores_never_increase(pool in candidate_pool(), alpha in 0.0f32..=1.0) {
        let ranked = ranker(alpha, 40).rank(pool);
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].final_score >= pair[1].final_score - 1e-5);
        }
    }

    #[test]
    fn alpha_one_follows_semantic_order(pool in candidate_pool()) {
        let ranked = ranker(1.0, 40).rank(pool);
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].semantic_score >= pair[1].semantic_score - 1e-5);
        }
    }

    #[test]
    fn alpha_zero_follows_keyword_order(pool in candidate_pool()) {
        let ranked = ranker(0.0, 40).rank(pool);
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].keyword_score >= pair[1].keyword_score - 1e-4);
        }
    }

    #[test]
    fn uniform_font_sizes_are_paragraphs(size in 4.0f32..40.0, count in 1usize..40, bold in any::<bool>()) {
        let mut store = BlockStore::new();
        let blocks = (0..count)
            .map(|i| TextBlock {
                document_id: "doc.pdf".to_string(),
                page_number: (i / 5) as u32 + 1,
                text: format!("block {i}"),
                bbox: BBox::default(),
                font_size: size,
                is_bold: bold && i % 2 == 0,
                order_index: i,
            })
            .collect();
        store.insert_document("doc.pdf", blocks);
        let classification = FontStatClassifier::default().classify(&store);
        prop_assert!(classification.tags.iter().all(|t| *t == StructuralTag::Paragraph));
    }
}

fn ranker(alpha: f32, top_k: usize) -> FusionRanker {
    FusionRanker::new(FusionConfig {
        alpha,
        top_k,
        ..FusionConfig::default()
    })
}

fn candidate_pool() -> impl Strategy<Value = Vec<Candidate>> {
    prop::collection::vec((-1.0f32..=1.0, 0.0f32..10.0, 0usize..3, 0usize..50), 0..40).prop_map(
        |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(idx, (semantic, keyword, doc, order))| Candidate {
                    block_id: BlockId(idx),
                    document_id: format!("doc-{doc}.pdf"),
                    page_number: 1,
                    order_index: order,
                    section_title: format!("section {idx}"),
                    semantic_score: semantic,
                    keyword_score: keyword,
                })
                .collect()
        },
    )
}
