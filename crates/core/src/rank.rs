use std::cmp::Ordering;
use std::collections::HashMap;

use persona_rank_index::VectorIndex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::block::{BlockId, BlockStore};
use crate::classify::{Classification, StructuralTag};
use crate::error::Result;
use crate::keyword::{KeywordAggregation, KeywordScorer};

/// Final scores closer than this are treated as equal.
const SCORE_QUANTUM: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleSource {
    #[default]
    OwnText,
    /// Closest preceding heading of the same document.
    NearestHeading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Weight of the semantic signal; the keyword signal gets `1 - alpha`.
    pub alpha: f32,
    pub top_k: usize,
    /// Neighbors pulled from the index before fusion; `None` scores every block.
    pub candidate_pool: Option<usize>,
    /// Optional cap on sections per document. Off by default.
    pub max_per_document: Option<usize>,
    pub aggregation: KeywordAggregation,
    pub title_source: TitleSource,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            alpha: 0.8,
            top_k: 15,
            candidate_pool: Some(40),
            max_per_document: None,
            aggregation: KeywordAggregation::LogSum,
            title_source: TitleSource::OwnText,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub block_id: BlockId,
    pub document_id: String,
    pub page_number: u32,
    pub order_index: usize,
    pub section_title: String,
    pub semantic_score: f32,
    pub keyword_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSection {
    pub block_id: BlockId,
    pub document_id: String,
    pub page_number: u32,
    pub section_title: String,
    pub semantic_score: f32,
    pub keyword_score: f32,
    pub keyword_score_normalized: f32,
    pub final_score: f32,
    pub rank: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FusionRanker {
    config: FusionConfig,
}

impl FusionRanker {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn search_depth(&self, pool_len: usize) -> usize {
        match self.config.candidate_pool {
            Some(pool) => pool.max(self.config.top_k).min(pool_len),
            None => pool_len,
        }
    }

    /// Pulls the semantic neighbors of `query` and attaches their keyword importance.
    #[instrument(skip_all, fields(blocks = store.len()))]
    pub fn gather_candidates(
        &self,
        store: &BlockStore,
        classification: &Classification,
        index: &dyn VectorIndex<BlockId>,
        query: &[f32],
        scorer: &dyn KeywordScorer,
        language: &str,
    ) -> Result<Vec<Candidate>> {
        let depth = self.search_depth(index.len());
        let neighbors = index.search(query, depth)?;
        let candidates = neighbors
            .into_iter()
            .filter_map(|neighbor| {
                let block = store.get(neighbor.id)?;
                let keywords = scorer.score(&block.text, language);
                Some(Candidate {
                    block_id: neighbor.id,
                    document_id: block.document_id.clone(),
                    page_number: block.page_number,
                    order_index: block.order_index,
                    section_title: self.section_title(store, classification, neighbor.id),
                    semantic_score: neighbor.similarity,
                    keyword_score: self.config.aggregation.aggregate(&keywords),
                })
            })
            .collect::<Vec<_>>();
        debug!(depth, candidates = candidates.len(), "gathered candidates");
        Ok(candidates)
    }

    fn section_title(
        &self,
        store: &BlockStore,
        classification: &Classification,
        id: BlockId,
    ) -> String {
        let own = store.get(id).map(|b| b.text.clone()).unwrap_or_default();
        if self.config.title_source == TitleSource::OwnText {
            return own;
        }
        let Some(block) = store.get(id) else {
            return own;
        };
        let Some(range) = store.document_range(&block.document_id) else {
            return own;
        };
        (range.start..=id.0)
            .rev()
            .find(|idx| classification.tags.get(*idx) == Some(&StructuralTag::Heading))
            .and_then(|idx| store.get(BlockId(idx)))
            .map(|heading| heading.text.clone())
            .unwrap_or(own)
    }

    /// Fuses, orders and cuts the candidate pool. Pure in its inputs.
    pub fn rank(&self, candidates: Vec<Candidate>) -> Vec<ScoredSection> {
        if candidates.is_empty() {
            info!("empty candidate pool, nothing to rank");
            return Vec::new();
        }
        let alpha = self.config.alpha.clamp(0.0, 1.0);
        let keyword: Vec<f32> = candidates
            .iter()
            .map(|c| sanitize_keyword(c.keyword_score))
            .collect();
        let normalized = min_max(&keyword);

        let mut scored: Vec<(i64, ScoredSection, usize)> = candidates
            .into_iter()
            .zip(keyword)
            .zip(normalized)
            .map(|((candidate, keyword_score), keyword_norm)| {
                let semantic = sanitize_semantic(candidate.semantic_score);
                let final_score =
                    alpha as f64 * semantic as f64 + (1.0 - alpha as f64) * keyword_norm as f64;
                let section = ScoredSection {
                    block_id: candidate.block_id,
                    document_id: candidate.document_id,
                    page_number: candidate.page_number,
                    section_title: candidate.section_title,
                    semantic_score: semantic,
                    keyword_score,
                    keyword_score_normalized: keyword_norm,
                    final_score: final_score as f32,
                    rank: 0,
                };
                (quantize(final_score), section, candidate.order_index)
            })
            .collect();

        scored.sort_by(|a, b| match b.0.cmp(&a.0) {
            Ordering::Equal => a
                .2
                .cmp(&b.2)
                .then_with(|| a.1.document_id.cmp(&b.1.document_id))
                .then_with(|| a.1.block_id.cmp(&b.1.block_id)),
            other => other,
        });

        let mut per_document: HashMap<String, usize> = HashMap::new();
        let mut ranked = Vec::with_capacity(self.config.top_k.min(scored.len()));
        for (_, mut section, _) in scored {
            if ranked.len() == self.config.top_k {
                break;
            }
            if let Some(cap) = self.config.max_per_document {
                let taken = per_document.entry(section.document_id.clone()).or_insert(0);
                if *taken >= cap {
                    continue;
                }
                *taken += 1;
            }
            section.rank = ranked.len() + 1;
            ranked.push(section);
        }
        if ranked.len() < self.config.top_k {
            info!(
                available = ranked.len(),
                top_k = self.config.top_k,
                "fewer sections than requested"
            );
        }
        ranked
    }
}

fn sanitize_semantic(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        -1.0
    }
}

fn sanitize_keyword(score: f32) -> f32 {
    if score.is_finite() && score > 0.0 {
        score
    } else {
        0.0
    }
}

/// Min-max onto [0, 1]; a flat pool maps to all zeros.
pub fn min_max(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let span = max - min;
    if !span.is_finite() || span <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / span).collect()
}

fn quantize(score: f64) -> i64 {
    (score / SCORE_QUANTUM).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::block;
    use crate::classify::FontStatClassifier;
    use persona_rank_index::ExactIndex;

    fn candidate(id: usize, doc: &str, order: usize, semantic: f32, keyword: f32) -> Candidate {
        Candidate {
            block_id: BlockId(id),
            document_id: doc.to_string(),
            page_number: 1,
            order_index: order,
            section_title: format!("block {id}"),
            semantic_score: semantic,
            keyword_score: keyword,
        }
    }

    fn ranker(alpha: f32, top_k: usize) -> FusionRanker {
        FusionRanker::new(FusionConfig {
            alpha,
            top_k,
            ..FusionConfig::default()
        })
    }

    fn order(sections: &[ScoredSection]) -> Vec<usize> {
        sections.iter().map(|s| s.block_id.0).collect()
    }

    #[test]
    fn three_block_scenario() {
        let ranked = ranker(0.8, 15).rank(vec![
            candidate(1, "a.pdf", 0, 0.9, 0.1),
            candidate(2, "a.pdf", 1, 0.9, 0.9),
            candidate(3, "a.pdf", 2, 0.2, 0.9),
        ]);
        assert_eq!(order(&ranked), vec![2, 1, 3]);
        let finals: Vec<f32> = ranked.iter().map(|s| s.final_score).collect();
        assert!((finals[0] - 0.92).abs() < 1e-5);
        assert!((finals[1] - 0.72).abs() < 1e-5);
        assert!((finals[2] - 0.36).abs() < 1e-5);
        assert_eq!(ranked.iter().map(|s| s.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn equal_keyword_scores_normalize_to_zero() {
        assert_eq!(min_max(&[0.4, 0.4, 0.4]), vec![0.0, 0.0, 0.0]);
        let ranked = ranker(0.5, 3).rank(vec![
            candidate(1, "a.pdf", 0, 0.2, 2.0),
            candidate(2, "a.pdf", 1, 0.6, 2.0),
        ]);
        assert_eq!(order(&ranked), vec![2, 1]);
        assert!(ranked.iter().all(|s| s.keyword_score_normalized == 0.0));
    }

    #[test]
    fn ties_break_on_reading_order_then_document() {
        let ranked = ranker(1.0, 10).rank(vec![
            candidate(5, "b.pdf", 3, 0.5, 0.0),
            candidate(6, "a.pdf", 3, 0.5, 0.0),
            candidate(7, "c.pdf", 1, 0.5, 0.0),
        ]);
        assert_eq!(order(&ranked), vec![7, 6, 5]);
    }

    #[test]
    fn float_noise_falls_through_to_tie_breaks() {
        let ranked = ranker(1.0, 10).rank(vec![
            candidate(1, "a.pdf", 9, 0.700_000_1, 0.0),
            candidate(2, "a.pdf", 2, 0.7, 0.0),
        ]);
        assert_eq!(order(&ranked), vec![2, 1]);
    }

    #[test]
    fn never_pads_short_pools() {
        let ranked = ranker(0.8, 15).rank(vec![candidate(1, "a.pdf", 0, 0.3, 1.0)]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rank, 1);
    }

    #[test]
    fn empty_pool_is_not_an_error() {
        assert!(ranker(0.8, 15).rank(Vec::new()).is_empty());
    }

    #[test]
    fn alpha_bounds_select_single_signal() {
        let pool = vec![
            candidate(1, "a.pdf", 0, 0.9, 0.0),
            candidate(2, "a.pdf", 1, 0.5, 5.0),
            candidate(3, "a.pdf", 2, 0.1, 2.0),
        ];
        assert_eq!(order(&ranker(1.0, 3).rank(pool.clone())), vec![1, 2, 3]);
        assert_eq!(order(&ranker(0.0, 3).rank(pool)), vec![2, 3, 1]);
    }

    #[test]
    fn invalid_scores_are_sanitized() {
        let ranked = ranker(0.5, 3).rank(vec![
            candidate(1, "a.pdf", 0, f32::NAN, -3.0),
            candidate(2, "a.pdf", 1, 0.0, f32::INFINITY),
            candidate(3, "a.pdf", 2, 0.1, 1.0),
        ]);
        assert_eq!(order(&ranked), vec![3, 2, 1]);
        assert_eq!(ranked[2].semantic_score, -1.0);
        assert_eq!(ranked[1].keyword_score, 0.0);
    }

    #[test]
    fn per_document_cap_when_configured() {
        let capped = FusionRanker::new(FusionConfig {
            alpha: 1.0,
            top_k: 3,
            max_per_document: Some(1),
            ..FusionConfig::default()
        });
        let ranked = capped.rank(vec![
            candidate(1, "a.pdf", 0, 0.9, 0.0),
            candidate(2, "a.pdf", 1, 0.8, 0.0),
            candidate(3, "b.pdf", 0, 0.7, 0.0),
        ]);
        assert_eq!(order(&ranked), vec![1, 3]);
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn gathers_candidates_with_heading_titles() {
        let mut store = BlockStore::new();
        store.insert_document(
            "guide.pdf",
            vec![
                block("guide.pdf", 1, 0, 20.0, "Coastal Adventures"),
                block("guide.pdf", 1, 1, 10.0, "Beach hopping along the coast"),
                block("guide.pdf", 1, 2, 10.0, "Kayaking tours leave at dawn"),
            ],
        );
        let classification = FontStatClassifier::default().classify(&store);
        assert_eq!(classification.tags[0], StructuralTag::Heading);
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]];
        let ids: Vec<BlockId> = (0..3).map(BlockId).collect();
        let index = ExactIndex::new(vectors, ids, 2).unwrap();
        let ranker = FusionRanker::new(FusionConfig {
            title_source: TitleSource::NearestHeading,
            ..FusionConfig::default()
        });
        let scorer = crate::keyword::TermFrequencyScorer::default();
        let candidates = ranker
            .gather_candidates(&store, &classification, &index, &[0.0, 1.0], &scorer, "en")
            .unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].block_id, BlockId(1));
        assert_eq!(candidates[0].section_title, "Coastal Adventures");
        assert!(candidates[0].keyword_score > 0.0);
    }

    #[test]
    fn search_depth_covers_top_k() {
        let ranker = FusionRanker::new(FusionConfig {
            top_k: 50,
            candidate_pool: Some(40),
            ..FusionConfig::default()
        });
        assert_eq!(ranker.search_depth(1000), 50);
        assert_eq!(ranker.search_depth(12), 12);
    }
}
