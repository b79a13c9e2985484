use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::block::{BlockStore, TextBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralTag {
    Heading,
    Paragraph,
    Footnote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub heading_ratio: f32,
    pub bold_heading_ratio: f32,
    pub footnote_ratio: f32,
    /// Headings at or above this ratio are level 1.
    pub title_ratio: f32,
    /// Leading pages per document used for the statistics; `None` samples everything.
    pub sample_pages: Option<u32>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            heading_ratio: 1.2,
            bold_heading_ratio: 1.1,
            footnote_ratio: 0.8,
            title_ratio: 1.5,
            sample_pages: Some(5),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FontStats {
    pub mean: f32,
    pub std_dev: f32,
    pub bold_fraction: f32,
    pub distinct_sizes: usize,
    pub sample_len: usize,
}

impl FontStats {
    /// Thresholds are meaningless when every sampled block shares one size.
    pub fn is_uniform(&self) -> bool {
        self.distinct_sizes < 2
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub stats: FontStats,
    /// Parallel to the store's blocks.
    pub tags: Vec<StructuralTag>,
    /// Parallel to `tags`; `Some` only for headings.
    pub heading_levels: Vec<Option<u8>>,
}

impl Classification {
    pub fn tag_counts(&self) -> BTreeMap<StructuralTag, usize> {
        let mut counts = BTreeMap::new();
        for tag in &self.tags {
            *counts.entry(*tag).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Default)]
pub struct FontStatClassifier {
    config: ClassifierConfig,
}

impl FontStatClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Stats pass over a block sample.
    pub fn compute_stats<'a, It>(&self, sample: It) -> FontStats
    where
        It: IntoIterator<Item = &'a TextBlock>,
    {
        let mut sizes: Vec<f32> = Vec::new();
        let mut bold = 0usize;
        for block in sample {
            if !block.font_size.is_finite() || block.font_size <= 0.0 {
                continue;
            }
            sizes.push(block.font_size);
            if block.is_bold {
                bold += 1;
            }
        }
        if sizes.is_empty() {
            return FontStats::default();
        }
        let n = sizes.len() as f32;
        let mean = sizes.iter().sum::<f32>() / n;
        let variance = sizes.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
        let mut distinct: Vec<u32> = sizes.iter().map(|s| (s * 100.0).round() as u32).collect();
        distinct.sort_unstable();
        distinct.dedup();
        FontStats {
            mean,
            std_dev: variance.sqrt(),
            bold_fraction: bold as f32 / n,
            distinct_sizes: distinct.len(),
            sample_len: sizes.len(),
        }
    }

    /// Tag pass; depends only on the block and the precomputed stats.
    pub fn tag(&self, block: &TextBlock, stats: &FontStats) -> StructuralTag {
        if stats.is_uniform() || stats.mean <= 0.0 {
            return StructuralTag::Paragraph;
        }
        let size = block.font_size;
        let mean = stats.mean;
        if size > self.config.heading_ratio * mean
            || (block.is_bold && size > self.config.bold_heading_ratio * mean)
        {
            StructuralTag::Heading
        } else if size < self.config.footnote_ratio * mean {
            StructuralTag::Footnote
        } else {
            StructuralTag::Paragraph
        }
    }

    pub fn heading_level(&self, block: &TextBlock, stats: &FontStats) -> u8 {
        if block.font_size >= self.config.title_ratio * stats.mean {
            1
        } else {
            2
        }
    }

    #[instrument(skip_all, fields(blocks = store.len()))]
    pub fn classify(&self, store: &BlockStore) -> Classification {
        let stats = self.compute_stats(store.leading_pages(self.config.sample_pages));
        debug!(
            mean = stats.mean,
            std_dev = stats.std_dev,
            distinct = stats.distinct_sizes,
            "font statistics"
        );
        let mut tags = Vec::with_capacity(store.len());
        let mut heading_levels = Vec::with_capacity(store.len());
        for block in store.blocks() {
            let tag = self.tag(block, &stats);
            heading_levels.push(match tag {
                StructuralTag::Heading => Some(self.heading_level(block, &stats)),
                _ => None,
            });
            tags.push(tag);
        }
        Classification {
            stats,
            tags,
            heading_levels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::block;

    fn store_of(sizes: &[(f32, bool)]) -> BlockStore {
        let mut store = BlockStore::new();
        let blocks = sizes
            .iter()
            .enumerate()
            .map(|(i, (size, bold))| {
                let mut b = block("doc.pdf", 1, i, *size, "some text");
                b.is_bold = *bold;
                b
            })
            .collect();
        store.insert_document("doc.pdf", blocks);
        store
    }

    #[test]
    fn uniform_sizes_are_all_paragraphs() {
        let store = store_of(&[(11.0, true), (11.0, false), (11.0, false)]);
        let result = FontStatClassifier::default().classify(&store);
        assert!(result.stats.is_uniform());
        assert!(result.tags.iter().all(|t| *t == StructuralTag::Paragraph));
    }

    #[test]
    fn applies_relative_thresholds() {
        // mean = 10.0
        let store = store_of(&[
            (13.0, false),
            (11.5, true),
            (11.5, false),
            (7.0, false),
            (7.0, false),
        ]);
        let classifier = FontStatClassifier::default();
        let result = classifier.classify(&store);
        assert!((result.stats.mean - 10.0).abs() < 1e-5);
        assert_eq!(
            result.tags,
            vec![
                StructuralTag::Heading,
                StructuralTag::Heading,
                StructuralTag::Paragraph,
                StructuralTag::Footnote,
                StructuralTag::Footnote,
            ]
        );
        assert_eq!(result.heading_levels[0], Some(2));
        assert_eq!(result.heading_levels[2], None);
    }

    #[test]
    fn large_headings_are_level_one() {
        let store = store_of(&[(24.0, true), (10.0, false), (10.0, false), (10.0, false)]);
        let result = FontStatClassifier::default().classify(&store);
        assert_eq!(result.tags[0], StructuralTag::Heading);
        assert_eq!(result.heading_levels[0], Some(1));
    }

    #[test]
    fn never_drops_blocks() {
        let store = store_of(&[(20.0, false), (10.0, false), (5.0, false)]);
        let result = FontStatClassifier::default().classify(&store);
        assert_eq!(result.tags.len(), store.len());
        let counts = result.tag_counts();
        assert_eq!(counts.values().sum::<usize>(), 3);
    }

    #[test]
    fn samples_leading_pages_only() {
        let mut store = BlockStore::new();
        let mut blocks: Vec<TextBlock> = (0..4)
            .map(|i| block("doc.pdf", 1, i, 10.0, "body"))
            .collect();
        // A huge font on a late page must not shift the mean.
        blocks.push(block("doc.pdf", 9, 10, 90.0, "appendix"));
        store.insert_document("doc.pdf", blocks);
        let result = FontStatClassifier::default().classify(&store);
        assert!((result.stats.mean - 10.0).abs() < 1e-5);
        assert_eq!(result.stats.sample_len, 4);
        // The sample is uniform, so every block is a paragraph.
        assert_eq!(result.tags[4], StructuralTag::Paragraph);
    }

    #[test]
    fn empty_store_classifies_nothing() {
        let result = FontStatClassifier::default().classify(&BlockStore::new());
        assert!(result.tags.is_empty());
        assert_eq!(result.stats.sample_len, 0);
    }
}
