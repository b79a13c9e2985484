use std::ops::Range;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalization::normalize_line;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub document_id: String,
    /// 1-based.
    pub page_number: u32,
    pub text: String,
    pub bbox: BBox,
    pub font_size: f32,
    pub is_bold: bool,
    /// Reading order within the document.
    pub order_index: usize,
}

/// Position of a block inside a [`BlockStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub usize);

/// All blocks of one collection run, grouped by document in insertion order.
#[derive(Debug, Clone, Default)]
pub struct BlockStore {
    blocks: Vec<TextBlock>,
    documents: IndexMap<String, Range<usize>>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one document's blocks and returns how many were kept.
    ///
    /// Text is normalized, empty blocks are dropped, and the remainder is ordered by
    /// `order_index`. Blocks claiming a different document id are re-homed under
    /// `document_id` so nothing crosses a document boundary. A document id that is
    /// already present is left as it is.
    pub fn insert_document(&mut self, document_id: &str, blocks: Vec<TextBlock>) -> usize {
        if self.documents.contains_key(document_id) {
            debug!(document = document_id, "document already stored");
            return 0;
        }
        let mut kept: Vec<TextBlock> = blocks
            .into_iter()
            .filter_map(|mut block| {
                block.text = normalize_line(&block.text);
                if block.text.is_empty() {
                    return None;
                }
                block.document_id = document_id.to_string();
                block.page_number = block.page_number.max(1);
                Some(block)
            })
            .collect();
        if kept.is_empty() {
            return 0;
        }
        kept.sort_by_key(|b| (b.order_index, b.page_number));
        let start = self.blocks.len();
        let count = kept.len();
        self.blocks.extend(kept);
        self.documents
            .insert(document_id.to_string(), start..start + count);
        count
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: BlockId) -> Option<&TextBlock> {
        self.blocks.get(id.0)
    }

    pub fn blocks(&self) -> &[TextBlock] {
        &self.blocks
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &TextBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(idx, block)| (BlockId(idx), block))
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(|k| k.as_str())
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn document_blocks(&self, document_id: &str) -> &[TextBlock] {
        self.documents
            .get(document_id)
            .map(|range| &self.blocks[range.clone()])
            .unwrap_or(&[])
    }

    pub fn document_range(&self, document_id: &str) -> Option<Range<usize>> {
        self.documents.get(document_id).cloned()
    }

    /// Blocks on the first `max_pages` pages of every document; all blocks when `None`.
    pub fn leading_pages(&self, max_pages: Option<u32>) -> impl Iterator<Item = &TextBlock> {
        self.blocks
            .iter()
            .filter(move |b| max_pages.map(|limit| b.page_number <= limit).unwrap_or(true))
    }
}

#[cfg(test)]
pub(crate) fn block(document_id: &str, page: u32, order: usize, size: f32, text: &str) -> TextBlock {
    TextBlock {
        document_id: document_id.to_string(),
        page_number: page,
        text: text.to_string(),
        bbox: BBox::new(0.0, 0.0, 100.0, size),
        font_size: size,
        is_bold: false,
        order_index: order,
    }
}
