use std::collections::BTreeMap;
use std::path::Path;

use lopdf::content::Operation;
use lopdf::{Document, Encoding, Object};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::block::{BBox, TextBlock};
use crate::error::{RankError, Result};
use crate::normalization::{join_lines, normalize_line};

/// Produces the text blocks of one PDF.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<TextBlock>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Group consecutive compatible lines into one block.
    pub merge_lines: bool,
    /// Baseline distance, in points, under which spans share a line.
    pub line_tolerance: f32,
    /// Largest line gap, as a multiple of the font size, that keeps lines in one block.
    pub block_gap_factor: f32,
    pub plain_text_fallback: bool,
    /// Font size assigned to blocks from the plain-text fallback.
    pub nominal_font_size: f32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            merge_lines: true,
            line_tolerance: 2.0,
            block_gap_factor: 1.5,
            plain_text_fallback: true,
            nominal_font_size: 12.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlineEntry {
    pub title: String,
    pub level: usize,
    pub page_number: u32,
}

/// Metadata and bookmark outline of one PDF.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentInfo {
    pub document_id: String,
    /// Info dictionary title, or the file stem when missing.
    pub title: String,
    pub author: Option<String>,
    pub page_count: usize,
    pub outline: Vec<OutlineEntry>,
}

/// Content-stream walker over lopdf with a `pdf-extract` page-text fallback.
#[derive(Debug, Clone, Default)]
pub struct PdfExtractor {
    config: ExtractConfig,
}

impl PdfExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    fn unreadable(path: &Path, reason: impl Into<String>) -> RankError {
        RankError::UnreadablePdf {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    fn load(path: &Path) -> Result<Document> {
        let doc = Document::load(path).map_err(|e| Self::unreadable(path, e.to_string()))?;
        if doc.is_encrypted() {
            return Err(Self::unreadable(path, "encrypted without a supplied password"));
        }
        Ok(doc)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn document_info(&self, path: &Path) -> Result<DocumentInfo> {
        let doc = Self::load(path)?;
        let title = info_text(&doc, b"Title").unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let outline = match doc.get_toc() {
            Ok(toc) => toc
                .toc
                .into_iter()
                .map(|entry| OutlineEntry {
                    title: normalize_line(&entry.title),
                    level: entry.level,
                    page_number: entry.page as u32,
                })
                .collect(),
            Err(e) => {
                debug!(error = %e, "no outline");
                Vec::new()
            }
        };
        Ok(DocumentInfo {
            document_id: document_id_for(path),
            title,
            author: info_text(&doc, b"Author"),
            page_count: doc.get_pages().len(),
            outline,
        })
    }

    fn positioned_blocks(&self, doc: &Document, document_id: &str) -> Vec<TextBlock> {
        let mut blocks = Vec::new();
        for (page_number, page_id) in doc.get_pages() {
            let spans = match page_spans(doc, page_id) {
                Ok(spans) => spans,
                Err(e) => {
                    debug!(page = page_number, error = %e, "page content not decodable");
                    continue;
                }
            };
            let lines = group_lines(spans, self.config.line_tolerance);
            for block in self.group_blocks(lines) {
                let order_index = blocks.len();
                blocks.push(block.into_text_block(document_id, page_number, order_index));
            }
        }
        blocks
    }

    fn group_blocks(&self, lines: Vec<Line>) -> Vec<PendingBlock> {
        let mut blocks: Vec<PendingBlock> = Vec::new();
        for line in lines {
            if self.config.merge_lines {
                if let Some(current) = blocks.last_mut() {
                    if current.accepts(&line, self.config.block_gap_factor) {
                        current.push(line);
                        continue;
                    }
                }
            }
            blocks.push(PendingBlock::new(line));
        }
        blocks
    }

    fn plain_text_blocks(&self, path: &Path, document_id: &str) -> Result<Vec<TextBlock>> {
        let pages = pdf_extract::extract_text_by_pages(path)
            .map_err(|e| Self::unreadable(path, format!("pdf extract failed: {e}")))?;
        let size = self.config.nominal_font_size;
        let mut blocks = Vec::new();
        for (idx, page) in pages.iter().enumerate() {
            for paragraph in page.split("\n\n") {
                let lines: Vec<String> = paragraph.lines().map(str::to_string).collect();
                let text = join_lines(&lines);
                if text.is_empty() {
                    continue;
                }
                blocks.push(TextBlock {
                    document_id: document_id.to_string(),
                    page_number: idx as u32 + 1,
                    text,
                    bbox: BBox::default(),
                    font_size: size,
                    is_bold: false,
                    order_index: blocks.len(),
                });
            }
        }
        Ok(blocks)
    }
}

impl Extractor for PdfExtractor {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn extract(&self, path: &Path) -> Result<Vec<TextBlock>> {
        let document_id = document_id_for(path);
        let doc = Self::load(path)?;
        let blocks = self.positioned_blocks(&doc, &document_id);
        if !blocks.is_empty() || !self.config.plain_text_fallback {
            debug!(blocks = blocks.len(), "extracted positioned blocks");
            return Ok(blocks);
        }
        warn!("no positioned text found, falling back to plain page text");
        self.plain_text_blocks(path, &document_id)
    }
}

/// File name of the PDF, the identifier used in the output payload.
pub fn document_id_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone, PartialEq)]
struct Span {
    text: String,
    x: f32,
    y: f32,
    width: f32,
    size: f32,
    bold: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Line {
    spans: Vec<Span>,
    y: f32,
}

impl Line {
    fn text(&self) -> String {
        let mut out = String::new();
        for span in &self.spans {
            if !out.is_empty() && !out.ends_with(' ') && !span.text.starts_with(' ') {
                out.push(' ');
            }
            out.push_str(&span.text);
        }
        normalize_line(&out)
    }

    /// Size of the widest run on the line.
    fn size(&self) -> f32 {
        self.spans
            .iter()
            .max_by(|a, b| a.text.len().cmp(&b.text.len()))
            .map(|s| s.size)
            .unwrap_or(0.0)
    }

    fn bold(&self) -> bool {
        let bold: usize = self.spans.iter().filter(|s| s.bold).map(|s| s.text.len()).sum();
        let total: usize = self.spans.iter().map(|s| s.text.len()).sum();
        total > 0 && bold * 2 >= total
    }

    fn bbox(&self) -> BBox {
        let x0 = self.spans.iter().map(|s| s.x).fold(f32::INFINITY, f32::min);
        let x1 = self
            .spans
            .iter()
            .map(|s| s.x + s.width)
            .fold(f32::NEG_INFINITY, f32::max);
        BBox::new(x0, self.y, x1, self.y + self.size())
    }
}

struct PendingBlock {
    lines: Vec<String>,
    bbox: BBox,
    size: f32,
    bold: bool,
    last_y: f32,
}

impl PendingBlock {
    fn new(line: Line) -> Self {
        Self {
            bbox: line.bbox(),
            size: line.size(),
            bold: line.bold(),
            last_y: line.y,
            lines: vec![line.text()],
        }
    }

    fn accepts(&self, line: &Line, gap_factor: f32) -> bool {
        let gap = self.last_y - line.y;
        (line.size() - self.size).abs() < 0.5
            && line.bold() == self.bold
            && gap > 0.0
            && gap <= gap_factor * self.size.max(1.0)
    }

    fn push(&mut self, line: Line) {
        self.bbox = self.bbox.union(&line.bbox());
        self.last_y = line.y;
        self.lines.push(line.text());
    }

    fn into_text_block(self, document_id: &str, page_number: u32, order_index: usize) -> TextBlock {
        TextBlock {
            document_id: document_id.to_string(),
            page_number,
            text: join_lines(&self.lines),
            bbox: self.bbox,
            font_size: self.size,
            is_bold: self.bold,
            order_index,
        }
    }
}

fn group_lines(spans: Vec<Span>, tolerance: f32) -> Vec<Line> {
    let mut lines: Vec<Line> = Vec::new();
    for span in spans {
        if span.text.trim().is_empty() {
            continue;
        }
        match lines.last_mut() {
            Some(line) if (line.y - span.y).abs() <= tolerance => line.spans.push(span),
            _ => lines.push(Line {
                y: span.y,
                spans: vec![span],
            }),
        }
    }
    lines
}

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

#[derive(Debug, Clone)]
struct FontState {
    resource: Vec<u8>,
    size: f32,
    bold: bool,
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: [f32; 6],
}

struct TextCursor {
    matrix: [f32; 6],
    line_matrix: [f32; 6],
    leading: f32,
    font: Option<FontState>,
}

impl TextCursor {
    fn new() -> Self {
        Self {
            matrix: IDENTITY,
            line_matrix: IDENTITY,
            leading: 0.0,
            font: None,
        }
    }

    fn begin(&mut self) {
        self.matrix = IDENTITY;
        self.line_matrix = IDENTITY;
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = multiply(&translate(tx, ty), &self.line_matrix);
        self.matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self.leading;
        self.move_line(0.0, -leading);
    }

    fn set_matrix(&mut self, m: [f32; 6]) {
        self.matrix = m;
        self.line_matrix = m;
    }

    fn advance(&mut self, tx: f32) {
        self.matrix = multiply(&translate(tx, 0.0), &self.matrix);
    }
}

fn page_spans(doc: &Document, page_id: lopdf::ObjectId) -> lopdf::Result<Vec<Span>> {
    let content = doc.get_and_decode_page_content(page_id)?;
    let fonts = doc.get_page_fonts(page_id)?;
    let mut encodings: BTreeMap<Vec<u8>, Encoding> = BTreeMap::new();
    let mut bold_fonts: BTreeMap<Vec<u8>, bool> = BTreeMap::new();
    for (name, font) in &fonts {
        if let Ok(encoding) = font.get_font_encoding(doc) {
            encodings.insert(name.clone(), encoding);
        }
        let base = font
            .get(b"BaseFont")
            .and_then(Object::as_name)
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default();
        bold_fonts.insert(name.clone(), is_bold_font(&base));
    }

    let mut spans = Vec::new();
    let mut stack = vec![GraphicsState { ctm: IDENTITY }];
    let mut cursor = TextCursor::new();
    for op in &content.operations {
        match op.operator.as_str() {
            "q" => {
                if let Some(top) = stack.last().cloned() {
                    stack.push(top);
                }
            }
            "Q" => {
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            "cm" => {
                if let Some(top) = stack.last_mut() {
                    top.ctm = multiply(&matrix_operands(op), &top.ctm);
                }
            }
            "BT" => cursor.begin(),
            "Tf" => {
                if let (Some(Object::Name(name)), Some(size)) = (op.operands.first(), op.operands.get(1)) {
                    cursor.font = Some(FontState {
                        resource: name.clone(),
                        size: number(size),
                        bold: bold_fonts.get(name).copied().unwrap_or(false),
                    });
                }
            }
            "TL" => {
                if let Some(leading) = op.operands.first() {
                    cursor.leading = number(leading);
                }
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (op.operands.first(), op.operands.get(1)) {
                    let (tx, ty) = (number(tx), number(ty));
                    if op.operator == "TD" {
                        cursor.leading = -ty;
                    }
                    cursor.move_line(tx, ty);
                }
            }
            "Tm" => cursor.set_matrix(matrix_operands(op)),
            "T*" => cursor.next_line(),
            "Tj" | "TJ" | "'" | "\"" => {
                if op.operator == "'" || op.operator == "\"" {
                    cursor.next_line();
                }
                let ctm = stack.last().map(|g| g.ctm).unwrap_or(IDENTITY);
                if let Some(span) = show_text(op, &mut cursor, ctm, &encodings) {
                    spans.push(span);
                }
            }
            _ => {}
        }
    }
    Ok(spans)
}

fn show_text(
    op: &Operation,
    cursor: &mut TextCursor,
    ctm: [f32; 6],
    encodings: &BTreeMap<Vec<u8>, Encoding>,
) -> Option<Span> {
    let font = cursor.font.clone()?;
    let encoding = encodings.get(&font.resource);
    let mut text = String::new();
    let strings: Vec<&Object> = match op.operator.as_str() {
        "TJ" => match op.operands.first() {
            Some(Object::Array(items)) => items.iter().collect(),
            _ => Vec::new(),
        },
        // `"` carries word and character spacing ahead of the string.
        "\"" => op.operands.get(2).into_iter().collect(),
        _ => op.operands.first().into_iter().collect(),
    };
    for item in strings {
        match item {
            Object::String(bytes, _) => text.push_str(&decode(encoding, bytes)),
            // Large negative kerning in a TJ array stands in for a word space.
            Object::Integer(_) | Object::Real(_) if number(item) < -200.0 => {
                if !text.ends_with(' ') {
                    text.push(' ');
                }
            }
            _ => {}
        }
    }
    if text.trim().is_empty() {
        return None;
    }
    let full = multiply(&cursor.matrix, &ctm);
    let scale = (full[0] * full[3] - full[1] * full[2]).abs().sqrt();
    let size = (font.size * if scale > 0.0 { scale } else { 1.0 }).abs();
    // Without glyph metrics, half an em per character approximates the advance.
    let advance = text.chars().count() as f32 * font.size * 0.5;
    let width = advance * if scale > 0.0 { scale } else { 1.0 };
    let span = Span {
        text,
        x: full[4],
        y: full[5],
        width,
        size,
        bold: font.bold,
    };
    cursor.advance(advance);
    Some(span)
}

fn decode(encoding: Option<&Encoding>, bytes: &[u8]) -> String {
    if let Some(encoding) = encoding {
        if let Ok(text) = Document::decode_text(encoding, bytes) {
            return text;
        }
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|b| *b as char).collect()
}

fn info_text(doc: &Document, key: &[u8]) -> Option<String> {
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    let text = normalize_line(&decode(None, info.get(key).ok()?.as_str().ok()?));
    (!text.is_empty()).then_some(text)
}

fn is_bold_font(base_font: &str) -> bool {
    let lower = base_font.to_lowercase();
    ["bold", "black", "heavy", "semibold", "demi"]
        .iter()
        .any(|marker| lower.contains(marker))
}

fn number(obj: &Object) -> f32 {
    match obj {
        Object::Integer(i) => *i as f32,
        Object::Real(f) => *f,
        _ => 0.0,
    }
}

fn matrix_operands(op: &Operation) -> [f32; 6] {
    let values: Vec<f32> = op.operands.iter().map(number).collect();
    values.try_into().unwrap_or(IDENTITY)
}

fn translate(tx: f32, ty: f32) -> [f32; 6] {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

/// `a` then `b`, in PDF row-vector convention.
fn multiply(a: &[f32; 6], b: &[f32; 6]) -> [f32; 6] {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
        a[4] * b[0] + a[5] * b[2] + b[4],
        a[4] * b[1] + a[5] * b[3] + b[5],
    ]
}
