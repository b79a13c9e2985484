mod block;
mod classify;
mod config;
mod embedding;
mod error;
mod extract;
mod keyword;
mod normalization;
mod output;
mod pipeline;
mod rank;
mod refine;
mod request;

pub use block::{BBox, BlockId, BlockStore, TextBlock};
pub use classify::{
    Classification, ClassifierConfig, FontStatClassifier, FontStats, StructuralTag,
};
pub use config::{default_workers, PipelineConfig, TimeoutPolicy};
pub use embedding::{Embedder, HashEmbedder, HashEmbedderConfig};
pub use error::{PipelineFailure, RankError, Result};
pub use extract::{
    document_id_for, DocumentInfo, ExtractConfig, Extractor, OutlineEntry, PdfExtractor,
};
pub use keyword::{
    KeywordAggregation, KeywordScoreMap, KeywordScorer, TermFrequencyConfig, TermFrequencyScorer,
};
pub use normalization::{join_lines, normalize_line, terms, truncate_chars};
pub use output::{
    format_timestamp, CollectionOutput, ExtractedSection, OutputMetadata, SubsectionAnalysis,
    MAX_TITLE_CHARS,
};
pub use pipeline::{
    CollectionPipeline, CollectionRun, DocumentReport, PipelineStage, RunReport, StageTiming,
};
pub use rank::{min_max, Candidate, FusionConfig, FusionRanker, ScoredSection, TitleSource};
pub use refine::{split_sentences, RefinedSection, Refiner, RefinerConfig};
pub use request::{
    ChallengeInfo, CollectionInput, CollectionRequest, DocumentRef, InputDocument, JobToBeDone,
    Persona, DEFAULT_PDF_DIR,
};

pub use persona_rank_index::{IndexConfig, IndexKind};
