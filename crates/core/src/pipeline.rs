use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Instant;

use chrono::Utc;
use persona_rank_index::{validate_dimension, IndexKind, VectorIndex};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::block::{BlockId, BlockStore, TextBlock};
use crate::classify::{Classification, FontStatClassifier, StructuralTag};
use crate::config::{PipelineConfig, TimeoutPolicy};
use crate::embedding::{Embedder, HashEmbedder};
use crate::error::{PipelineFailure, RankError, Result};
use crate::extract::{Extractor, PdfExtractor};
use crate::keyword::{KeywordScorer, TermFrequencyScorer};
use crate::output::CollectionOutput;
use crate::rank::{FusionRanker, ScoredSection};
use crate::refine::{RefinedSection, Refiner};
use crate::request::{CollectionRequest, DocumentRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Extracting,
    Classifying,
    Embedding,
    Ranking,
    Refining,
    Assembling,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Classifying => "classifying",
            Self::Embedding => "embedding",
            Self::Ranking => "ranking",
            Self::Refining => "refining",
            Self::Assembling => "assembling",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTiming {
    pub stage: PipelineStage,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReport {
    pub document_id: String,
    pub blocks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Diagnostics of one run. Kept apart from the output payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub stages: Vec<PipelineStage>,
    pub timings: Vec<StageTiming>,
    pub documents: Vec<DocumentReport>,
    pub tag_counts: BTreeMap<StructuralTag, usize>,
    pub index_kind: Option<IndexKind>,
    pub warnings: Vec<String>,
    /// Fewer candidates than `top_k` were available.
    pub degenerate: bool,
    pub timed_out: bool,
}

impl RunReport {
    pub fn final_stage(&self) -> PipelineStage {
        self.stages.last().copied().unwrap_or(PipelineStage::Idle)
    }
}

#[derive(Debug, Clone)]
pub struct CollectionRun {
    pub output: CollectionOutput,
    pub report: RunReport,
}

/// Moves forward through the stages and records how long each took.
struct StageTracker {
    current: PipelineStage,
    entered: Instant,
    report: RunReport,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: PipelineStage::Idle,
            entered: Instant::now(),
            report: RunReport {
                stages: vec![PipelineStage::Idle],
                ..RunReport::default()
            },
        }
    }

    fn advance(&mut self, next: PipelineStage) {
        self.close_current();
        info!(from = %self.current, to = %next, "pipeline stage");
        self.current = next;
        self.report.stages.push(next);
    }

    fn close_current(&mut self) {
        self.report.timings.push(StageTiming {
            stage: self.current,
            elapsed_ms: self.entered.elapsed().as_millis(),
        });
        self.entered = Instant::now();
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.report.warnings.push(message);
    }

    fn finish(mut self) -> RunReport {
        self.advance(PipelineStage::Done);
        self.report
    }

    fn fail(mut self, error: RankError) -> PipelineFailure {
        let stage = self.current;
        warn!(stage = %stage, error = %error, "pipeline failed");
        self.advance(PipelineStage::Failed);
        PipelineFailure {
            stage,
            error,
            warnings: self.report.warnings,
        }
    }
}

enum Extraction {
    Blocks(Vec<TextBlock>),
    Failed(RankError),
    Skipped,
}

pub struct CollectionPipeline {
    extractor: Box<dyn Extractor>,
    embedder: Box<dyn Embedder>,
    scorer: Box<dyn KeywordScorer>,
    classifier: FontStatClassifier,
    ranker: FusionRanker,
    refiner: Refiner,
    config: PipelineConfig,
}

impl fmt::Debug for CollectionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CollectionPipeline {
    pub fn new(
        config: PipelineConfig,
        extractor: Box<dyn Extractor>,
        embedder: Box<dyn Embedder>,
        scorer: Box<dyn KeywordScorer>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extractor,
            embedder,
            scorer,
            classifier: FontStatClassifier::new(config.classifier.clone()),
            ranker: FusionRanker::new(config.fusion.clone()),
            refiner: Refiner::new(config.refiner.clone()),
            config,
        })
    }

    /// PDF extraction, hashed embeddings and term-frequency keywords.
    pub fn with_defaults(config: PipelineConfig) -> Result<Self> {
        let extractor = PdfExtractor::new(config.extract.clone());
        Self::new(
            config,
            Box::new(extractor),
            Box::new(HashEmbedder::default()),
            Box::new(TermFrequencyScorer::default()),
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[instrument(skip_all, fields(documents = request.documents.len()))]
    pub fn run(
        &self,
        request: &CollectionRequest,
    ) -> std::result::Result<CollectionRun, PipelineFailure> {
        let mut tracker = StageTracker::new();
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
        {
            Ok(pool) => pool,
            Err(e) => return Err(tracker.fail(e.into())),
        };

        tracker.advance(PipelineStage::Extracting);
        let store = match self.extract_all(&pool, request, &mut tracker) {
            Ok(store) => store,
            Err(e) => return Err(tracker.fail(e)),
        };

        tracker.advance(PipelineStage::Classifying);
        let classification = self.classifier.classify(&store);
        tracker.report.tag_counts = classification.tag_counts();

        tracker.advance(PipelineStage::Embedding);
        let embedded = match self.embed_all(&pool, &store, request) {
            Ok(embedded) => embedded,
            Err(e) => return Err(tracker.fail(e)),
        };
        tracker.report.index_kind = embedded.as_ref().map(|(index, _)| index.kind());

        tracker.advance(PipelineStage::Ranking);
        let sections = match &embedded {
            Some((index, query)) => {
                match self.rank(&store, &classification, index.as_ref(), query) {
                    Ok(sections) => sections,
                    Err(e) => return Err(tracker.fail(e)),
                }
            }
            None => self.ranker.rank(Vec::new()),
        };
        tracker.report.degenerate = sections.len() < self.config.fusion.top_k;

        tracker.advance(PipelineStage::Refining);
        let refined = self.refine_all(&pool, &store, &sections);

        tracker.advance(PipelineStage::Assembling);
        let output = CollectionOutput::assemble(request, &sections, refined, Utc::now());
        let report = tracker.finish();
        info!(
            sections = output.extracted_sections.len(),
            warnings = report.warnings.len(),
            "collection run done"
        );
        Ok(CollectionRun { output, report })
    }

    fn extract_all(
        &self,
        pool: &ThreadPool,
        request: &CollectionRequest,
        tracker: &mut StageTracker,
    ) -> Result<BlockStore> {
        let deadline = self.config.time_budget().map(|budget| Instant::now() + budget);
        let extracted: Vec<Extraction> = pool.install(|| {
            request
                .documents
                .par_iter()
                .map(|doc| self.extract_one(doc, deadline))
                .collect()
        });

        let mut store = BlockStore::new();
        let mut skipped = 0usize;
        let mut seen = HashSet::new();
        for (doc, outcome) in request.documents.iter().zip(extracted) {
            if !seen.insert(doc.document_id.as_str()) {
                tracker.warn(format!("{}: listed twice, skipped", doc.document_id));
                tracker.report.documents.push(DocumentReport {
                    document_id: doc.document_id.clone(),
                    blocks: 0,
                    error: Some("duplicate listing".to_string()),
                });
                continue;
            }
            let (blocks, error) = match outcome {
                Extraction::Blocks(blocks) if blocks.is_empty() => {
                    tracker.warn(format!(
                        "{}: no text blocks extracted, skipped",
                        doc.document_id
                    ));
                    (0, Some("no text blocks".to_string()))
                }
                Extraction::Blocks(blocks) => {
                    let kept = store.insert_document(&doc.document_id, blocks);
                    if kept == 0 {
                        tracker.warn(format!(
                            "{}: only empty text blocks, skipped",
                            doc.document_id
                        ));
                    }
                    (kept, None)
                }
                Extraction::Failed(e) if !e.is_recoverable() => return Err(e),
                Extraction::Failed(e) => {
                    tracker.warn(format!("{}: {e}", doc.document_id));
                    (0, Some(e.to_string()))
                }
                Extraction::Skipped => {
                    skipped += 1;
                    (0, Some("time budget exhausted".to_string()))
                }
            };
            tracker.report.documents.push(DocumentReport {
                document_id: doc.document_id.clone(),
                blocks,
                error,
            });
        }

        if skipped > 0 {
            tracker.report.timed_out = true;
            let budget_secs = self.config.time_budget_secs.unwrap_or_default();
            if self.config.timeout_policy == TimeoutPolicy::Fail {
                return Err(RankError::TimeBudgetExceeded { budget_secs });
            }
            tracker.warn(format!(
                "time budget of {budget_secs}s exhausted, {skipped} document(s) not extracted"
            ));
        }
        // Budget-skipped documents are not extraction failures.
        if !request.documents.is_empty() && store.is_empty() && skipped == 0 {
            return Err(RankError::EmptyCollection {
                attempted: request.documents.len(),
            });
        }
        info!(
            documents = store.document_count(),
            blocks = store.len(),
            "extraction finished"
        );
        Ok(store)
    }

    fn extract_one(&self, doc: &DocumentRef, deadline: Option<Instant>) -> Extraction {
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            return Extraction::Skipped;
        }
        match self.extractor.extract(&doc.path) {
            Ok(blocks) => Extraction::Blocks(blocks),
            Err(e) => Extraction::Failed(e),
        }
    }

    /// `None` when there is nothing to index.
    fn embed_all(
        &self,
        pool: &ThreadPool,
        store: &BlockStore,
        request: &CollectionRequest,
    ) -> Result<Option<(Box<dyn VectorIndex<BlockId>>, Vec<f32>)>> {
        if store.is_empty() {
            return Ok(None);
        }
        let dimension = self.embedder.dimension();
        let texts: Vec<String> = store.blocks().iter().map(|b| b.text.clone()).collect();
        let batches: Vec<Vec<Vec<f32>>> = pool.install(|| {
            texts
                .par_chunks(self.config.embed_batch_size)
                .map(|batch| self.embed_batch(batch, dimension))
                .collect::<Result<Vec<_>>>()
        })?;
        let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        let ids: Vec<BlockId> = store.iter().map(|(id, _)| id).collect();
        let index = persona_rank_index::index(vectors, ids, dimension, &self.config.index)?;

        let query = self.embed_batch(&[request.query()], dimension)?;
        let query = query.into_iter().next().ok_or_else(|| {
            RankError::LengthMismatch("embedder returned no vector for the query".into())
        })?;
        Ok(Some((index, query)))
    }

    fn embed_batch(&self, batch: &[String], dimension: usize) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embedder.embed(batch)?;
        if vectors.len() != batch.len() {
            return Err(RankError::LengthMismatch(format!(
                "{} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }
        for vector in &vectors {
            validate_dimension(dimension, vector.len())?;
        }
        Ok(vectors)
    }

    fn rank(
        &self,
        store: &BlockStore,
        classification: &Classification,
        index: &dyn VectorIndex<BlockId>,
        query: &[f32],
    ) -> Result<Vec<ScoredSection>> {
        let candidates = self.ranker.gather_candidates(
            store,
            classification,
            index,
            query,
            self.scorer.as_ref(),
            &self.config.language,
        )?;
        Ok(self.ranker.rank(candidates))
    }

    fn refine_all(
        &self,
        pool: &ThreadPool,
        store: &BlockStore,
        sections: &[ScoredSection],
    ) -> Vec<RefinedSection> {
        pool.install(|| {
            sections
                .par_iter()
                .map(|section| {
                    let text = store
                        .get(section.block_id)
                        .map(|b| b.text.as_str())
                        .unwrap_or_default();
                    RefinedSection {
                        document_id: section.document_id.clone(),
                        page_number: section.page_number,
                        refined_text: self.refiner.refine_default(text),
                    }
                })
                .collect()
        })
    }
}
