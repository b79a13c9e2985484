use std::path::PathBuf;

use persona_rank_index::IndexError;
use thiserror::Error;

use crate::pipeline::PipelineStage;

#[derive(Error, Debug)]
pub enum RankError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("unreadable pdf {path:?}: {reason}")]
    UnreadablePdf { path: PathBuf, reason: String },
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("length mismatch: {0}")]
    LengthMismatch(String),
    #[error("no readable documents among {attempted} requested")]
    EmptyCollection { attempted: usize },
    #[error("time budget of {budget_secs}s exceeded")]
    TimeBudgetExceeded { budget_secs: u64 },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

pub type Result<T> = std::result::Result<T, RankError>;

impl From<IndexError> for RankError {
    fn from(value: IndexError) -> Self {
        match value {
            IndexError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            IndexError::LengthMismatch { vectors, ids } => {
                Self::LengthMismatch(format!("{vectors} vectors for {ids} ids"))
            }
            IndexError::NonFinite { position } => Self::Embedding(format!(
                "embedding at position {position} contains a non-finite component"
            )),
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for RankError {
    fn from(value: rayon::ThreadPoolBuildError) -> Self {
        Self::WorkerPool(value.to_string())
    }
}

impl RankError {
    /// Per-document failures the pipeline records and skips past.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnreadablePdf { .. } | Self::Io(_))
    }
}

/// A run that ended in the `Failed` state. No output is produced.
#[derive(Error, Debug)]
#[error("collection run failed while {stage}: {error}")]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    #[source]
    pub error: RankError,
    pub warnings: Vec<String>,
}
