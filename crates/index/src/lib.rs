mod ann;
mod exact;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use ann::HnswIndex;
pub use exact::ExactIndex;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("length mismatch: {vectors} vectors for {ids} ids")]
    LengthMismatch { vectors: usize, ids: usize },
    #[error("vector at position {position} contains a non-finite component")]
    NonFinite { position: usize },
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Exact,
    Hnsw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor<I> {
    pub id: I,
    /// Insertion position of the vector; the final tie-break.
    pub position: usize,
    pub similarity: f32,
}

pub trait VectorIndex<I>: Send + Sync {
    fn kind(&self) -> IndexKind;

    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns at most `min(k, len)` neighbors, most similar first, equal similarities in
    /// ascending insertion order.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor<I>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Pools smaller than this are searched exactly.
    pub ann_threshold: usize,
    pub min_ef_search: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ann_threshold: 100,
            min_ef_search: 50,
        }
    }
}

/// Builds the index strategy suited to the pool size.
pub fn index<I>(
    vectors: Vec<Vec<f32>>,
    ids: Vec<I>,
    dimension: usize,
    config: &IndexConfig,
) -> Result<Box<dyn VectorIndex<I>>>
where
    I: Clone + Send + Sync + 'static,
{
    if vectors.len() < config.ann_threshold {
        info!(
            vectors = vectors.len(),
            threshold = config.ann_threshold,
            "building exact index"
        );
        Ok(Box::new(ExactIndex::new(vectors, ids, dimension)?))
    } else {
        info!(vectors = vectors.len(), "building hnsw index");
        Ok(Box::new(HnswIndex::new(
            vectors,
            ids,
            dimension,
            config.min_ef_search,
        )?))
    }
}

pub fn validate_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(IndexError::DimensionMismatch { expected, actual })
    }
}

pub(crate) fn prepare_vectors<I>(
    vectors: Vec<Vec<f32>>,
    ids: &[I],
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != ids.len() {
        return Err(IndexError::LengthMismatch {
            vectors: vectors.len(),
            ids: ids.len(),
        });
    }
    vectors
        .into_iter()
        .enumerate()
        .map(|(position, mut vector)| {
            validate_dimension(dimension, vector.len())?;
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(IndexError::NonFinite { position });
            }
            normalize(&mut vector);
            Ok(vector)
        })
        .collect()
}

pub(crate) fn prepare_query(query: &[f32], dimension: usize) -> Result<Vec<f32>> {
    validate_dimension(dimension, query.len())?;
    let mut query = query.to_vec();
    normalize(&mut query);
    Ok(query)
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

/// Sorts `(position, similarity)` hits into the search order.
pub(crate) fn order_hits(hits: &mut [(usize, f32)]) {
    hits.sort_by(|a, b| match b.1.total_cmp(&a.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
}
