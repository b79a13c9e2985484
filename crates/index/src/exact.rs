use tracing::instrument;

use crate::{
    dot, order_hits, prepare_query, prepare_vectors, IndexKind, Neighbor, Result, VectorIndex,
};

/// Linear scan over every stored vector.
#[derive(Debug, Clone)]
pub struct ExactIndex<I> {
    vectors: Vec<Vec<f32>>,
    ids: Vec<I>,
    dimension: usize,
}

impl<I: Clone> ExactIndex<I> {
    pub fn new(vectors: Vec<Vec<f32>>, ids: Vec<I>, dimension: usize) -> Result<Self> {
        let vectors = prepare_vectors(vectors, &ids, dimension)?;
        Ok(Self {
            vectors,
            ids,
            dimension,
        })
    }
}

impl<I: Clone + Send + Sync> VectorIndex<I> for ExactIndex<I> {
    fn kind(&self) -> IndexKind {
        IndexKind::Exact
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    #[instrument(skip_all, fields(index_size = self.vectors.len(), k = k))]
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor<I>>> {
        let query = prepare_query(query, self.dimension)?;
        let mut hits: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, dot(&query, vector)))
            .collect();
        order_hits(&mut hits);
        hits.truncate(k);
        Ok(hits
            .into_iter()
            .map(|(position, similarity)| Neighbor {
                id: self.ids[position].clone(),
                position,
                similarity,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexError;

    #[test]
    fn returns_nearest_first() {
        let index = ExactIndex::new(
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![1.0, 0.1, 0.0]],
            vec!["a", "b", "c"],
            3,
        )
        .unwrap();
        let hits = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "c");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalizes_vectors_on_insert() {
        let index = ExactIndex::new(vec![vec![3.0, 4.0]], vec![7u32], 2).unwrap();
        let hits = index.search(&[6.0, 8.0], 1).unwrap();
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn equal_similarities_keep_insertion_order() {
        let index = ExactIndex::new(
            vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]],
            vec![10, 20, 30],
            2,
        )
        .unwrap();
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![20, 30, 10]);
    }

    #[test]
    fn k_larger_than_pool_returns_everything() {
        let index = ExactIndex::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![1, 2], 2).unwrap();
        assert_eq!(index.search(&[1.0, 1.0], 10).unwrap().len(), 2);
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let index: ExactIndex<u32> = ExactIndex::new(Vec::new(), Vec::new(), 4).unwrap();
        assert!(index.is_empty());
        assert!(index.search(&[0.0; 4], 5).unwrap().is_empty());
    }

    #[test]
    fn query_dimension_is_checked() {
        let index = ExactIndex::new(vec![vec![1.0, 0.0]], vec![1], 2).unwrap();
        assert_eq!(
            index.search(&[1.0, 0.0, 0.0], 1).unwrap_err(),
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }
}
