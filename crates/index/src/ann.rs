// rust-cv/hnsw graph search; candidates are re-scored exactly before ordering.

use hnsw::{Hnsw, Searcher};
use rand::rngs::StdRng;
use space::{Metric, Neighbor as GraphNeighbor};
use tracing::instrument;

use crate::{
    dot, order_hits, prepare_query, prepare_vectors, IndexKind, Neighbor, Result, VectorIndex,
};

/// `1 - cosine` scaled onto `u32`. Inputs are already unit length.
struct CosineDistance;

impl Metric<Box<[f32]>> for CosineDistance {
    type Unit = u32;

    fn distance(&self, a: &Box<[f32]>, b: &Box<[f32]>) -> u32 {
        let distance = (1.0 - dot(a, b)).clamp(0.0, 2.0);
        (distance * (u32::MAX as f32 / 2.0)) as u32
    }
}

pub struct HnswIndex<I> {
    graph: Hnsw<CosineDistance, Box<[f32]>, StdRng, 16, 32>,
    vectors: Vec<Box<[f32]>>,
    ids: Vec<I>,
    dimension: usize,
    min_ef_search: usize,
}

impl<I: Clone> HnswIndex<I> {
    pub fn new(
        vectors: Vec<Vec<f32>>,
        ids: Vec<I>,
        dimension: usize,
        min_ef_search: usize,
    ) -> Result<Self> {
        let vectors: Vec<Box<[f32]>> = prepare_vectors(vectors, &ids, dimension)?
            .into_iter()
            .map(Vec::into_boxed_slice)
            .collect();
        let mut graph: Hnsw<CosineDistance, Box<[f32]>, StdRng, 16, 32> =
            Hnsw::new(CosineDistance);
        let mut searcher: Searcher<u32> = Searcher::default();
        for vector in &vectors {
            graph.insert(vector.clone(), &mut searcher);
        }
        Ok(Self {
            graph,
            vectors,
            ids,
            dimension,
            min_ef_search,
        })
    }
}

impl<I: Clone + Send + Sync> VectorIndex<I> for HnswIndex<I> {
    fn kind(&self) -> IndexKind {
        IndexKind::Hnsw
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
        let wanted = k.min(self.vectors.len());
        if wanted == 0 {
            return Ok(Vec::new());
        }
        let ef_search = (wanted * 2).max(self.min_ef_search);
        let mut neighbors = vec![
            GraphNeighbor {
                index: !0,
                distance: !0
            };
            wanted
        ];
        // The searcher holds per-query scratch state, so the graph itself stays read-only.
        let mut searcher: Searcher<u32> = Searcher::default();
        let query_box = query.clone().into_boxed_slice();
        let found = self
            .graph
            .nearest(&query_box, ef_search, &mut searcher, &mut neighbors);
        let mut hits: Vec<(usize, f32)> = found
            .iter()
            .filter(|n| n.index != !0)
            .map(|n| (n.index, dot(&query, &self.vectors[n.index])))
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
