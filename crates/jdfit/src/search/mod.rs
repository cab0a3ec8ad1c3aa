pub mod flat;

pub use flat::FlatIndex;

use crate::error::Result;

/// One nearest-neighbor hit: the position of the indexed vector and its
/// cosine similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub similarity: f32,
}

/// Nearest-neighbor search over a fixed set of embedding vectors.
///
/// Implementations return at most `k` hits per query, ordered by descending
/// similarity, and fewer (possibly none) when fewer vectors are indexed.
pub trait VectorIndex {
    /// Number of indexed vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality of the indexed vectors, 0 for an empty index
    fn dimension(&self) -> usize;

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    fn search_batch(&self, queries: &[Vec<f32>], k: usize) -> Result<Vec<Vec<Neighbor>>> {
        queries.iter().map(|q| self.search(q, k)).collect()
    }
}

/// Scale `vec` to unit L2 length in place. Zero vectors are left as is.
///
/// The norm is accumulated in f64 so tiny components don't underflow and
/// large ones don't overflow.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm = vec
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v = (f64::from(*v) / norm) as f32;
        }
    }
}

/// Position of the first vector holding a NaN or infinite component.
pub fn first_non_finite(vectors: &[Vec<f32>]) -> Option<usize> {
    vectors
        .iter()
        .position(|v| v.iter().any(|x| !x.is_finite()))
}
