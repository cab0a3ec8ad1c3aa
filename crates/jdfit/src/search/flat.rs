use ndarray::{aview1, Array2};

use super::{first_non_finite, l2_normalize, Neighbor, VectorIndex};
use crate::error::{AlignError, Result};

/// Exact inner-product index over L2-normalized rows.
///
/// Rows are normalized at build time and queries at search time, so the
/// inner product of a hit is its cosine similarity. Search is a brute-force
/// matrix-vector product, which is fine for document-sized inputs.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    rows: Array2<f32>,
}

impl FlatIndex {
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self> {
        if let Some(position) = first_non_finite(vectors) {
            return Err(AlignError::NonFiniteVector { position });
        }

        let Some(first) = vectors.first() else {
            return Ok(Self {
                rows: Array2::zeros((0, 0)),
            });
        };

        let dimension = first.len();
        let mut flat = Vec::with_capacity(vectors.len() * dimension);
        for vector in vectors {
            if vector.len() != dimension {
                return Err(AlignError::DimensionMismatch {
                    expected: dimension,
                    found: vector.len(),
                });
            }
            let start = flat.len();
            flat.extend_from_slice(vector);
            l2_normalize(&mut flat[start..]);
        }

        let rows = Array2::from_shape_vec((vectors.len(), dimension), flat).map_err(|_| {
            AlignError::DimensionMismatch {
                expected: dimension,
                found: 0,
            }
        })?;

        tracing::debug!(rows = rows.nrows(), dimension, "Built flat index");
        Ok(Self { rows })
    }
}

impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        self.rows.nrows()
    }

    fn dimension(&self) -> usize {
        self.rows.ncols()
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension() {
            return Err(AlignError::DimensionMismatch {
                expected: self.dimension(),
                found: query.len(),
            });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(AlignError::NonFiniteQuery);
        }

        let mut query = query.to_vec();
        l2_normalize(&mut query);
        let scores = self.rows.dot(&aview1(&query));

        let mut hits: Vec<Neighbor> = scores
            .iter()
            .enumerate()
            .map(|(position, &similarity)| Neighbor {
                position,
                similarity,
            })
            .collect();

        // Ties go to the earlier position
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
