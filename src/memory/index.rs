use ndarray::{Array2, ArrayView1, Axis};

use super::error::IndexError;

/// One hit from [`SimilarityIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the vector in the slice the index was built from.
    pub position: usize,
    /// Euclidean distance to the query (not squared).
    pub distance: f32,
}

/// Exact nearest-neighbour index over a fixed set of vectors.
///
/// Vectors are packed row-major into one matrix and searched by brute-force
/// linear scan, which is exact and fast enough for a few thousand rows. The
/// index is immutable; rebuild it when the underlying set changes.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    vectors: Array2<f32>,
}

impl SimilarityIndex {
    /// Build an index from `vectors`, which must be non-empty and share one
    /// dimension.
    pub fn build<V: AsRef<[f32]>>(vectors: &[V]) -> Result<Self, IndexError> {
        let dim = vectors.first().ok_or(IndexError::Empty)?.as_ref().len();

        let mut data = Vec::with_capacity(vectors.len() * dim);
        for v in vectors {
            let v = v.as_ref();
            if v.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    actual: v.len(),
                });
            }
            data.extend_from_slice(v);
        }

        let actual = data.len();
        let vectors = Array2::from_shape_vec((vectors.len(), dim), data).map_err(|_| {
            IndexError::DimensionMismatch {
                expected: dim,
                actual,
            }
        })?;

        Ok(Self { vectors })
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.vectors.ncols()
    }

    /// Return the `k` stored vectors closest to `query`, nearest first.
    ///
    /// `k` is clamped to the number of stored vectors. Equal distances keep
    /// their insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions(),
                actual: query.len(),
            });
        }

        let query = ArrayView1::from(query);
        let mut hits: Vec<Neighbor> = self
            .vectors
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(position, row)| {
                let diff = &row - &query;
                Neighbor {
                    position,
                    distance: diff.dot(&diff).sqrt(),
                }
            })
            .collect();

        // `sort_by` is stable, which gives the insertion-order tie break.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k.min(self.len()));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_build_empty() {
        let empty: Vec<Vec<f32>> = Vec::new();
        assert_eq!(SimilarityIndex::build(&empty).unwrap_err(), IndexError::Empty);
    }

    #[test]
    fn test_build_ragged() {
        let vectors: Vec<Vec<f32>> = vec![vec![1.0, 2.0], vec![1.0]];
        assert_eq!(
            SimilarityIndex::build(&vectors).unwrap_err(),
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_self_match_is_zero() {
        let vectors: Vec<Vec<f32>> = vec![
            vec![0.3, 0.1, 0.9],
            vec![1.0, 1.0, 1.0],
            vec![-2.0, 0.0, 4.0],
        ];
        let index = SimilarityIndex::build(&vectors).unwrap();
        let hits = index.search(&vectors[2], 1).unwrap();
        assert_eq!(hits[0].position, 2);
        assert!(approx(hits[0].distance, 0.0));
    }

    #[test]
    fn test_true_euclidean_distance() {
        let vectors: Vec<Vec<f32>> = vec![vec![0.0, 0.0]];
        let index = SimilarityIndex::build(&vectors).unwrap();
        let hits = index.search(&[3.0, 4.0], 1).unwrap();
        assert!(approx(hits[0].distance, 5.0));
    }

    #[test]
    fn test_ascending_order() {
        let vectors: Vec<Vec<f32>> = vec![vec![10.0], vec![1.0], vec![5.0], vec![2.0]];
        let index = SimilarityIndex::build(&vectors).unwrap();
        let order: Vec<usize> = index
            .search(&[0.0], 4)
            .unwrap()
            .iter()
            .map(|h| h.position)
            .collect();
        assert_eq!(order, vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_k_clamped() {
        let vectors: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let index = SimilarityIndex::build(&vectors).unwrap();
        let hits = index.search(&[0.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let vectors: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
        let index = SimilarityIndex::build(&vectors).unwrap();
        let order: Vec<usize> = index
            .search(&[0.0, 0.0], 3)
            .unwrap()
            .iter()
            .map(|h| h.position)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = SimilarityIndex::build(&[vec![1.0_f32, 2.0, 3.0]]).unwrap();
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_k_zero() {
        let index = SimilarityIndex::build(&[vec![1.0_f32]]).unwrap();
        assert!(index.search(&[1.0], 0).unwrap().is_empty());
    }
}
