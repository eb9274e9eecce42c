//! Exact nearest-neighbor index over L2-normalized vectors.
//!
//! Stores the embedding matrix row-major and searches it exhaustively; row
//! position is the chunk id. No approximate structures, so results are
//! exact and reproducible.

use rayon::prelude::*;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}

/// A nearest-neighbor candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Row position in the index, which is also the chunk id.
    pub position: usize,
    /// Euclidean distance to the query; both sides are unit vectors, so
    /// this falls in [0, 2].
    pub distance: f32,
}

/// Exact flat index over a dense row-major embedding matrix.
///
/// All rows are unit-normalized at construction. `search` scans every row,
/// so lookups are O(rows * dimensions) by design.
pub struct FlatIndex {
    dimensions: usize,
    count: usize,
    vectors: Vec<f32>,
}

impl FlatIndex {
    /// Build an index from per-chunk embedding rows.
    ///
    /// Rows are normalized in place; a row of the wrong width or with zero
    /// norm is rejected.
    pub fn from_vectors(dimensions: usize, rows: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        let count = rows.len();
        let mut vectors = Vec::with_capacity(count * dimensions);

        for mut row in rows {
            if row.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    got: row.len(),
                });
            }
            normalize(&mut row)?;
            vectors.extend_from_slice(&row);
        }

        Ok(Self {
            dimensions,
            count,
            vectors,
        })
    }

    /// Rebuild an index from a flat persisted matrix.
    ///
    /// Rows are renormalized rather than trusted to still be unit length.
    pub fn from_raw(dimensions: usize, mut data: Vec<f32>) -> Result<Self, IndexError> {
        if dimensions == 0 || data.len() % dimensions != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: data.len(),
            });
        }

        for row in data.chunks_exact_mut(dimensions) {
            normalize(row)?;
        }

        Ok(Self {
            dimensions,
            count: data.len() / dimensions,
            vectors: data,
        })
    }

    /// Get the embedding dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Get the number of rows in the index.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The full matrix, row-major. Used by persistence.
    pub fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// One normalized row, if in range.
    pub fn row(&self, position: usize) -> Option<&[f32]> {
        if position >= self.count {
            return None;
        }
        Some(&self.vectors[position * self.dimensions..(position + 1) * self.dimensions])
    }

    /// Find the `k` nearest rows to `query` by euclidean distance.
    ///
    /// The query is normalized before the scan. Results come back closest
    /// first; equal distances keep ascending position order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut query = query.to_vec();
        normalize(&mut query)?;

        if k == 0 || self.is_empty() {
            return Ok(vec![]);
        }

        let mut neighbors: Vec<Neighbor> = (0..self.count)
            .into_par_iter()
            .map(|position| {
                let row =
                    &self.vectors[position * self.dimensions..(position + 1) * self.dimensions];
                Neighbor {
                    position,
                    distance: euclidean(&query, row),
                }
            })
            .collect();

        // stable sort: ties resolve to the lower position
        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        neighbors.truncate(k);

        Ok(neighbors)
    }
}

/// Scale `v` to unit length in place.
fn normalize(v: &mut [f32]) -> Result<(), IndexError> {
    let norm = l2_norm(v);
    if !norm.is_finite() || norm < f32::EPSILON {
        return Err(IndexError::ZeroNormVector);
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(())
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_2d(rows: &[[f32; 2]]) -> FlatIndex {
        FlatIndex::from_vectors(2, rows.iter().map(|r| r.to_vec()).collect()).unwrap()
    }

    #[test]
    fn test_empty_index() {
        let index = FlatIndex::from_vectors(384, vec![]).unwrap();
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());

        let results = index.search(&vec![1.0; 384], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_rows_normalized_at_build() {
        let index = index_2d(&[[3.0, 4.0]]);

        let row = index.row(0).unwrap();
        assert!((row[0] - 0.6).abs() < 1e-6);
        assert!((row[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_ragged_row_rejected() {
        let result = FlatIndex::from_vectors(3, vec![vec![1.0, 0.0, 0.0], vec![1.0, 0.0]]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_zero_norm_row_rejected() {
        let result = FlatIndex::from_vectors(3, vec![vec![0.0, 0.0, 0.0]]);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = index_2d(&[[1.0, 0.0]]);
        let result = index.search(&[1.0, 0.0, 0.0], 5);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_zero_norm_query_rejected() {
        let index = index_2d(&[[1.0, 0.0]]);
        let result = index.search(&[0.0, 0.0], 5);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_closest_first_ordering() {
        let index = index_2d(&[[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);

        let results = index.search(&[1.0, 0.0], 10).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].position, 0);
        assert!(results[0].distance.abs() < 1e-6); // identical vector
        assert_eq!(results[1].position, 2);
        assert_eq!(results[2].position, 1);
        assert!(results[1].distance < results[2].distance);
    }

    #[test]
    fn test_equal_distances_keep_position_order() {
        // rows 1 and 2 are identical, both equidistant from the query
        let index = index_2d(&[[0.0, 1.0], [1.0, 0.0], [1.0, 0.0]]);

        let results = index.search(&[1.0, 0.0], 10).unwrap();

        assert_eq!(results[0].position, 1);
        assert_eq!(results[1].position, 2);
    }

    #[test]
    fn test_k_truncates_results() {
        let rows: Vec<Vec<f32>> = (0..10).map(|i| vec![1.0, i as f32 * 0.1]).collect();
        let index = FlatIndex::from_vectors(2, rows).unwrap();

        let results = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_k_zero_returns_nothing() {
        let index = index_2d(&[[1.0, 0.0]]);
        let results = index.search(&[1.0, 0.0], 0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_k_larger_than_index() {
        let index = index_2d(&[[1.0, 0.0], [0.0, 1.0]]);
        let results = index.search(&[1.0, 0.0], 100).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_distances_within_unit_sphere_bound() {
        let index = index_2d(&[[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0]]);

        let results = index.search(&[1.0, 0.0], 10).unwrap();

        for neighbor in &results {
            assert!(neighbor.distance >= 0.0);
            assert!(neighbor.distance <= 2.0 + 1e-6);
        }
        // opposite vector sits at the far pole
        assert!((results.last().unwrap().distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_unnormalized_query_matches_normalized() {
        let index = index_2d(&[[1.0, 0.0], [0.0, 1.0]]);

        let scaled = index.search(&[10.0, 0.0], 10).unwrap();
        let unit = index.search(&[1.0, 0.0], 10).unwrap();

        assert_eq!(scaled.len(), unit.len());
        for (a, b) in scaled.iter().zip(unit.iter()) {
            assert_eq!(a.position, b.position);
            assert!((a.distance - b.distance).abs() < 1e-6);
        }
    }

    #[test]
    fn test_from_raw_roundtrip() {
        let built = index_2d(&[[1.0, 0.0], [0.0, 1.0], [3.0, 4.0]]);

        let reloaded = FlatIndex::from_raw(2, built.raw_vectors().to_vec()).unwrap();

        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.raw_vectors(), built.raw_vectors());
    }

    #[test]
    fn test_from_raw_renormalizes() {
        let index = FlatIndex::from_raw(2, vec![5.0, 0.0]).unwrap();

        let row = index.row(0).unwrap();
        assert!((row[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_raw_bad_shape_rejected() {
        let result = FlatIndex::from_raw(3, vec![1.0, 0.0, 0.0, 1.0]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }
}
