//! Mapping between horizontal grid indices and flat profile-batch indices
//!
//! Profiles are matched back to coordinates by position in the batch, so the
//! converter and the aggregator must agree on this mapping. Both go through
//! [`grid_to_batch_index`].

use crate::errors::{FluxError, FluxResult};
use serde::{Deserialize, Serialize};

/// Stride used to flatten `(lat_index, lon_index)` into a batch index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStride {
    /// `lat_index * n_lon + lon_index`
    ///
    /// Matches the row-major order in which batches are built.
    #[default]
    RowMajor,
    /// `lat_index * n_lat + lon_index`
    ///
    /// Reproduces the indexing of the reference Python workflow. Only pairs
    /// profiles with the right coordinates when `n_lat == n_lon`.
    LatitudeCount,
}

/// Horizontal grid dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub n_lat: usize,
    pub n_lon: usize,
}

impl GridShape {
    pub fn new(n_lat: usize, n_lon: usize) -> Self {
        Self { n_lat, n_lon }
    }

    pub fn len(&self) -> usize {
        self.n_lat * self.n_lon
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_square(&self) -> bool {
        self.n_lat == self.n_lon
    }

    /// Iterate `(lat_index, lon_index)` with latitude outer and longitude inner
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> {
        let n_lon = self.n_lon;
        (0..self.n_lat).flat_map(move |i| (0..n_lon).map(move |j| (i, j)))
    }
}

/// Flat batch index for `(lat_index, lon_index)`
///
/// The result is not bounds-checked; see [`checked_batch_index`].
pub fn grid_to_batch_index(
    lat_index: usize,
    lon_index: usize,
    shape: GridShape,
    stride: IndexStride,
) -> usize {
    match stride {
        IndexStride::RowMajor => lat_index * shape.n_lon + lon_index,
        IndexStride::LatitudeCount => lat_index * shape.n_lat + lon_index,
    }
}

/// As [`grid_to_batch_index`] but fails when the index falls outside the batch
pub fn checked_batch_index(
    lat_index: usize,
    lon_index: usize,
    shape: GridShape,
    stride: IndexStride,
) -> FluxResult<usize> {
    let index = grid_to_batch_index(lat_index, lon_index, shape, stride);
    if index >= shape.len() {
        return Err(FluxError::BatchIndexOutOfRange {
            index,
            len: shape.len(),
            lat_index,
            lon_index,
        });
    }
    Ok(index)
}

/// Inverse of the row-major mapping
pub fn batch_to_grid_index(index: usize, shape: GridShape) -> Option<(usize, usize)> {
    if index >= shape.len() {
        return None;
    }
    Some((index / shape.n_lon, index % shape.n_lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_is_a_bijection() {
        let shape = GridShape::new(3, 5);
        let mut seen = vec![false; shape.len()];
        for (i, j) in shape.iter() {
            let idx = grid_to_batch_index(i, j, shape, IndexStride::RowMajor);
            assert!(!seen[idx], "index {} produced twice", idx);
            seen[idx] = true;
            assert_eq!(batch_to_grid_index(idx, shape), Some((i, j)));
        }
        assert!(seen.into_iter().all(|s| s));
    }

    #[test]
    fn test_iteration_order_matches_row_major() {
        let shape = GridShape::new(2, 3);
        let order: Vec<usize> = shape
            .iter()
            .map(|(i, j)| grid_to_batch_index(i, j, shape, IndexStride::RowMajor))
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_strides_agree_on_square_grids() {
        let shape = GridShape::new(4, 4);
        for (i, j) in shape.iter() {
            assert_eq!(
                grid_to_batch_index(i, j, shape, IndexStride::RowMajor),
                grid_to_batch_index(i, j, shape, IndexStride::LatitudeCount)
            );
        }
    }

    #[test]
    fn test_latitude_count_stride_on_wide_grid() {
        // 2 x 3: the legacy stride revisits index 2 and never reaches 3..5
        let shape = GridShape::new(2, 3);
        let order: Vec<usize> = shape
            .iter()
            .map(|(i, j)| grid_to_batch_index(i, j, shape, IndexStride::LatitudeCount))
            .collect();
        assert_eq!(order, vec![0, 1, 2, 2, 3, 4]);
    }

    #[test]
    fn test_latitude_count_stride_overflows_tall_grid() {
        let shape = GridShape::new(3, 2);
        assert_eq!(
            checked_batch_index(2, 1, shape, IndexStride::LatitudeCount).unwrap_err().to_string(),
            "Batch index 7 is out of range for a batch of 6 profiles (lat index 2, lon index 1)"
        );
        assert_eq!(checked_batch_index(2, 1, shape, IndexStride::RowMajor).unwrap(), 5);
    }

    #[test]
    fn test_inverse_out_of_range() {
        assert_eq!(batch_to_grid_index(6, GridShape::new(2, 3)), None);
    }
}
