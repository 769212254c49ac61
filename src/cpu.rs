//! CPU reference implementation of the kernels.
//!
//! Uses the same row-major layout as the device path so results can be
//! compared element by element.

use crate::config::Metric;
use crate::dataset::VectorDataset;
use crate::error::Result;
use crate::pipeline::{validate_shapes, DistanceResult};
use rayon::prelude::*;

/// Squared Euclidean distance between two equally long slices.
#[inline]
pub fn distance_squared_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Distance between two vectors under `metric`.
#[inline]
pub fn distance_f32(a: &[f32], b: &[f32], metric: Metric) -> f32 {
    let sq = distance_squared_f32(a, b);
    if metric.apply_sqrt() {
        sq.sqrt()
    } else {
        sq
    }
}

/// Distances of every input to every weight, in parallel over inputs.
pub fn distances(
    input: &VectorDataset,
    weights: &VectorDataset,
    metric: Metric,
) -> Result<DistanceResult> {
    validate_shapes(input, weights)?;

    let num_weights = weights.count();
    let rows: Vec<&[f32]> = input.iter().collect();
    let weight_rows: Vec<&[f32]> = weights.iter().collect();

    let values: Vec<f32> = rows
        .par_iter()
        .flat_map_iter(|row| weight_rows.iter().map(move |w| distance_f32(row, w, metric)))
        .collect();

    Ok(DistanceResult {
        size: input.count(),
        dimension: num_weights,
        values,
    })
}

/// Adds one to every component.
pub fn add_one(data: &VectorDataset) -> Result<VectorDataset> {
    let values = data.as_slice().par_iter().map(|v| v + 1.0).collect();
    VectorDataset::new(data.count(), data.dimension(), values)
}

/// Largest absolute element-wise difference; `None` if lengths differ.
pub fn max_abs_deviation(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0f32, f32::max),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SomGpuError;

    #[test]
    fn test_distance_squared() {
        let a = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let b = vec![0.0f32; 9];
        let dist = distance_squared_f32(&a, &b);
        let expected: f32 = (1..=9).map(|x| (x * x) as f32).sum();
        assert!((dist - expected).abs() < 1e-4);
    }

    #[test]
    fn test_pythagorean_pair() {
        let input = VectorDataset::from_rows(&[[0.0f32, 0.0], [3.0, 4.0]]).unwrap();
        let weight = VectorDataset::from_rows(&[[0.0f32, 0.0]]).unwrap();

        let result = distances(&input, &weight, Metric::Euclidean).unwrap();
        assert_eq!(result.size, 2);
        assert_eq!(result.dimension, 1);
        assert_eq!(result.values, vec![0.0, 5.0]);

        let squared = distances(&input, &weight, Metric::SquaredEuclidean).unwrap();
        assert_eq!(squared.values, vec![0.0, 25.0]);
    }

    #[test]
    fn test_multiple_weights_row_major() {
        let input = VectorDataset::from_rows(&[[1.0f32, 0.0], [0.0, 1.0]]).unwrap();
        let weights = VectorDataset::from_rows(&[[1.0f32, 0.0], [0.0, 1.0], [0.0, 0.0]]).unwrap();

        let result = distances(&input, &weights, Metric::SquaredEuclidean).unwrap();
        assert_eq!(result.values, vec![0.0, 2.0, 1.0, 2.0, 0.0, 1.0]);
        assert_eq!(result.row(1), Some(&[2.0, 0.0, 1.0][..]));
    }

    #[test]
    fn test_dimension_mismatch() {
        let input = VectorDataset::from_rows(&[[1.0f32, 0.0]]).unwrap();
        let weights = VectorDataset::from_rows(&[[1.0f32, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            distances(&input, &weights, Metric::Euclidean),
            Err(SomGpuError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_add_one() {
        let data = VectorDataset::from_rows(&[[1.0f32, -1.0], [0.5, 2.0]]).unwrap();
        let out = add_one(&data).unwrap();
        assert_eq!(out.as_slice(), &[2.0, 0.0, 1.5, 3.0]);
    }

    #[test]
    fn test_max_abs_deviation() {
        assert_eq!(max_abs_deviation(&[1.0, 2.0], &[1.5, 1.0]), Some(1.0));
        assert_eq!(max_abs_deviation(&[], &[]), Some(0.0));
        assert_eq!(max_abs_deviation(&[1.0], &[]), None);
    }
}
