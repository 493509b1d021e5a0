pub mod convolution;
pub mod resample;
pub mod ssim;

pub use convolution::{convolve_rows_full, convolve2d_full};
pub use resample::{ResampleError, bessel_i0, firwin_lowpass, kaiser_window, resample_poly};
pub use ssim::{SsimError, structural_similarity};

use ndarray::{Array2, ArrayView2};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizationError {
    #[error("value at {index:?} is not finite")]
    NonFinite { index: (usize, usize) },
    #[error("maximum value {maximum} is not positive")]
    NonPositiveMaximum { maximum: f64 },
    #[error("cannot normalize an empty image")]
    Empty,
}

/// Scales `image` so its largest value is exactly one.
pub fn normalize_by_max(image: &ArrayView2<'_, f64>) -> Result<Array2<f64>, NormalizationError> {
    if image.is_empty() {
        return Err(NormalizationError::Empty);
    }
    if let Some((index, _)) = image.indexed_iter().find(|(_, value)| !value.is_finite()) {
        return Err(NormalizationError::NonFinite { index });
    }
    let maximum = image.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if maximum <= 0.0 {
        return Err(NormalizationError::NonPositiveMaximum { maximum });
    }
    Ok(image.mapv(|value| value / maximum))
}

/// `(min, max)` over the finite values, or `None` when there are none.
pub fn value_range(image: &ArrayView2<'_, f64>) -> Option<(f64, f64)> {
    image
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .fold(None, |range, value| match range {
            None => Some((value, value)),
            Some((low, high)) => Some((f64::min(low, value), f64::max(high, value))),
        })
}

/// Block average over `(block_rows, block_cols)` tiles.
///
/// Partial tiles at the trailing edges are zero padded, so they average over
/// the full tile area. The output has `ceil(rows / block_rows)` rows and
/// `ceil(cols / block_cols)` columns.
pub fn block_mean(image: &ArrayView2<'_, f64>, block: (usize, usize)) -> Array2<f64> {
    let (block_rows, block_cols) = block;
    let (rows, cols) = image.dim();
    if block_rows == 0 || block_cols == 0 {
        return Array2::zeros((0, 0));
    }

    let out_rows = rows.div_ceil(block_rows);
    let out_cols = cols.div_ceil(block_cols);
    let area = (block_rows * block_cols) as f64;
    let mut output = Array2::zeros((out_rows, out_cols));
    for ((row, col), &value) in image.indexed_iter() {
        output[[row / block_rows, col / block_cols]] += value;
    }
    output.mapv_inplace(|sum: f64| sum / area);
    output
}
