//! Mean structural similarity with uniform local windows.
//!
//! Local statistics use a `w x w` box window with sample covariance
//! (`N / (N - 1)`), and the mean is taken over the interior where the window
//! fits entirely, i.e. a border of `(w - 1) / 2` pixels is excluded.

use crate::common::SsimConfig;
use ndarray::{Array2, ArrayView2};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SsimError {
    #[error("image shapes differ: {first:?} vs {second:?}")]
    ShapeMismatch {
        first: (usize, usize),
        second: (usize, usize),
    },
    #[error("window size {window} exceeds image shape {shape:?}")]
    WindowTooLarge { window: usize, shape: (usize, usize) },
    #[error("window size must be odd and >= 3, got {window}")]
    InvalidWindow { window: usize },
}

/// Summed-area table with a leading zero row and column.
struct IntegralImage {
    sums: Array2<f64>,
}

impl IntegralImage {
    fn from_fn(rows: usize, cols: usize, value: impl Fn(usize, usize) -> f64) -> Self {
        let mut sums = Array2::zeros((rows + 1, cols + 1));
        for row in 0..rows {
            let mut running = 0.0;
            for col in 0..cols {
                running += value(row, col);
                sums[[row + 1, col + 1]] = sums[[row, col + 1]] + running;
            }
        }
        Self { sums }
    }

    /// Sum over rows `top..top + size` and columns `left..left + size`.
    fn window_sum(&self, top: usize, left: usize, size: usize) -> f64 {
        let bottom = top + size;
        let right = left + size;
        self.sums[[bottom, right]] - self.sums[[top, right]] - self.sums[[bottom, left]]
            + self.sums[[top, left]]
    }
}

pub fn structural_similarity(
    first: &ArrayView2<'_, f64>,
    second: &ArrayView2<'_, f64>,
    config: &SsimConfig,
) -> Result<f64, SsimError> {
    if first.dim() != second.dim() {
        return Err(SsimError::ShapeMismatch {
            first: first.dim(),
            second: second.dim(),
        });
    }
    let window = config.window_size;
    if window < 3 || window % 2 == 0 {
        return Err(SsimError::InvalidWindow { window });
    }
    let (rows, cols) = first.dim();
    if window > rows || window > cols {
        return Err(SsimError::WindowTooLarge {
            window,
            shape: (rows, cols),
        });
    }

    let x = IntegralImage::from_fn(rows, cols, |r, c| first[[r, c]]);
    let y = IntegralImage::from_fn(rows, cols, |r, c| second[[r, c]]);
    let xx = IntegralImage::from_fn(rows, cols, |r, c| first[[r, c]] * first[[r, c]]);
    let yy = IntegralImage::from_fn(rows, cols, |r, c| second[[r, c]] * second[[r, c]]);
    let xy = IntegralImage::from_fn(rows, cols, |r, c| first[[r, c]] * second[[r, c]]);

    let samples = (window * window) as f64;
    let covariance_norm = samples / (samples - 1.0);
    let c1 = (config.k1 * config.data_range).powi(2);
    let c2 = (config.k2 * config.data_range).powi(2);

    let mut total = 0.0;
    let mut count = 0usize;
    for top in 0..=rows - window {
        for left in 0..=cols - window {
            let ux = x.window_sum(top, left, window) / samples;
            let uy = y.window_sum(top, left, window) / samples;
            let uxx = xx.window_sum(top, left, window) / samples;
            let uyy = yy.window_sum(top, left, window) / samples;
            let uxy = xy.window_sum(top, left, window) / samples;

            let vx = covariance_norm * (uxx - ux * ux);
            let vy = covariance_norm * (uyy - uy * uy);
            let vxy = covariance_norm * (uxy - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            count += 1;
        }
    }

    Ok(total / count as f64)
}
