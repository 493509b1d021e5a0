//! Full (zero padded) linear convolution on dense matrices.
//!
//! Both helpers accumulate one shifted, scaled copy of the input per kernel
//! tap, so zero taps of a crater profile cost nothing.

use ndarray::{Array2, ArrayView2, s};

/// 2D full convolution; the output has `input + kernel - 1` rows and columns.
///
/// Returns an empty matrix when either operand is empty.
pub fn convolve2d_full(image: &ArrayView2<'_, f64>, kernel: &ArrayView2<'_, f64>) -> Array2<f64> {
    let (rows, cols) = image.dim();
    let (kernel_rows, kernel_cols) = kernel.dim();
    if rows == 0 || cols == 0 || kernel_rows == 0 || kernel_cols == 0 {
        return Array2::zeros((0, 0));
    }

    let mut output = Array2::zeros((rows + kernel_rows - 1, cols + kernel_cols - 1));
    for ((row_offset, col_offset), &weight) in kernel.indexed_iter() {
        if weight == 0.0 {
            continue;
        }
        output
            .slice_mut(s![
                row_offset..row_offset + rows,
                col_offset..col_offset + cols
            ])
            .scaled_add(weight, image);
    }
    output
}

/// Convolves every row with the same 1D kernel (a `1 x n` 2D kernel).
pub fn convolve_rows_full(grid: &ArrayView2<'_, f64>, kernel: &[f64]) -> Array2<f64> {
    let (rows, cols) = grid.dim();
    if rows == 0 || cols == 0 || kernel.is_empty() {
        return Array2::zeros((rows, 0));
    }

    let mut output = Array2::zeros((rows, cols + kernel.len() - 1));
    for (offset, &weight) in kernel.iter().enumerate() {
        if weight == 0.0 {
            continue;
        }
        output
            .slice_mut(s![.., offset..offset + cols])
            .scaled_add(weight, grid);
    }
    output
}
