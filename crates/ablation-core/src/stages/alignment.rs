//! Shift search that lines the noisy image up with the reference.
//!
//! The noisy image is padded with zero columns on its trailing edge; every
//! candidate shift cuts a fixed window starting at that column, renormalizes
//! it and scores it against the reference with mean SSIM. The best score
//! wins and ties go to the lowest shift.

use super::{StageError, normalize_for_stage};
use crate::common::{AlignmentConfig, SsimConfig};
use crate::numerics::structural_similarity;
use ndarray::{Array2, ArrayView2, s};
use tracing::debug;

const STAGE: &str = "alignment";

#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentOutcome {
    /// Winning window, renormalized to a unit maximum.
    pub window: Array2<f64>,
    pub shift: usize,
    pub score: f64,
    /// `(shift, score)` for every candidate, in search order.
    pub candidates: Vec<(usize, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentOptimizer {
    alignment: AlignmentConfig,
    ssim: SsimConfig,
}

impl AlignmentOptimizer {
    pub fn new(alignment: AlignmentConfig, ssim: SsimConfig) -> Result<Self, StageError> {
        if alignment.window_rows == 0 || alignment.window_cols == 0 {
            return Err(StageError::parameter(STAGE, "alignment window must be non-empty"));
        }
        if alignment.shift_start >= alignment.shift_end {
            return Err(StageError::parameter(
                STAGE,
                format!(
                    "shift range {}..{} is empty",
                    alignment.shift_start, alignment.shift_end
                ),
            ));
        }
        Ok(Self { alignment, ssim })
    }

    pub fn window_shape(&self) -> (usize, usize) {
        (self.alignment.window_rows, self.alignment.window_cols)
    }

    /// Top-left `window` of the reference, which must be at least that large.
    pub fn crop_reference<'a>(
        &self,
        reference: &'a ArrayView2<'_, f64>,
    ) -> Result<ArrayView2<'a, f64>, StageError> {
        let (rows, cols) = self.window_shape();
        let (reference_rows, reference_cols) = reference.dim();
        if reference_rows < rows || reference_cols < cols {
            return Err(StageError::shape(
                STAGE,
                format!(
                    "reference {reference_rows}x{reference_cols} is smaller than the {rows}x{cols} window"
                ),
            ));
        }
        Ok(reference.slice(s![..rows, ..cols]))
    }

    pub fn align(
        &self,
        noisy: &ArrayView2<'_, f64>,
        reference: &ArrayView2<'_, f64>,
    ) -> Result<AlignmentOutcome, StageError> {
        let (window_rows, window_cols) = self.window_shape();
        let reference = self.crop_reference(reference)?;
        let (noisy_rows, noisy_cols) = noisy.dim();
        if noisy_rows < window_rows {
            return Err(StageError::IndexOutOfRange {
                stage: STAGE,
                what: "window row",
                index: window_rows - 1,
                len: noisy_rows,
            });
        }

        let padded_cols = noisy_cols + self.alignment.padding_columns;
        let last_shift = self.alignment.shift_end - 1;
        if last_shift + window_cols > padded_cols {
            return Err(StageError::IndexOutOfRange {
                stage: STAGE,
                what: "window column",
                index: last_shift + window_cols - 1,
                len: padded_cols,
            });
        }
        let mut padded = Array2::zeros((window_rows, padded_cols));
        padded
            .slice_mut(s![.., ..noisy_cols])
            .assign(&noisy.slice(s![..window_rows, ..]));

        let mut best: Option<(usize, f64, Array2<f64>)> = None;
        let mut candidates =
            Vec::with_capacity(self.alignment.shift_end - self.alignment.shift_start);
        for shift in self.alignment.shift_start..self.alignment.shift_end {
            let window = normalize_for_stage(
                STAGE,
                "shifted window",
                &padded.slice(s![.., shift..shift + window_cols]),
            )?;
            let score = structural_similarity(&window.view(), &reference, &self.ssim)
                .map_err(|error| StageError::shape(STAGE, error.to_string()))?;
            if !score.is_finite() {
                return Err(StageError::degeneracy(
                    STAGE,
                    format!("similarity at shift {shift} is not finite"),
                ));
            }
            candidates.push((shift, score));
            let improves = best
                .as_ref()
                .is_none_or(|(_, best_score, _)| score > *best_score);
            if improves {
                best = Some((shift, score, window));
            }
        }

        let (shift, score, window) = best.ok_or_else(|| {
            StageError::parameter(STAGE, "no candidate shifts were evaluated")
        })?;
        debug!(shift, score, candidates = candidates.len(), "alignment selected");
        Ok(AlignmentOutcome {
            window,
            shift,
            score,
            candidates,
        })
    }
}
