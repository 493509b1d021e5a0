//! Ablation crater (beam) profiles.
//!
//! The generated profile is a round super-Gaussian `exp(-2 (r / sigma)^n)`
//! on a `(beam + 1) x (beam + 1)` grid centred on the spot, shifted down by
//! the `1/e^2` threshold, rescaled to a unit peak and clipped at zero.

use super::StageError;
use ndarray::Array2;
use std::borrow::Cow;

const STAGE: &str = "crater";

#[derive(Debug, Clone, PartialEq)]
pub enum CraterProfile {
    /// Measured kernel loaded from the lookup data.
    Default(Array2<f64>),
    /// Generated from the super-Gaussian order.
    SuperGaussian { order: f64 },
}

impl CraterProfile {
    pub fn resolve(&self, beam_size_um: u32) -> Result<Cow<'_, Array2<f64>>, StageError> {
        match self {
            Self::Default(kernel) => {
                validate_kernel(kernel)?;
                Ok(Cow::Borrowed(kernel))
            }
            Self::SuperGaussian { order } => {
                super_gaussian_profile(*order, beam_size_um).map(Cow::Owned)
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Default(kernel) => {
                let (rows, cols) = kernel.dim();
                format!("default {rows}x{cols}")
            }
            Self::SuperGaussian { order } => format!("super-gaussian n={order}"),
        }
    }
}

fn validate_kernel(kernel: &Array2<f64>) -> Result<(), StageError> {
    if kernel.is_empty() {
        return Err(StageError::shape(STAGE, "crater kernel is empty"));
    }
    if let Some(((row, col), value)) = kernel.indexed_iter().find(|(_, value)| !value.is_finite()) {
        return Err(StageError::parameter(
            STAGE,
            format!("crater kernel value at ({row}, {col}) is not finite: {value}"),
        ));
    }
    if !kernel.iter().any(|value| *value > 0.0) {
        return Err(StageError::degeneracy(
            STAGE,
            "crater kernel has no positive weight",
        ));
    }
    Ok(())
}

pub fn super_gaussian_profile(order: f64, beam_size_um: u32) -> Result<Array2<f64>, StageError> {
    if !(order.is_finite() && order > 0.0) {
        return Err(StageError::parameter(
            STAGE,
            format!("super-gaussian order must be finite and > 0, got {order}"),
        ));
    }
    if beam_size_um == 0 {
        return Err(StageError::parameter(STAGE, "beam size must be > 0"));
    }

    let beam = f64::from(beam_size_um);
    let half = beam / 2.0;
    let sigma = half.round_ties_even();
    let points = beam_size_um as usize + 1;
    let raw = Array2::from_shape_fn((points, points), |(row, col)| {
        let y = row as f64 - half;
        let x = col as f64 - half;
        let radius = (x * x + y * y).sqrt();
        (-2.0 * (radius / sigma).powf(order)).exp()
    });

    let raw_peak = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let threshold = (-2.0f64).exp() * raw_peak;
    let shifted = raw.mapv(|value| value - threshold);
    let peak = shifted.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(peak > 0.0) {
        return Err(StageError::degeneracy(
            STAGE,
            format!("super-gaussian order {order} leaves no profile above threshold"),
        ));
    }
    Ok(shifted.mapv(|value| (value / peak).max(0.0)))
}
