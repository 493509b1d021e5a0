pub mod alignment;
pub mod crater;
pub mod quantifier;
pub mod spatial_blur;
pub mod temporal_washout;

pub use alignment::{AlignmentOptimizer, AlignmentOutcome};
pub use crater::{CraterProfile, super_gaussian_profile};
pub use quantifier::{NoiseModel, Quantifier};
pub use spatial_blur::SpatialBlurStage;
pub use temporal_washout::TemporalWashoutStage;

use crate::domain::AblationError;
use crate::numerics::{NormalizationError, normalize_by_max};
use ndarray::{Array2, ArrayView2};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("{stage}: numeric degeneracy: {detail}")]
    NumericDegeneracy { stage: &'static str, detail: String },
    #[error("{stage}: {what} index {index} is out of range (len {len})")]
    IndexOutOfRange {
        stage: &'static str,
        what: &'static str,
        index: usize,
        len: usize,
    },
    #[error("{stage}: shape mismatch: {detail}")]
    ShapeMismatch { stage: &'static str, detail: String },
    #[error("{stage}: invalid parameter: {detail}")]
    InvalidParameter { stage: &'static str, detail: String },
}

impl StageError {
    pub fn degeneracy(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::NumericDegeneracy {
            stage,
            detail: detail.into(),
        }
    }

    pub fn shape(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            stage,
            detail: detail.into(),
        }
    }

    pub fn parameter(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidParameter {
            stage,
            detail: detail.into(),
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::NumericDegeneracy { stage, .. }
            | Self::IndexOutOfRange { stage, .. }
            | Self::ShapeMismatch { stage, .. }
            | Self::InvalidParameter { stage, .. } => stage,
        }
    }
}

impl From<StageError> for AblationError {
    fn from(error: StageError) -> Self {
        let message = error.to_string();
        match error {
            StageError::NumericDegeneracy { .. } => {
                AblationError::computation("RUN.NUMERIC_DEGENERACY", message)
            }
            StageError::ShapeMismatch { .. } => {
                AblationError::computation("RUN.SHAPE_MISMATCH", message)
            }
            StageError::IndexOutOfRange { .. } => {
                AblationError::input_validation("INPUT.INDEX_OUT_OF_RANGE", message)
            }
            StageError::InvalidParameter { .. } => {
                AblationError::input_validation("INPUT.INVALID_PARAMETER", message)
            }
        }
    }
}

/// Max-normalization with the failure mapped onto the calling stage.
pub(crate) fn normalize_for_stage(
    stage: &'static str,
    what: &str,
    image: &ArrayView2<'_, f64>,
) -> Result<Array2<f64>, StageError> {
    normalize_by_max(image).map_err(|error| match error {
        NormalizationError::Empty => StageError::shape(stage, format!("{what} is empty")),
        other => StageError::degeneracy(stage, format!("cannot normalize {what}: {other}")),
    })
}
