use super::{StageError, normalize_for_stage};
use crate::numerics::convolve2d_full;
use ndarray::{Array2, ArrayView2, s};
use tracing::debug;

const STAGE: &str = "spatial-blur";

/// Blurs the normalized image with the crater kernel and samples it at the
/// centre of every ablation pixel: one row per beam width, one column per
/// `beam / dosage` step along the scan axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialBlurStage {
    row_stride: usize,
    column_stride: usize,
}

impl SpatialBlurStage {
    pub fn new(beam_size_um: u32, dosage: u32) -> Result<Self, StageError> {
        if beam_size_um == 0 || dosage == 0 {
            return Err(StageError::parameter(
                STAGE,
                format!("beam size {beam_size_um} and dosage {dosage} must be > 0"),
            ));
        }
        if beam_size_um % dosage != 0 {
            return Err(StageError::parameter(
                STAGE,
                format!("dosage {dosage} does not divide beam size {beam_size_um}"),
            ));
        }
        Ok(Self {
            row_stride: beam_size_um as usize,
            column_stride: (beam_size_um / dosage) as usize,
        })
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn column_stride(&self) -> usize {
        self.column_stride
    }

    pub fn apply(
        &self,
        normalized_image: &ArrayView2<'_, f64>,
        crater: &ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, StageError> {
        let convolved = convolve2d_full(normalized_image, crater);
        let (rows, cols) = convolved.dim();
        if rows < self.row_stride || cols < self.column_stride {
            return Err(StageError::shape(
                STAGE,
                format!(
                    "blurred image {rows}x{cols} is smaller than one sampling step {}x{}",
                    self.row_stride, self.column_stride
                ),
            ));
        }

        let normalized = normalize_for_stage(STAGE, "blurred image", &convolved.view())?;
        let sampled = normalized
            .slice(s![
                self.row_stride - 1..;self.row_stride,
                self.column_stride - 1..;self.column_stride
            ])
            .to_owned();
        debug!(
            blurred = ?(rows, cols),
            sampled = ?sampled.dim(),
            row_stride = self.row_stride,
            column_stride = self.column_stride,
            "spatial blur applied"
        );
        Ok(sampled)
    }
}

#[cfg(test)]
mod tests {
    use super::SpatialBlurStage;
    use crate::stages::StageError;
    use ndarray::{Array2, array};

    #[test]
    fn strides_follow_beam_and_dosage() {
        let stage = SpatialBlurStage::new(20, 5).expect("5 divides 20");
        assert_eq!(stage.row_stride(), 20);
        assert_eq!(stage.column_stride(), 4);
        assert!(matches!(
            SpatialBlurStage::new(20, 3),
            Err(StageError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn sampled_grid_has_expected_shape_and_range() {
        let image = Array2::from_shape_fn((40, 60), |(r, c)| ((r + c) % 7) as f64 / 6.0);
        let crater = Array2::from_elem((3, 3), 1.0);
        let stage = SpatialBlurStage::new(20, 10).unwrap();
        let sampled = stage.apply(&image.view(), &crater.view()).expect("blur should run");
        // Blurred image is 42x62; rows 19, 39 and columns 1, 3, ..., 61.
        assert_eq!(sampled.dim(), (2, 31));
        assert!(sampled.iter().all(|value| (0.0..=1.0).contains(value)));
    }

    #[test]
    fn identity_kernel_samples_the_input_directly() {
        let image = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c + 1) as f64 / 16.0);
        let stage = SpatialBlurStage::new(2, 1).unwrap();
        let sampled = stage
            .apply(&image.view(), &array![[1.0]].view())
            .expect("blur should run");
        assert_eq!(
            sampled,
            array![[6.0 / 16.0, 8.0 / 16.0], [14.0 / 16.0, 1.0]]
        );
    }

    #[test]
    fn all_zero_image_is_degenerate() {
        let image = Array2::<f64>::zeros((30, 30));
        let crater = array![[1.0]];
        let stage = SpatialBlurStage::new(20, 10).unwrap();
        assert!(matches!(
            stage.apply(&image.view(), &crater.view()),
            Err(StageError::NumericDegeneracy { .. })
        ));
    }

    #[test]
    fn image_smaller_than_one_step_is_rejected() {
        let image = Array2::<f64>::ones((5, 5));
        let stage = SpatialBlurStage::new(20, 10).unwrap();
        assert!(matches!(
            stage.apply(&image.view(), &array![[1.0]].view()),
            Err(StageError::ShapeMismatch { .. })
        ));
    }
}
