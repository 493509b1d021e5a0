//! Temporal smearing by the nuclide's washout response.
//!
//! The recorded decay curve is scaled to a per-dwell response, resampled
//! from the dwell grid onto the laser pulse grid (`numerator : N` with
//! `N = round(time_base / RR)`), rescaled so the integrated response is
//! kept, and convolved along the scan axis of the sampled image.

use super::StageError;
use crate::common::ResampleConfig;
use crate::numerics::{convolve_rows_full, resample_poly};
use ndarray::{Array2, ArrayView2};
use tracing::{debug, warn};

const STAGE: &str = "temporal-washout";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalWashoutStage {
    repetition_rate: u32,
    dwell_time_ms: f64,
    resample: ResampleConfig,
}

impl TemporalWashoutStage {
    pub fn new(
        repetition_rate: u32,
        dwell_time_ms: f64,
        resample: ResampleConfig,
    ) -> Result<Self, StageError> {
        if repetition_rate == 0 {
            return Err(StageError::parameter(STAGE, "repetition rate must be > 0"));
        }
        if !(dwell_time_ms.is_finite() && dwell_time_ms > 0.0) {
            return Err(StageError::parameter(
                STAGE,
                format!("dwell time must be finite and > 0, got {dwell_time_ms}"),
            ));
        }
        Ok(Self {
            repetition_rate,
            dwell_time_ms,
            resample,
        })
    }

    /// Denominator of the resampling ratio, `round(time_base / RR)` with ties to even.
    pub fn resample_denominator(&self) -> u64 {
        (self.resample.time_base / f64::from(self.repetition_rate)).round_ties_even() as u64
    }

    /// Washout profile turned into a kernel on the pulse grid.
    ///
    /// Non-finite profile samples carry no signal and are zeroed before
    /// resampling.
    pub fn response_kernel(&self, washout_profile: &[f64]) -> Result<Vec<f64>, StageError> {
        let denominator = self.resample_denominator();
        let non_finite = washout_profile.iter().filter(|value| !value.is_finite()).count();
        if non_finite > 0 {
            warn!(non_finite, "washout profile has non-finite samples, zeroing them");
        }
        let per_dwell: Vec<f64> = washout_profile
            .iter()
            .map(|value| {
                if value.is_finite() {
                    value * self.dwell_time_ms / 1000.0
                } else {
                    0.0
                }
            })
            .collect();
        let resampled = resample_poly(
            &per_dwell,
            self.resample.numerator,
            denominator,
            self.resample.kaiser_beta,
        )
        .map_err(|error| StageError::parameter(STAGE, format!("resampling failed: {error}")))?;

        let rescale = (1000.0 / f64::from(self.repetition_rate)) * (1.0 / self.dwell_time_ms);
        let kernel: Vec<f64> = resampled.into_iter().map(|value| value * rescale).collect();
        debug!(
            profile_len = washout_profile.len(),
            kernel_len = kernel.len(),
            up = self.resample.numerator,
            down = denominator,
            "washout kernel resampled"
        );
        Ok(kernel)
    }

    pub fn apply(
        &self,
        sampled: &ArrayView2<'_, f64>,
        washout_profile: &[f64],
    ) -> Result<Array2<f64>, StageError> {
        if sampled.is_empty() {
            return Err(StageError::shape(STAGE, "sampled image is empty"));
        }
        let kernel = self.response_kernel(washout_profile)?;
        let smeared = convolve_rows_full(sampled, &kernel);
        debug!(
            sampled = ?sampled.dim(),
            smeared = ?smeared.dim(),
            "temporal washout applied"
        );
        Ok(smeared)
    }
}

#[cfg(test)]
mod tests {
    use super::TemporalWashoutStage;
    use crate::common::ResampleConfig;
    use crate::stages::StageError;
    use ndarray::{Array2, array};

    fn stage(repetition_rate: u32) -> TemporalWashoutStage {
        TemporalWashoutStage::new(repetition_rate, 3.0, ResampleConfig::default())
            .expect("stage should build")
    }

    #[test]
    fn denominator_rounds_ties_to_even() {
        assert_eq!(stage(1000).resample_denominator(), 100);
        assert_eq!(stage(300).resample_denominator(), 333);
        // 100000 / 800 = 125 exactly; 100000 / 640 = 156.25.
        assert_eq!(stage(800).resample_denominator(), 125);
        assert_eq!(stage(640).resample_denominator(), 156);
        // Exact halves round to even.
        let tie = TemporalWashoutStage::new(
            4,
            3.0,
            ResampleConfig {
                time_base: 10.0,
                ..ResampleConfig::default()
            },
        )
        .unwrap();
        assert_eq!(tie.resample_denominator(), 2);
    }

    #[test]
    fn kernel_length_follows_the_resampling_ratio() {
        let profile = vec![1.0; 50];
        // 300:100 reduces to 3:1, so 50 samples become 150.
        assert_eq!(stage(1000).response_kernel(&profile).unwrap().len(), 150);
        // 300:1000 reduces to 3:10, ceil(50 * 3 / 10) = 15.
        assert_eq!(stage(100).response_kernel(&profile).unwrap().len(), 15);
    }

    #[test]
    fn constant_profile_keeps_its_level_after_rescaling() {
        // At RR = 1000 the kernel level is profile * (dwell / 1000) * (1000 / RR) / dwell.
        let profile = vec![2.0; 200];
        let kernel = stage(1000).response_kernel(&profile).unwrap();
        for value in &kernel[100..500] {
            assert!((value - 2.0e-3).abs() < 2.0e-5, "{value}");
        }
    }

    #[test]
    fn non_finite_profile_samples_are_zeroed() {
        let washout = stage(1000);
        let clean = washout.response_kernel(&[1.0, 0.0, 0.25, 0.0]).unwrap();
        let dirty = washout.response_kernel(&[1.0, f64::NAN, 0.25, f64::INFINITY]).unwrap();
        assert!(dirty.iter().all(|value| value.is_finite()));
        assert_eq!(dirty.len(), clean.len());
        for (a, b) in dirty.iter().zip(&clean) {
            assert!((a - b).abs() < 1e-12, "{a} vs {b}");
        }
    }

    #[test]
    fn smearing_extends_rows_by_the_kernel_tail() {
        let sampled = array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let profile = vec![1.0, 0.5, 0.25, 0.125];
        let washout = stage(1000);
        let kernel = washout.response_kernel(&profile).unwrap();
        let smeared = washout.apply(&sampled.view(), &profile).unwrap();
        assert_eq!(smeared.dim(), (2, 3 + kernel.len() - 1));
        assert_eq!(smeared[[0, 0]], kernel[0]);
        assert_eq!(smeared[[1, 2]], kernel[0]);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(matches!(
            TemporalWashoutStage::new(0, 3.0, ResampleConfig::default()),
            Err(StageError::InvalidParameter { .. })
        ));
        assert!(matches!(
            stage(1000).apply(&Array2::<f64>::zeros((0, 0)).view(), &[1.0]),
            Err(StageError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            stage(1000).response_kernel(&[]),
            Err(StageError::InvalidParameter { .. })
        ));
    }
}
