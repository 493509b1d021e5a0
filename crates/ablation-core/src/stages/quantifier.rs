//! Shot averaging, concentration scaling and counting noise.
//!
//! [`Quantifier`] turns the smeared signal into expected counts per output
//! pixel. [`NoiseModel`] draws Poisson counts around those means and adds
//! multiplicative Gaussian flicker; all randomness comes from the caller's
//! generator.

use super::{StageError, normalize_for_stage};
use crate::numerics::block_mean;
use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, Poisson, StandardNormal};
use tracing::debug;

const QUANTIFIER_STAGE: &str = "quantifier";
const NOISE_STAGE: &str = "noise-model";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantifier {
    dosage: usize,
    concentration_ratio: f64,
}

impl Quantifier {
    pub fn new(
        dosage: u32,
        sample_concentration_ppm: f64,
        washout_concentration_ppm: f64,
    ) -> Result<Self, StageError> {
        if dosage == 0 {
            return Err(StageError::parameter(QUANTIFIER_STAGE, "dosage must be > 0"));
        }
        if !(sample_concentration_ppm.is_finite() && sample_concentration_ppm >= 0.0) {
            return Err(StageError::parameter(
                QUANTIFIER_STAGE,
                format!(
                    "sample concentration must be finite and >= 0, got {sample_concentration_ppm}"
                ),
            ));
        }
        if !(washout_concentration_ppm.is_finite() && washout_concentration_ppm > 0.0) {
            return Err(StageError::parameter(
                QUANTIFIER_STAGE,
                format!(
                    "washout concentration must be finite and > 0, got {washout_concentration_ppm}"
                ),
            ));
        }
        Ok(Self {
            dosage: dosage as usize,
            concentration_ratio: sample_concentration_ppm / washout_concentration_ppm,
        })
    }

    pub fn concentration_ratio(&self) -> f64 {
        self.concentration_ratio
    }

    /// Mean counts per output pixel: every `dosage` shots along the scan axis
    /// are averaged (trailing partial block zero padded) and scaled by
    /// `concentration_ratio * dosage`. Negative and NaN means become zero.
    pub fn expected_counts(
        &self,
        smeared: &ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, StageError> {
        if smeared.is_empty() {
            return Err(StageError::shape(QUANTIFIER_STAGE, "smeared image is empty"));
        }
        let scale = self.concentration_ratio * self.dosage as f64;
        let mut counts = block_mean(smeared, (1, self.dosage));
        counts.mapv_inplace(|value| {
            let scaled = scale * value;
            if scaled.is_nan() || scaled < 0.0 { 0.0 } else { scaled }
        });
        if let Some(((row, col), _)) =
            counts.indexed_iter().find(|(_, value)| value.is_infinite())
        {
            return Err(StageError::degeneracy(
                QUANTIFIER_STAGE,
                format!("expected counts overflow at ({row}, {col})"),
            ));
        }
        debug!(
            smeared = ?smeared.dim(),
            counts = ?counts.dim(),
            scale,
            "shots averaged into counts"
        );
        Ok(counts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseModel {
    flicker_fraction: f64,
}

impl NoiseModel {
    pub fn new(flicker_noise_percent: f64) -> Result<Self, StageError> {
        if !(flicker_noise_percent.is_finite() && flicker_noise_percent >= 0.0) {
            return Err(StageError::parameter(
                NOISE_STAGE,
                format!("flicker noise must be finite and >= 0 %, got {flicker_noise_percent}"),
            ));
        }
        Ok(Self {
            flicker_fraction: flicker_noise_percent / 100.0,
        })
    }

    /// Poisson counts plus flicker, before normalization.
    ///
    /// Every pixel consumes one Poisson and one normal draw, so runs that
    /// differ only in flicker level see the same count realisation.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        expected: &ArrayView2<'_, f64>,
        rng: &mut R,
    ) -> Result<Array2<f64>, StageError> {
        let mut noisy = Array2::zeros(expected.dim());
        for (slot, &mean) in noisy.iter_mut().zip(expected.iter()) {
            let counts: f64 = if mean > 0.0 {
                Poisson::new(mean)
                    .map_err(|error| {
                        StageError::degeneracy(
                            NOISE_STAGE,
                            format!("poisson mean {mean} rejected: {error}"),
                        )
                    })?
                    .sample(rng)
            } else {
                0.0
            };
            let deviate: f64 = StandardNormal.sample(rng);
            *slot = counts + deviate * counts * self.flicker_fraction;
        }
        Ok(noisy)
    }

    /// Noisy image normalized to a unit maximum.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        expected: &ArrayView2<'_, f64>,
        rng: &mut R,
    ) -> Result<Array2<f64>, StageError> {
        let noisy = self.sample(expected, rng)?;
        let normalized = normalize_for_stage(NOISE_STAGE, "noisy image", &noisy.view())?;
        debug!(
            pixels = normalized.len(),
            flicker = self.flicker_fraction,
            "counting noise applied"
        );
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::{NoiseModel, Quantifier};
    use crate::stages::StageError;
    use approx::assert_relative_eq;
    use ndarray::{Array2, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn variance(values: &Array2<f64>) -> f64 {
        let mean = values.mean().unwrap_or(0.0);
        values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64
    }

    #[test]
    fn expected_counts_average_blocks_and_scale_by_concentration() {
        let quantifier = Quantifier::new(2, 500.0, 100.0).expect("quantifier should build");
        assert_eq!(quantifier.concentration_ratio(), 5.0);
        let smeared = array![[1.0, 3.0, 2.0], [-4.0, 1.0, f64::NAN]];
        let counts = quantifier.expected_counts(&smeared.view()).unwrap();
        // Row 0: means 2.0 and 1.0 (zero padded); scale 5 * 2 = 10.
        assert_eq!(counts, array![[20.0, 10.0], [0.0, 0.0]]);
    }

    #[test]
    fn zero_means_draw_zero_counts() {
        let model = NoiseModel::new(5.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let noisy = model
            .sample(&Array2::<f64>::zeros((3, 4)).view(), &mut rng)
            .unwrap();
        assert!(noisy.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn all_zero_counts_cannot_be_normalized() {
        let model = NoiseModel::new(5.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(
            model.apply(&Array2::<f64>::zeros((3, 4)).view(), &mut rng),
            Err(StageError::NumericDegeneracy { .. })
        ));
    }

    #[test]
    fn same_seed_gives_identical_noise() {
        let expected = Array2::from_shape_fn((16, 16), |(r, c)| (r * 16 + c) as f64 * 0.5);
        let model = NoiseModel::new(5.0).unwrap();
        let first = model
            .apply(&expected.view(), &mut StdRng::seed_from_u64(42))
            .unwrap();
        let second = model
            .apply(&expected.view(), &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert_eq!(first, second);
        assert_relative_eq!(first.iter().copied().fold(f64::MIN, f64::max), 1.0);
    }

    #[test]
    fn poisson_counts_track_their_mean() {
        let expected = Array2::from_elem((100, 100), 50.0);
        let model = NoiseModel::new(0.0).unwrap();
        let noisy = model
            .sample(&expected.view(), &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert!(noisy.iter().all(|value| value.fract() == 0.0 && *value >= 0.0));
        assert_relative_eq!(noisy.mean().unwrap(), 50.0, max_relative = 0.02);
        assert_relative_eq!(variance(&noisy), 50.0, max_relative = 0.1);
    }

    #[test]
    fn variance_grows_with_flicker_level() {
        let expected = Array2::from_elem((200, 200), 100.0);
        let variances: Vec<f64> = [0.0, 10.0, 50.0]
            .into_iter()
            .map(|flicker| {
                let model = NoiseModel::new(flicker).unwrap();
                let noisy = model
                    .sample(&expected.view(), &mut StdRng::seed_from_u64(11))
                    .unwrap();
                variance(&noisy)
            })
            .collect();
        assert!(variances[0] <= variances[1], "{variances:?}");
        assert!(variances[1] <= variances[2], "{variances:?}");
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(Quantifier::new(0, 500.0, 100.0).is_err());
        assert!(Quantifier::new(10, -1.0, 100.0).is_err());
        assert!(Quantifier::new(10, 500.0, 0.0).is_err());
        assert!(NoiseModel::new(-5.0).is_err());
        assert!(NoiseModel::new(f64::INFINITY).is_err());
    }
}
