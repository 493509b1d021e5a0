pub mod runner;

pub use runner::{RunPoll, SimulationRunner};

use crate::common::EngineConfig;
use crate::domain::{AblationError, AblationResult, InstrumentParameters, SimulationResult};
use crate::numerics::{block_mean, normalize_by_max, value_range};
use crate::reconcile::ParameterReconciler;
use crate::stages::{
    AlignmentOptimizer, CraterProfile, NoiseModel, Quantifier, SpatialBlurStage, StageError,
    TemporalWashoutStage,
};
use crate::tables::LookupTables;
use ndarray::Array2;
use rand::Rng;
use tracing::{debug, info, warn};

/// Immutable data shared by every run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationInputs {
    pub image: Array2<f64>,
    pub crater: CraterProfile,
    pub tables: LookupTables,
}

impl SimulationInputs {
    pub fn new(image: Array2<f64>, crater: CraterProfile, tables: LookupTables) -> Self {
        Self {
            image,
            crater,
            tables,
        }
    }
}

/// Estimated acquisition time of a full map in whole seconds.
pub fn mapping_time_seconds(dosage: u32, repetition_rate: u32, config: &EngineConfig) -> u64 {
    let pulses = config.mapping.line_count * config.mapping.line_length_um * f64::from(dosage);
    let rate = f64::from(config.beam_size_um) * f64::from(repetition_rate);
    (pulses / rate).round_ties_even() as u64
}

/// Runs the whole pipeline: blur, washout, quantification with noise and
/// alignment. Any stage fault aborts the run with a single error.
pub fn simulate<R: Rng + ?Sized>(
    inputs: &SimulationInputs,
    params: &InstrumentParameters,
    config: &EngineConfig,
    rng: &mut R,
) -> AblationResult<SimulationResult> {
    config.validate()?;

    let tables = &inputs.tables;
    let nuclide_label = tables
        .nuclide_name(params.nuclide_index)
        .ok_or_else(|| {
            AblationError::input_validation(
                "INPUT.INDEX_OUT_OF_RANGE",
                format!(
                    "nuclide index {} is out of range (len {})",
                    params.nuclide_index,
                    tables.nuclide_names.len()
                ),
            )
        })?
        .to_string();
    let washout_profile = tables
        .washout
        .profile(params.nuclide_index, params.fluence_index)
        .ok_or_else(|| {
            AblationError::input_validation(
                "INPUT.INDEX_OUT_OF_RANGE",
                format!(
                    "fluence index {} is out of range (len {})",
                    params.fluence_index,
                    tables.washout.fluence_count()
                ),
            )
        })?
        .to_vec();

    let settled = ParameterReconciler::from_config(config).settle(params.rates);
    if settled.state.repetition_rate != params.rates.repetition_rate
        || settled.state.scanning_speed != params.rates.scanning_speed
        || settled.state.dosage != params.rates.dosage
    {
        warn!(
            requested_rr = params.rates.repetition_rate,
            requested_ss = params.rates.scanning_speed,
            requested_dosage = params.rates.dosage,
            settled_rr = settled.state.repetition_rate,
            settled_ss = settled.state.scanning_speed,
            settled_dosage = settled.state.dosage,
            "parameters were not reconciled before the run"
        );
    }
    let rates = settled.state;
    info!(
        nuclide = %nuclide_label,
        fluence_index = params.fluence_index,
        repetition_rate = rates.repetition_rate,
        scanning_speed = rates.scanning_speed,
        dosage = rates.dosage,
        authority = %rates.authority,
        "simulation started"
    );

    let normalized = normalize_input(&inputs.image)?;
    let crater = inputs.crater.resolve(config.beam_size_um)?;

    let blur = SpatialBlurStage::new(config.beam_size_um, rates.dosage)?;
    let sampled = blur.apply(&normalized.view(), &crater.view())?;

    let washout =
        TemporalWashoutStage::new(rates.repetition_rate, config.dwell_time_ms, config.resample)?;
    let smeared = washout.apply(&sampled.view(), &washout_profile)?;

    let quantifier = Quantifier::new(
        rates.dosage,
        params.sample_concentration_ppm,
        config.washout_concentration_ppm,
    )?;
    let expected = quantifier.expected_counts(&smeared.view())?;
    let noisy = NoiseModel::new(params.flicker_noise_percent)?.apply(&expected.view(), rng)?;

    let reference = reference_image(&normalized, config.beam_size_um as usize)?;

    let optimizer = AlignmentOptimizer::new(config.alignment, config.ssim)?;
    let alignment = optimizer.align(&noisy.view(), &reference.view())?;
    debug!(candidates = ?alignment.candidates, "alignment scores");

    let mapping_time = mapping_time_seconds(rates.dosage, rates.repetition_rate, config);
    info!(
        ssim = alignment.score,
        shift = alignment.shift,
        mapping_time_seconds = mapping_time,
        "simulation finished"
    );

    Ok(SimulationResult {
        reference_image: reference,
        simulated_image: alignment.window,
        ssim_score: alignment.score,
        best_shift: alignment.shift,
        nuclide_label,
        mapping_time_seconds: mapping_time,
        repetition_rate: rates.repetition_rate,
        scanning_speed: rates.scanning_speed,
        dosage: rates.dosage,
    })
}

/// Input image divided by its maximum; images without contrast are rejected.
fn normalize_input(image: &Array2<f64>) -> AblationResult<Array2<f64>> {
    if image.is_empty() {
        return Err(StageError::shape("input", "input image is empty").into());
    }
    let Some((low, high)) = value_range(&image.view()) else {
        return Err(StageError::degeneracy("input", "input image has no finite values").into());
    };
    if low == high {
        return Err(StageError::degeneracy(
            "input",
            format!("input image is constant ({low}) and has no contrast"),
        )
        .into());
    }
    normalize_by_max(&image.view()).map_err(|error| {
        StageError::degeneracy("input", format!("cannot normalize input image: {error}")).into()
    })
}

/// Input block-averaged over one beam footprint per pixel, unit maximum.
fn reference_image(normalized: &Array2<f64>, beam: usize) -> AblationResult<Array2<f64>> {
    let reduced = block_mean(&normalized.view(), (beam, beam));
    normalize_by_max(&reduced.view()).map_err(|error| {
        StageError::degeneracy("reference", format!("cannot normalize reference image: {error}"))
            .into()
    })
}
