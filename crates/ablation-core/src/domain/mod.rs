pub mod errors;

pub use errors::{AblationError, AblationErrorCategory, AblationResult};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Which of the coupled rate variables the operator drives directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Authority {
    #[default]
    RepetitionRate,
    ScanningSpeed,
}

impl Authority {
    pub const fn from_use_repetition_rate(use_rr: bool) -> Self {
        if use_rr {
            Self::RepetitionRate
        } else {
            Self::ScanningSpeed
        }
    }

    pub const fn uses_repetition_rate(self) -> bool {
        matches!(self, Self::RepetitionRate)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RepetitionRate => "repetition-rate",
            Self::ScanningSpeed => "scanning-speed",
        }
    }
}

impl Display for Authority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// The repetition rate / scanning speed / dosage triple plus the memory the
/// reconciler needs for its rounding hysteresis.
///
/// Rates are whole numbers: Hz for the repetition rate, µm/s for the
/// scanning speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilerState {
    pub repetition_rate: u32,
    pub scanning_speed: u32,
    pub dosage: u32,
    pub authority: Authority,
    pub previous_scanning_speed: u32,
}

impl ReconcilerState {
    pub const fn new(
        repetition_rate: u32,
        scanning_speed: u32,
        dosage: u32,
        authority: Authority,
    ) -> Self {
        Self {
            repetition_rate,
            scanning_speed,
            dosage,
            authority,
            previous_scanning_speed: scanning_speed,
        }
    }

    pub const fn uses_repetition_rate(&self) -> bool {
        self.authority.uses_repetition_rate()
    }
}

impl Default for ReconcilerState {
    fn default() -> Self {
        Self::new(1000, 2000, 10, Authority::RepetitionRate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterOperation {
    SetDosage(u32),
    SetRepetitionRate(u32),
    SetScanningSpeed(u32),
    SetAuthority(Authority),
}

impl Display for ParameterOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetDosage(value) => write!(f, "setDosage({value})"),
            Self::SetRepetitionRate(value) => write!(f, "setRepetitionRate({value})"),
            Self::SetScanningSpeed(value) => write!(f, "setScanningSpeed({value})"),
            Self::SetAuthority(authority) => write!(f, "setAuthority({authority})"),
        }
    }
}

/// Everything a single simulation run needs besides the lookup tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstrumentParameters {
    pub nuclide_index: usize,
    pub fluence_index: usize,
    pub sample_concentration_ppm: f64,
    pub flicker_noise_percent: f64,
    pub rates: ReconcilerState,
}

impl Default for InstrumentParameters {
    fn default() -> Self {
        Self {
            nuclide_index: 0,
            fluence_index: 0,
            sample_concentration_ppm: 500.0,
            flicker_noise_percent: 5.0,
            rates: ReconcilerState::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub reference_image: Array2<f64>,
    pub simulated_image: Array2<f64>,
    pub ssim_score: f64,
    pub best_shift: usize,
    pub nuclide_label: String,
    pub mapping_time_seconds: u64,
    pub repetition_rate: u32,
    pub scanning_speed: u32,
    pub dosage: u32,
}

/// Serializable scalar part of a [`SimulationResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub nuclide: String,
    pub ssim_score: f64,
    pub best_shift: usize,
    pub mapping_time_seconds: u64,
    pub repetition_rate: u32,
    pub scanning_speed: u32,
    pub dosage: u32,
    pub reference_shape: [usize; 2],
    pub simulated_shape: [usize; 2],
}

impl SimulationResult {
    pub fn summary(&self) -> SimulationSummary {
        let (reference_rows, reference_cols) = self.reference_image.dim();
        let (simulated_rows, simulated_cols) = self.simulated_image.dim();
        SimulationSummary {
            nuclide: self.nuclide_label.clone(),
            ssim_score: self.ssim_score,
            best_shift: self.best_shift,
            mapping_time_seconds: self.mapping_time_seconds,
            repetition_rate: self.repetition_rate,
            scanning_speed: self.scanning_speed,
            dosage: self.dosage,
            reference_shape: [reference_rows, reference_cols],
            simulated_shape: [simulated_rows, simulated_cols],
        }
    }
}
