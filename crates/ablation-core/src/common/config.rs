//! Engine constants and operating bounds.
//!
//! Every field has the instrument's default so an empty JSON object is a
//! valid configuration; files only need to name the values they override.

use crate::domain::AblationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ALLOWED_DOSAGES: [u32; 5] = [1, 2, 5, 10, 20];
/// Upper limit on settle passes per reconciliation.
pub const MAX_RECONCILE_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBounds {
    pub min: u32,
    pub max: u32,
}

impl RateBounds {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Ablation spot diameter in µm.
    pub beam_size_um: u32,
    /// Dwell time of one washout sample in ms.
    pub dwell_time_ms: f64,
    /// Concentration the washout profiles were recorded at, in ppm.
    pub washout_concentration_ppm: f64,
    pub profile_sample_spacing_ms: f64,
    pub allowed_dosages: Vec<u32>,
    pub repetition_rate_bounds: RateBounds,
    pub scanning_speed_bounds: RateBounds,
    pub max_reconcile_iterations: usize,
    pub resample: ResampleConfig,
    pub alignment: AlignmentConfig,
    pub ssim: SsimConfig,
    pub mapping: MappingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            beam_size_um: 20,
            dwell_time_ms: 3.0,
            washout_concentration_ppm: 100.0,
            profile_sample_spacing_ms: 3.0,
            allowed_dosages: DEFAULT_ALLOWED_DOSAGES.to_vec(),
            repetition_rate_bounds: RateBounds::new(10, 1000),
            scanning_speed_bounds: RateBounds::new(10, 10_000),
            max_reconcile_iterations: MAX_RECONCILE_ITERATIONS,
            resample: ResampleConfig::default(),
            alignment: AlignmentConfig::default(),
            ssim: SsimConfig::default(),
            mapping: MappingConfig::default(),
        }
    }
}

/// Rational resampling of the washout profile: `numerator : round(time_base / RR)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResampleConfig {
    pub numerator: u64,
    pub time_base: f64,
    pub kaiser_beta: f64,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            numerator: 300,
            time_base: 100_000.0,
            kaiser_beta: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlignmentConfig {
    pub padding_columns: usize,
    pub window_rows: usize,
    pub window_cols: usize,
    /// First candidate shift (inclusive).
    pub shift_start: usize,
    /// Last candidate shift (exclusive).
    pub shift_end: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            padding_columns: 200,
            window_rows: 150,
            window_cols: 150,
            shift_start: 0,
            shift_end: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SsimConfig {
    pub window_size: usize,
    pub k1: f64,
    pub k2: f64,
    pub data_range: f64,
}

impl Default for SsimConfig {
    fn default() -> Self {
        Self {
            window_size: 7,
            k1: 0.01,
            k2: 0.03,
            data_range: 1.0,
        }
    }
}

/// Raster geometry used for the acquisition time estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MappingConfig {
    pub line_count: f64,
    pub line_length_um: f64,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            line_count: 150.0,
            line_length_um: 3000.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineConfigError {
    #[error("failed to read engine config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse engine config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid engine config: {0}")]
    Invalid(String),
}

impl From<EngineConfigError> for AblationError {
    fn from(error: EngineConfigError) -> Self {
        let message = error.to_string();
        match error {
            EngineConfigError::Read { .. } => AblationError::io_system("IO.CONFIG_READ", message),
            EngineConfigError::Parse { .. } => {
                AblationError::input_validation("INPUT.CONFIG_PARSE", message)
            }
            EngineConfigError::Invalid(_) => {
                AblationError::input_validation("INPUT.CONFIG_INVALID", message)
            }
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineConfigError> {
        if self.beam_size_um == 0 {
            return Err(invalid("beamSizeUm must be > 0"));
        }
        if !(self.dwell_time_ms.is_finite() && self.dwell_time_ms > 0.0) {
            return Err(invalid(format!(
                "dwellTimeMs must be finite and > 0, got {}",
                self.dwell_time_ms
            )));
        }
        if !(self.washout_concentration_ppm.is_finite() && self.washout_concentration_ppm > 0.0) {
            return Err(invalid(format!(
                "washoutConcentrationPpm must be finite and > 0, got {}",
                self.washout_concentration_ppm
            )));
        }
        if self.allowed_dosages.is_empty() {
            return Err(invalid("allowedDosages must not be empty"));
        }
        if !self.allowed_dosages.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(invalid("allowedDosages must be strictly increasing"));
        }
        if let Some(dosage) = self
            .allowed_dosages
            .iter()
            .find(|dosage| **dosage == 0 || self.beam_size_um % **dosage != 0)
        {
            return Err(invalid(format!(
                "dosage {} does not divide beam size {} µm",
                dosage, self.beam_size_um
            )));
        }
        for (name, bounds) in [
            ("repetitionRateBounds", self.repetition_rate_bounds),
            ("scanningSpeedBounds", self.scanning_speed_bounds),
        ] {
            if bounds.min == 0 || bounds.min > bounds.max {
                return Err(invalid(format!(
                    "{name} must satisfy 0 < min <= max, got [{}, {}]",
                    bounds.min, bounds.max
                )));
            }
        }
        if !(1..=MAX_RECONCILE_ITERATIONS).contains(&self.max_reconcile_iterations) {
            return Err(invalid(format!(
                "maxReconcileIterations must be in 1..={MAX_RECONCILE_ITERATIONS}, got {}",
                self.max_reconcile_iterations
            )));
        }
        if self.resample.numerator == 0 || !(self.resample.time_base > 0.0) {
            return Err(invalid("resample numerator and timeBase must be > 0"));
        }
        if self.alignment.window_rows == 0 || self.alignment.window_cols == 0 {
            return Err(invalid("alignment window must be non-empty"));
        }
        if self.alignment.shift_start >= self.alignment.shift_end {
            return Err(invalid(format!(
                "alignment shift range {}..{} is empty",
                self.alignment.shift_start, self.alignment.shift_end
            )));
        }
        if self.ssim.window_size < 3 || self.ssim.window_size % 2 == 0 {
            return Err(invalid(format!(
                "ssim windowSize must be odd and >= 3, got {}",
                self.ssim.window_size
            )));
        }
        if !(self.ssim.data_range > 0.0) {
            return Err(invalid("ssim dataRange must be > 0"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> EngineConfigError {
    EngineConfigError::Invalid(message.into())
}

pub fn load_engine_config(path: impl AsRef<Path>) -> Result<EngineConfig, EngineConfigError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| EngineConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: EngineConfig =
        serde_json::from_str(&source).map_err(|source| EngineConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::{EngineConfig, EngineConfigError, RateBounds, load_engine_config};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_valid_and_matches_instrument() {
        let config = EngineConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.beam_size_um, 20);
        assert_eq!(config.allowed_dosages, vec![1, 2, 5, 10, 20]);
        assert_eq!(config.repetition_rate_bounds, RateBounds::new(10, 1000));
        assert_eq!(config.scanning_speed_bounds, RateBounds::new(10, 10_000));
        assert_eq!(config.alignment.shift_start, 0);
        assert_eq!(config.alignment.shift_end, 20);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("engine.json");
        fs::write(
            &path,
            r#"{ "alignment": { "shiftStart": 1, "shiftEnd": 21 }, "dwellTimeMs": 2.5 }"#,
        )
        .expect("config should be written");

        let config = load_engine_config(&path).expect("config should load");
        assert_eq!(config.alignment.shift_start, 1);
        assert_eq!(config.alignment.shift_end, 21);
        assert_eq!(config.alignment.window_rows, 150);
        assert_eq!(config.dwell_time_ms, 2.5);
        assert_eq!(config.beam_size_um, 20);
    }

    #[test]
    fn loader_reports_read_parse_and_validation_failures() {
        let temp = TempDir::new().expect("tempdir should be created");
        let missing = temp.path().join("missing.json");
        assert!(matches!(
            load_engine_config(&missing),
            Err(EngineConfigError::Read { .. })
        ));

        let broken = temp.path().join("broken.json");
        fs::write(&broken, "{ not json").expect("file should be written");
        assert!(matches!(
            load_engine_config(&broken),
            Err(EngineConfigError::Parse { .. })
        ));

        let invalid = temp.path().join("invalid.json");
        fs::write(&invalid, r#"{ "allowedDosages": [1, 3] }"#).expect("file should be written");
        let error = load_engine_config(&invalid).expect_err("dosage 3 does not divide 20");
        assert!(error.to_string().contains("dosage 3"));
    }

    #[test]
    fn validation_rejects_empty_shift_range_and_even_ssim_window() {
        let mut config = EngineConfig::default();
        config.alignment.shift_end = config.alignment.shift_start;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.ssim.window_size = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reconcile_iteration_budget_is_capped_at_ten() {
        let mut config = EngineConfig::default();
        config.max_reconcile_iterations = 10;
        config.validate().expect("ten passes are allowed");

        config.max_reconcile_iterations = 11;
        let error = config.validate().expect_err("eleven passes exceed the cap");
        assert!(error.to_string().contains("maxReconcileIterations"));

        config.max_reconcile_iterations = 0;
        assert!(matches!(
            config.validate(),
            Err(EngineConfigError::Invalid(_))
        ));
    }
}
