//! Read-only lookup data: nuclide and fluence labels, washout profiles and
//! comma separated matrices (input images, the measured crater kernel).

use crate::domain::AblationError;
use ndarray::{Array2, Array3, ArrayView1, s};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse lookup tables '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid lookup tables: {0}")]
    Invalid(String),
    #[error("matrix line {line}: {message}")]
    Matrix { line: usize, message: String },
}

impl From<TableError> for AblationError {
    fn from(error: TableError) -> Self {
        let message = error.to_string();
        match error {
            TableError::Read { .. } => AblationError::io_system("IO.TABLE_READ", message),
            TableError::Parse { .. } => {
                AblationError::input_validation("INPUT.TABLE_PARSE", message)
            }
            TableError::Invalid(_) => {
                AblationError::input_validation("INPUT.TABLE_INVALID", message)
            }
            TableError::Matrix { .. } => {
                AblationError::input_validation("INPUT.MATRIX_PARSE", message)
            }
        }
    }
}

/// Washout decay curves indexed `[time sample, nuclide, fluence]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WashoutTable {
    profiles: Array3<f64>,
}

impl WashoutTable {
    pub fn new(profiles: Array3<f64>) -> Result<Self, TableError> {
        let (samples, nuclides, fluences) = profiles.dim();
        if samples == 0 || nuclides == 0 || fluences == 0 {
            return Err(TableError::Invalid(format!(
                "washout table must be non-empty, got {samples}x{nuclides}x{fluences}"
            )));
        }
        Ok(Self { profiles })
    }

    pub fn sample_count(&self) -> usize {
        self.profiles.dim().0
    }

    pub fn nuclide_count(&self) -> usize {
        self.profiles.dim().1
    }

    pub fn fluence_count(&self) -> usize {
        self.profiles.dim().2
    }

    /// Decay curve for one nuclide at one fluence, or `None` when either
    /// index is out of range.
    pub fn profile(&self, nuclide: usize, fluence: usize) -> Option<ArrayView1<'_, f64>> {
        (nuclide < self.nuclide_count() && fluence < self.fluence_count())
            .then(|| self.profiles.slice(s![.., nuclide, fluence]))
    }

    /// Acquisition time of every profile sample in ms.
    pub fn time_axis_ms(&self, sample_spacing_ms: f64) -> Vec<f64> {
        (0..self.sample_count())
            .map(|index| index as f64 * sample_spacing_ms)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupTablesFile {
    nuclide_names: Vec<String>,
    fluence_labels: Vec<String>,
    #[serde(default)]
    fluence_values: Option<Vec<f64>>,
    washout_profiles: Vec<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupTables {
    pub nuclide_names: Vec<String>,
    pub fluence_labels: Vec<String>,
    /// Fluence in J/cm², aligned with `fluence_labels` when present.
    pub fluence_values: Option<Vec<f64>>,
    pub washout: WashoutTable,
}

impl LookupTables {
    pub fn new(
        nuclide_names: Vec<String>,
        fluence_labels: Vec<String>,
        fluence_values: Option<Vec<f64>>,
        washout: WashoutTable,
    ) -> Result<Self, TableError> {
        if nuclide_names.is_empty() {
            return Err(TableError::Invalid("nuclideNames must not be empty".to_string()));
        }
        if let Some(duplicate) = first_duplicate(&nuclide_names) {
            return Err(TableError::Invalid(format!(
                "nuclide name '{duplicate}' appears more than once"
            )));
        }
        if washout.nuclide_count() != nuclide_names.len() {
            return Err(TableError::Invalid(format!(
                "washout profiles cover {} nuclides but {} names are listed",
                washout.nuclide_count(),
                nuclide_names.len()
            )));
        }
        if washout.fluence_count() != fluence_labels.len() {
            return Err(TableError::Invalid(format!(
                "washout profiles cover {} fluences but {} labels are listed",
                washout.fluence_count(),
                fluence_labels.len()
            )));
        }
        if let Some(values) = &fluence_values {
            if values.len() != fluence_labels.len() {
                return Err(TableError::Invalid(format!(
                    "{} fluence values for {} fluence labels",
                    values.len(),
                    fluence_labels.len()
                )));
            }
        }
        Ok(Self {
            nuclide_names,
            fluence_labels,
            fluence_values,
            washout,
        })
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| TableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: LookupTablesFile =
            serde_json::from_str(&source).map_err(|source| TableError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let washout = WashoutTable::new(nested_to_array3(&file.washout_profiles)?)?;
        Self::new(
            file.nuclide_names,
            file.fluence_labels,
            file.fluence_values,
            washout,
        )
    }

    pub fn nuclide_name(&self, index: usize) -> Option<&str> {
        self.nuclide_names.get(index).map(String::as_str)
    }

    /// Case-insensitive lookup by name.
    pub fn nuclide_index_by_name(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.nuclide_names
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(wanted))
    }

    /// Accepts either a nuclide name or a zero-based index.
    pub fn resolve_nuclide(&self, selector: &str) -> Option<usize> {
        self.nuclide_index_by_name(selector).or_else(|| {
            selector
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|index| *index < self.nuclide_names.len())
        })
    }
}

fn first_duplicate(names: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(String::as_str)
        .find(|name| !seen.insert(*name))
}

fn nested_to_array3(nested: &[Vec<Vec<f64>>]) -> Result<Array3<f64>, TableError> {
    let samples = nested.len();
    let nuclides = nested.first().map_or(0, Vec::len);
    let fluences = nested
        .first()
        .and_then(|plane| plane.first())
        .map_or(0, Vec::len);

    let mut flat = Vec::with_capacity(samples * nuclides * fluences);
    for (time, plane) in nested.iter().enumerate() {
        if plane.len() != nuclides {
            return Err(TableError::Invalid(format!(
                "washout sample {time} lists {} nuclides, expected {nuclides}",
                plane.len()
            )));
        }
        for (nuclide, row) in plane.iter().enumerate() {
            if row.len() != fluences {
                return Err(TableError::Invalid(format!(
                    "washout sample {time}, nuclide {nuclide} lists {} fluences, expected {fluences}",
                    row.len()
                )));
            }
            flat.extend_from_slice(row);
        }
    }
    Array3::from_shape_vec((samples, nuclides, fluences), flat)
        .map_err(|error| TableError::Invalid(format!("washout table shape: {error}")))
}

/// Parses a comma separated numeric matrix. Blank lines and `#` comments are
/// skipped; every remaining line must have the same number of cells.
pub fn parse_matrix_csv(source: &str) -> Result<Array2<f64>, TableError> {
    let mut values = Vec::new();
    let mut columns: Option<usize> = None;
    let mut rows = 0usize;

    for (line_index, line) in source.lines().enumerate() {
        let line_number = line_index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut count = 0usize;
        for cell in trimmed.split(',') {
            let cell = cell.trim();
            let value = cell.parse::<f64>().map_err(|_| TableError::Matrix {
                line: line_number,
                message: format!("cell {} is not a number: '{cell}'", count + 1),
            })?;
            values.push(value);
            count += 1;
        }
        match columns {
            None => columns = Some(count),
            Some(expected) if expected != count => {
                return Err(TableError::Matrix {
                    line: line_number,
                    message: format!("expected {expected} cells, found {count}"),
                });
            }
            Some(_) => {}
        }
        rows += 1;
    }

    let columns = columns.ok_or_else(|| TableError::Matrix {
        line: 0,
        message: "matrix has no data rows".to_string(),
    })?;
    Array2::from_shape_vec((rows, columns), values).map_err(|error| TableError::Matrix {
        line: 0,
        message: format!("matrix shape: {error}"),
    })
}

pub fn load_matrix_csv(path: impl AsRef<Path>) -> Result<Array2<f64>, TableError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| TableError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_matrix_csv(&source)
}
