use crate::domain::SimulationResult;
use ndarray::ArrayView2;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const REFERENCE_IMAGE_FILE: &str = "reference.csv";
pub const SIMULATED_IMAGE_FILE: &str = "simulated.csv";
pub const SUMMARY_FILE: &str = "summary.json";

pub fn format_fixed_f64(value: f64, width: usize, precision: usize) -> String {
    format!(
        "{value:>width$.precision$}",
        width = width,
        precision = precision
    )
}

pub fn normalize_text_artifact(content: &str) -> String {
    let mut normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    if !normalized.is_empty() && !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    normalized
}

pub fn write_text_artifact(path: &Path, content: &str) -> std::io::Result<()> {
    fs::write(path, normalize_text_artifact(content))
}

/// One comma separated line per matrix row, values in shortest round-trip form.
pub fn matrix_to_csv(matrix: &ArrayView2<'_, f64>) -> String {
    let mut out = String::new();
    for row in matrix.rows() {
        let line = row
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

pub fn write_matrix_csv(path: &Path, matrix: &ArrayView2<'_, f64>) -> std::io::Result<()> {
    write_text_artifact(path, &matrix_to_csv(matrix))
}

pub fn write_json_artifact<T: Serialize + ?Sized>(path: &Path, value: &T) -> std::io::Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    write_text_artifact(path, &rendered)
}

/// Writes both images and the JSON summary into `directory`, creating it
/// when missing, and returns the written paths in that order.
pub fn write_simulation_artifacts(
    directory: &Path,
    result: &SimulationResult,
) -> std::io::Result<Vec<PathBuf>> {
    fs::create_dir_all(directory)?;
    let reference = directory.join(REFERENCE_IMAGE_FILE);
    let simulated = directory.join(SIMULATED_IMAGE_FILE);
    let summary = directory.join(SUMMARY_FILE);
    write_matrix_csv(&reference, &result.reference_image.view())?;
    write_matrix_csv(&simulated, &result.simulated_image.view())?;
    write_json_artifact(&summary, &result.summary())?;
    Ok(vec![reference, simulated, summary])
}
