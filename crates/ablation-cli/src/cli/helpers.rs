use super::CliError;
use ablation_core::common::{EngineConfig, load_engine_config};
use ablation_core::domain::{AblationError, Authority, ParameterOperation};
use ablation_core::tables::{LookupTables, load_matrix_csv};
use ndarray::Array2;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(super) enum AuthorityArg {
    /// Repetition rate drives scanning speed
    Rr,
    /// Scanning speed drives repetition rate
    Ss,
}

impl From<AuthorityArg> for Authority {
    fn from(value: AuthorityArg) -> Self {
        match value {
            AuthorityArg::Rr => Authority::RepetitionRate,
            AuthorityArg::Ss => Authority::ScanningSpeed,
        }
    }
}

pub(super) fn load_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    match path {
        Some(path) => Ok(load_engine_config(path).map_err(AblationError::from)?),
        None => Ok(EngineConfig::default()),
    }
}

pub(super) fn load_tables(path: &Path) -> Result<LookupTables, CliError> {
    Ok(LookupTables::load_json(path).map_err(AblationError::from)?)
}

pub(super) fn load_matrix(path: &Path) -> Result<Array2<f64>, CliError> {
    Ok(load_matrix_csv(path).map_err(AblationError::from)?)
}

/// Name (case-insensitive) or zero-based index.
pub(super) fn resolve_nuclide(tables: &LookupTables, selector: &str) -> Result<usize, CliError> {
    tables.resolve_nuclide(selector).ok_or_else(|| {
        CliError::Compute(AblationError::input_validation(
            "INPUT.UNKNOWN_NUCLIDE",
            format!(
                "nuclide '{selector}' is not in the lookup tables ({} known)",
                tables.nuclide_names.len()
            ),
        ))
    })
}

/// Parses `dosage=5`, `rr=500`, `ss=3000` or `authority=rr|ss`.
pub(super) fn parse_operation(raw: &str) -> Result<ParameterOperation, CliError> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(CliError::Usage(format!(
            "operation '{raw}' must have the form key=value"
        )));
    };
    let value = value.trim();
    match key.trim().to_ascii_lowercase().as_str() {
        "dosage" | "d" => parse_rate(raw, value).map(ParameterOperation::SetDosage),
        "rr" | "repetition-rate" => {
            parse_rate(raw, value).map(ParameterOperation::SetRepetitionRate)
        }
        "ss" | "scanning-speed" => {
            parse_rate(raw, value).map(ParameterOperation::SetScanningSpeed)
        }
        "authority" => match value.to_ascii_lowercase().as_str() {
            "rr" => Ok(ParameterOperation::SetAuthority(Authority::RepetitionRate)),
            "ss" => Ok(ParameterOperation::SetAuthority(Authority::ScanningSpeed)),
            other => Err(CliError::Usage(format!(
                "authority must be 'rr' or 'ss', got '{other}'"
            ))),
        },
        other => Err(CliError::Usage(format!(
            "unknown operation '{other}' in '{raw}' (expected dosage, rr, ss or authority)"
        ))),
    }
}

fn parse_rate(raw: &str, value: &str) -> Result<u32, CliError> {
    value
        .parse::<u32>()
        .map_err(|_| CliError::Usage(format!("operation '{raw}' needs a whole number")))
}
