use super::CliError;
use super::helpers::*;
use ablation_core::common::EngineConfig;
use ablation_core::domain::{AblationError, InstrumentParameters, ReconcilerState};
use ablation_core::engine::{SimulationInputs, SimulationRunner};
use ablation_core::reconcile::{ParameterReconciler, reconcile_with_report};
use ablation_core::serialization::{format_fixed_f64, matrix_to_csv, write_simulation_artifacts};
use ablation_core::stages::{CraterProfile, super_gaussian_profile};
use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(clap::Args)]
#[command(group(
    clap::ArgGroup::new("crater_source")
        .required(true)
        .args(["crater", "super_gaussian_order"])
))]
pub(super) struct SimulateArgs {
    /// Lookup-table bundle (JSON)
    #[arg(long)]
    tables: PathBuf,

    /// Reference input image (CSV matrix)
    #[arg(long)]
    image: PathBuf,

    /// Measured crater kernel (CSV matrix)
    #[arg(long)]
    crater: Option<PathBuf>,

    /// Generate the crater as a super-Gaussian of this order instead
    #[arg(long)]
    super_gaussian_order: Option<f64>,

    /// Nuclide name or zero-based index
    #[arg(long, default_value = "0")]
    nuclide: String,

    /// Zero-based fluence index
    #[arg(long, default_value_t = 0)]
    fluence: usize,

    /// Sample concentration in ppm
    #[arg(long, default_value_t = 500.0)]
    concentration: f64,

    /// Flicker noise in percent
    #[arg(long, default_value_t = 5.0)]
    flicker: f64,

    #[command(flatten)]
    rates: RateArgs,

    /// Seed for the noise generator (OS entropy when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Abandon the run after this many seconds
    #[arg(long)]
    timeout_seconds: Option<u64>,

    /// Write reference.csv, simulated.csv and summary.json here
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Print the summary as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
pub(super) struct RateArgs {
    /// Repetition rate in Hz
    #[arg(long, default_value_t = 1000)]
    rr: u32,

    /// Scanning speed in µm/s
    #[arg(long, default_value_t = 2000)]
    ss: u32,

    /// Shots per output pixel
    #[arg(long, default_value_t = 10)]
    dosage: u32,

    /// Which rate is set directly
    #[arg(long, value_enum, default_value_t = AuthorityArg::Rr)]
    authority: AuthorityArg,
}

impl RateArgs {
    fn initial_state(&self) -> ReconcilerState {
        ReconcilerState::new(self.rr, self.ss, self.dosage, self.authority.into())
    }
}

#[derive(clap::Args)]
pub(super) struct ReconcileArgs {
    #[command(flatten)]
    rates: RateArgs,

    /// Operation applied in order: dosage=N, rr=N, ss=N or authority=rr|ss
    #[arg(long = "op", value_name = "KEY=VALUE")]
    operations: Vec<String>,
}

#[derive(clap::Args)]
pub(super) struct CraterArgs {
    /// Super-Gaussian order
    #[arg(long)]
    order: f64,

    /// Beam size in µm (engine configuration when omitted)
    #[arg(long)]
    beam: Option<u32>,
}

#[derive(clap::Args)]
pub(super) struct ProfileArgs {
    /// Lookup-table bundle (JSON)
    #[arg(long)]
    tables: PathBuf,

    /// Nuclide name or zero-based index
    #[arg(long, default_value = "0")]
    nuclide: String,

    /// Zero-based fluence index
    #[arg(long, default_value_t = 0)]
    fluence: usize,
}

#[derive(clap::Args)]
pub(super) struct NuclidesArgs {
    /// Lookup-table bundle (JSON)
    #[arg(long)]
    tables: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileReport {
    #[serde(flatten)]
    state: ReconcilerState,
    iterations: usize,
    converged: bool,
}

pub(super) fn run_simulate_command(
    config: &EngineConfig,
    args: SimulateArgs,
) -> Result<i32, CliError> {
    let tables = load_tables(&args.tables)?;
    let nuclide_index = resolve_nuclide(&tables, &args.nuclide)?;
    let image = load_matrix(&args.image)?;
    let crater = match (&args.crater, args.super_gaussian_order) {
        (Some(path), _) => CraterProfile::Default(load_matrix(path)?),
        (None, Some(order)) => CraterProfile::SuperGaussian { order },
        (None, None) => {
            return Err(CliError::Usage(
                "either --crater or --super-gaussian-order is required".to_string(),
            ));
        }
    };
    info!(crater = %crater.label(), "inputs loaded");

    let settled = ParameterReconciler::from_config(config).settle(args.rates.initial_state());
    if !settled.converged {
        warn!(iterations = settled.iterations, "rates did not settle, using last values");
    }
    let params = InstrumentParameters {
        nuclide_index,
        fluence_index: args.fluence,
        sample_concentration_ppm: args.concentration,
        flicker_noise_percent: args.flicker,
        rates: settled.state,
    };

    let inputs = Arc::new(SimulationInputs::new(image, crater, tables));
    let mut runner = SimulationRunner::new(inputs, config.clone());
    runner.submit(params, args.seed)?;
    let result = match args.timeout_seconds {
        Some(seconds) => match runner.wait_timeout(Duration::from_secs(seconds)) {
            Some(outcome) => outcome?,
            None => {
                runner.abandon();
                return Err(CliError::Compute(AblationError::computation(
                    "RUN.TIMEOUT",
                    format!("simulation did not finish within {seconds} s"),
                )));
            }
        },
        None => runner.wait()?,
    };

    if let Some(directory) = &args.output_dir {
        write_simulation_artifacts(directory, &result).with_context(|| {
            format!("failed to write simulation artifacts to '{}'", directory.display())
        })?;
    }

    let summary = result.summary();
    if args.json {
        let rendered =
            serde_json::to_string_pretty(&summary).context("failed to render summary")?;
        println!("{rendered}");
    } else {
        println!("Simulation complete");
        println!("  nuclide: {}", summary.nuclide);
        println!("  SSIM: {}", format_fixed_f64(summary.ssim_score, 0, 4));
        println!("  best shift: {}", summary.best_shift);
        println!("  mapping time: {} s", summary.mapping_time_seconds);
        println!(
            "  rates: RR {} Hz, SS {} um/s, dosage {}",
            summary.repetition_rate, summary.scanning_speed, summary.dosage
        );
        if let Some(directory) = &args.output_dir {
            println!("  artifacts: {}", directory.display());
        }
    }
    Ok(0)
}

pub(super) fn run_reconcile_command(
    config: &EngineConfig,
    args: ReconcileArgs,
) -> Result<i32, CliError> {
    let operations = args
        .operations
        .iter()
        .map(|raw| parse_operation(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let reconciler = ParameterReconciler::from_config(config);
    let mut outcome = reconciler.settle(args.rates.initial_state());
    let mut iterations = outcome.iterations;
    let mut converged = outcome.converged;
    for operation in operations {
        outcome = reconcile_with_report(outcome.state, operation, config);
        iterations += outcome.iterations;
        converged &= outcome.converged;
    }

    let report = ReconcileReport {
        state: outcome.state,
        iterations,
        converged,
    };
    let rendered = serde_json::to_string_pretty(&report).context("failed to render rates")?;
    println!("{rendered}");
    Ok(0)
}

pub(super) fn run_crater_command(config: &EngineConfig, args: CraterArgs) -> Result<i32, CliError> {
    let beam = args.beam.unwrap_or(config.beam_size_um);
    let profile = super_gaussian_profile(args.order, beam).map_err(AblationError::from)?;
    print!("{}", matrix_to_csv(&profile.view()));
    Ok(0)
}

pub(super) fn run_profile_command(
    config: &EngineConfig,
    args: ProfileArgs,
) -> Result<i32, CliError> {
    let tables = load_tables(&args.tables)?;
    let nuclide_index = resolve_nuclide(&tables, &args.nuclide)?;
    let profile = tables
        .washout
        .profile(nuclide_index, args.fluence)
        .ok_or_else(|| {
            CliError::Compute(AblationError::input_validation(
                "INPUT.INDEX_OUT_OF_RANGE",
                format!(
                    "fluence index {} is out of range (len {})",
                    args.fluence,
                    tables.fluence_labels.len()
                ),
            ))
        })?;
    let times = tables.washout.time_axis_ms(config.profile_sample_spacing_ms);

    println!(
        "# nuclide={} fluence={}",
        tables.nuclide_names[nuclide_index], tables.fluence_labels[args.fluence]
    );
    println!("time_ms,signal");
    for (time, value) in times.iter().zip(profile.iter()) {
        println!("{time},{value}");
    }
    Ok(0)
}

pub(super) fn run_nuclides_command(args: NuclidesArgs) -> Result<i32, CliError> {
    let tables = load_tables(&args.tables)?;
    println!("Nuclides:");
    for (index, name) in tables.nuclide_names.iter().enumerate() {
        println!("  {index:>3}  {name}");
    }
    println!("Fluence levels:");
    for (index, label) in tables.fluence_labels.iter().enumerate() {
        match tables.fluence_values.as_ref().and_then(|values| values.get(index)) {
            Some(value) => println!("  {index:>3}  {label} ({value} J/cm2)"),
            None => println!("  {index:>3}  {label}"),
        }
    }
    println!("Washout samples: {}", tables.washout.sample_count());
    Ok(0)
}
