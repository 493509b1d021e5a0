mod commands;
mod helpers;

use ablation_core::domain::AblationError;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let ablation_error = error.as_ablation_error();
            eprintln!("{}", ablation_error.diagnostic_line());
            if let Some(summary_line) = ablation_error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            ablation_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("ablation-sim".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            init_tracing(cli.verbose);
            dispatch_parsed(cli.config.as_deref(), cli.command)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

/// Logs go to stderr so stdout stays machine readable. `RUST_LOG` wins over
/// `--verbose`. Colour only when stderr is a terminal.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "ablation-sim",
    version,
    about = "Laser-ablation imaging simulation engine"
)]
struct Cli {
    /// Engine configuration JSON (defaults apply to omitted fields)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Simulate an acquisition and score it against the reference image
    Simulate(commands::SimulateArgs),
    /// Apply parameter operations and print the settled rates
    Reconcile(commands::ReconcileArgs),
    /// Print a generated super-Gaussian crater profile as CSV
    Crater(commands::CraterArgs),
    /// Print one washout profile with its time axis
    Profile(commands::ProfileArgs),
    /// List nuclides and fluence levels of a lookup-table bundle
    Nuclides(commands::NuclidesArgs),
}

fn dispatch_parsed(
    config_path: Option<&std::path::Path>,
    command: CliCommand,
) -> Result<i32, CliError> {
    let config = helpers::load_config(config_path)?;
    match command {
        CliCommand::Simulate(args) => commands::run_simulate_command(&config, args),
        CliCommand::Reconcile(args) => commands::run_reconcile_command(&config, args),
        CliCommand::Crater(args) => commands::run_crater_command(&config, args),
        CliCommand::Profile(args) => commands::run_profile_command(&config, args),
        CliCommand::Nuclides(args) => commands::run_nuclides_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(AblationError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_ablation_error(&self) -> AblationError {
        match self {
            Self::Usage(message) => {
                AblationError::input_validation("INPUT.CLI_USAGE", message.clone())
            }
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => AblationError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}

impl From<AblationError> for CliError {
    fn from(error: AblationError) -> Self {
        Self::Compute(error)
    }
}
