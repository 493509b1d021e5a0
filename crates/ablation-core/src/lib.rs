//! Simulation engine for laser-ablation imaging: predicts how an instrument
//! configuration degrades a reference image and scores the result.

pub mod common;
pub mod domain;
pub mod engine;
pub mod numerics;
pub mod reconcile;
pub mod serialization;
pub mod stages;
pub mod tables;

pub use common::{EngineConfig, load_engine_config};
pub use domain::{
    AblationError, AblationErrorCategory, AblationResult, Authority, InstrumentParameters,
    ParameterOperation, ReconcilerState, SimulationResult, SimulationSummary,
};
pub use engine::{
    RunPoll, SimulationInputs, SimulationRunner, mapping_time_seconds, simulate,
};
pub use reconcile::{ParameterReconciler, ReconcileOutcome, reconcile, reconcile_with_report};
pub use tables::{LookupTables, WashoutTable, load_matrix_csv, parse_matrix_csv};
