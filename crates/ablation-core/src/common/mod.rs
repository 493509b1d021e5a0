pub mod config;

pub use config::{
    AlignmentConfig, DEFAULT_ALLOWED_DOSAGES, EngineConfig, EngineConfigError,
    MAX_RECONCILE_ITERATIONS, MappingConfig, RateBounds, ResampleConfig, SsimConfig,
    load_engine_config,
};
