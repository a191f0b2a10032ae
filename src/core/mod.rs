mod cancel;
mod cashflow;
mod distribution;
mod engine;
mod error;
mod rng;
mod types;

pub use cancel::CancellationToken;
pub use cashflow::{YearlySchedule, monthly_payment, project};
pub use distribution::{sample, validate_spec, validate_uncertainty};
pub use engine::{
    DEFAULT_BATCH_SIZE, DEFAULT_PROGRESS_INTERVAL, ProgressSink, RunConfig, RunState,
    SampledInputs, SimulationOrchestrator, run_trial, sample_inputs,
};
pub use error::{ConfigurationError, ParameterError, SimulationError, TrialError};
pub use rng::RandomSource;
pub(crate) use rng::splitmix64;
pub use types::{
    BaseParameters, DistributionSpec, GrowthRates, ProgressEvent, RunStatus, SimulationRun,
    SimulationTrialResult, UncertaintyInputs, YearProjection,
};
