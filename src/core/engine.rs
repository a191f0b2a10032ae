use tracing::{debug, info, warn};

use super::cancel::CancellationToken;
use super::cashflow::project;
use super::distribution::{sample, validate_uncertainty};
use super::error::{ParameterError, SimulationError, TrialError};
use super::rng::RandomSource;
use super::types::{
    BaseParameters, GrowthRates, ProgressEvent, RunStatus, SimulationRun, SimulationTrialResult,
    UncertaintyInputs,
};

pub const DEFAULT_BATCH_SIZE: u32 = 100;
pub const DEFAULT_PROGRESS_INTERVAL: u32 = 1_000;

/// Receives progress while a run executes. Any `FnMut(ProgressEvent)`
/// closure is a sink.
pub trait ProgressSink {
    fn on_progress(&mut self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent),
{
    fn on_progress(&mut self, event: ProgressEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// Trials per chunk; cancellation is still checked per trial.
    pub batch_size: u32,
    /// Successful trials between progress events.
    pub progress_interval: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.batch_size == 0 {
            return Err(ParameterError::InvalidRunConfig("batchSize must be > 0"));
        }
        if self.progress_interval == 0 {
            return Err(ParameterError::InvalidRunConfig(
                "progressInterval must be > 0",
            ));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Values drawn for one trial, in draw order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledInputs {
    pub rent_growth: f64,
    pub initial_rent: f64,
    pub expense_growth: f64,
    pub appreciation: f64,
    pub vacancy_rate: f64,
    pub maintenance_multiplier: f64,
    pub purchase_price: f64,
}

/// Draws every uncertain input for one trial. The order is fixed: the whole
/// run shares one RNG stream, so reordering changes every later trial.
pub fn sample_inputs(uncertainty: &UncertaintyInputs, rng: &mut RandomSource) -> SampledInputs {
    let rent_growth = sample(&uncertainty.rent_growth, rng);
    let initial_rent = sample(&uncertainty.initial_rent, rng);
    let expense_growth = sample(&uncertainty.expense_growth, rng);
    let appreciation = sample(&uncertainty.appreciation, rng);
    let vacancy_rate = sample(&uncertainty.vacancy_rate, rng).clamp(0.0, 1.0);
    let maintenance_multiplier = sample(&uncertainty.maintenance_multiplier, rng);
    let purchase_price = sample(&uncertainty.purchase_price, rng);

    SampledInputs {
        rent_growth,
        initial_rent,
        expense_growth,
        appreciation,
        vacancy_rate,
        maintenance_multiplier,
        purchase_price,
    }
}

pub fn run_trial(
    base: &BaseParameters,
    sampled: &SampledInputs,
) -> Result<SimulationTrialResult, TrialError> {
    let derived = BaseParameters {
        purchase_price: sampled.purchase_price,
        initial_monthly_rent: sampled.initial_rent,
        annual_maintenance: base.annual_maintenance * sampled.maintenance_multiplier,
        ..*base
    };
    let growth = GrowthRates {
        rent_growth_rate: sampled.rent_growth,
        expense_growth_rate: sampled.expense_growth,
        property_appreciation_rate: sampled.appreciation,
    };
    project(&derived, growth, sampled.vacancy_rate)
}

/// Drives the trials of a run. Owns the run's single [`RandomSource`] and is
/// reusable: every `run` reseeds it.
#[derive(Debug)]
pub struct SimulationOrchestrator {
    config: RunConfig,
    rng: RandomSource,
    state: RunState,
}

impl Default for SimulationOrchestrator {
    fn default() -> Self {
        Self::new(RunConfig::default())
    }
}

impl SimulationOrchestrator {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            rng: RandomSource::new(0),
            state: RunState::Idle,
        }
    }

    pub fn config(&self) -> RunConfig {
        self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Checks everything that would make the run fail as a whole.
    pub fn validate(
        &self,
        base: &BaseParameters,
        uncertainty: &UncertaintyInputs,
        count: u32,
    ) -> Result<(), SimulationError> {
        self.config.validate()?;
        if count == 0 {
            return Err(ParameterError::ZeroSimulationCount.into());
        }
        base.validate()?;
        validate_uncertainty(uncertainty)?;
        Ok(())
    }

    pub fn run<S: ProgressSink + ?Sized>(
        &mut self,
        base: &BaseParameters,
        uncertainty: &UncertaintyInputs,
        count: u32,
        seed: u64,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<SimulationRun, SimulationError> {
        self.validate(base, uncertainty, count)?;

        self.state = RunState::Running;
        self.rng.seed(seed);
        info!(count, seed, batch_size = self.config.batch_size, "simulation run started");

        // Grows past the first chunk on demand; `count` is caller-controlled.
        let reserve = count.min(self.config.batch_size.max(DEFAULT_PROGRESS_INTERVAL));
        let mut results = Vec::with_capacity(reserve as usize);
        let mut failed_trials = 0_u32;
        let mut status = RunStatus::Completed;

        let mut batch_start = 0_u32;
        'batches: while batch_start < count {
            let batch_end = batch_start.saturating_add(self.config.batch_size).min(count);
            for trial in batch_start..batch_end {
                if cancel.is_cancelled() {
                    status = RunStatus::Cancelled;
                    break 'batches;
                }

                let sampled = sample_inputs(uncertainty, &mut self.rng);
                match run_trial(base, &sampled) {
                    Ok(result) => {
                        results.push(result);
                        let completed = results.len() as u32;
                        if completed % self.config.progress_interval == 0 {
                            sink.on_progress(ProgressEvent::new(completed, count));
                        }
                    }
                    Err(err) => {
                        failed_trials += 1;
                        warn!(trial, error = %err, "trial dropped");
                    }
                }
            }
            debug!(
                batch_start,
                batch_end,
                completed = results.len(),
                failed_trials,
                "batch finished"
            );
            batch_start = batch_end;
        }

        self.state = match status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::Cancelled => RunState::Cancelled,
        };
        info!(
            requested = count,
            completed = results.len(),
            failed_trials,
            status = ?status,
            "simulation run finished"
        );

        Ok(SimulationRun {
            requested: count,
            results,
            failed_trials,
            status,
        })
    }
}
