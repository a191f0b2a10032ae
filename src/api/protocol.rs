//! Message contract between a host process and the simulation engine.
//!
//! A host sends one `RUN_SIMULATION` request and receives zero or more
//! `PROGRESS` messages followed by exactly one terminal message
//! (`COMPLETE`, `FAILED` or `CANCELLED`). Messages are JSON objects
//! discriminated by a `"type"` field.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::core::{
    BaseParameters, CancellationToken, ConfigurationError, DistributionSpec, ProgressEvent,
    RunConfig, RunStatus, SimulationError, SimulationOrchestrator, SimulationRun,
    SimulationTrialResult, UncertaintyInputs, splitmix64,
};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    RunSimulation(RunSimulation),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSimulation {
    pub base_params: BaseParameters,
    pub uncertainty_inputs: WireUncertaintyInputs,
    pub simulation_count: u32,
    #[serde(default)]
    pub random_seed: Option<u64>,
}

/// Distribution as it arrives on the wire: an open `type` tag plus whichever
/// parameters the sender supplied. Converted to [`DistributionSpec`] before
/// a run starts, so an unknown tag fails the request instead of every trial.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDistribution {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_log: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev_log: Option<f64>,
}

impl WireDistribution {
    pub fn to_spec(&self, input: &str) -> Result<DistributionSpec, ConfigurationError> {
        let param = |name: &str, value: Option<f64>| {
            value.ok_or_else(|| ConfigurationError::InvalidDistribution {
                input: input.to_string(),
                reason: format!("{} distribution requires '{name}'", self.kind),
            })
        };

        match self.kind.to_ascii_lowercase().as_str() {
            "uniform" => Ok(DistributionSpec::Uniform {
                min: param("min", self.min)?,
                max: param("max", self.max)?,
            }),
            "normal" => Ok(DistributionSpec::Normal {
                mean: param("mean", self.mean)?,
                std_dev: param("stdDev", self.std_dev)?,
            }),
            "triangular" => Ok(DistributionSpec::Triangular {
                min: param("min", self.min)?,
                mode: param("mode", self.mode)?,
                max: param("max", self.max)?,
            }),
            "lognormal" => Ok(DistributionSpec::Lognormal {
                mean_log: param("meanLog", self.mean_log)?,
                std_dev_log: param("stdDevLog", self.std_dev_log)?,
            }),
            _ => Err(ConfigurationError::UnknownDistribution {
                input: input.to_string(),
                tag: self.kind.clone(),
            }),
        }
    }
}

impl From<DistributionSpec> for WireDistribution {
    fn from(spec: DistributionSpec) -> Self {
        let kind = spec.tag().to_string();
        match spec {
            DistributionSpec::Uniform { min, max } => WireDistribution {
                kind,
                min: Some(min),
                max: Some(max),
                ..WireDistribution::default()
            },
            DistributionSpec::Normal { mean, std_dev } => WireDistribution {
                kind,
                mean: Some(mean),
                std_dev: Some(std_dev),
                ..WireDistribution::default()
            },
            DistributionSpec::Triangular { min, mode, max } => WireDistribution {
                kind,
                min: Some(min),
                mode: Some(mode),
                max: Some(max),
                ..WireDistribution::default()
            },
            DistributionSpec::Lognormal {
                mean_log,
                std_dev_log,
            } => WireDistribution {
                kind,
                mean_log: Some(mean_log),
                std_dev_log: Some(std_dev_log),
                ..WireDistribution::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUncertaintyInputs {
    pub rent_growth: WireDistribution,
    pub initial_rent: WireDistribution,
    pub expense_growth: WireDistribution,
    pub appreciation: WireDistribution,
    pub vacancy_rate: WireDistribution,
    pub maintenance_multiplier: WireDistribution,
    pub purchase_price: WireDistribution,
}

impl WireUncertaintyInputs {
    pub fn to_domain(&self) -> Result<UncertaintyInputs, ConfigurationError> {
        Ok(UncertaintyInputs {
            rent_growth: self.rent_growth.to_spec("rentGrowth")?,
            initial_rent: self.initial_rent.to_spec("initialRent")?,
            expense_growth: self.expense_growth.to_spec("expenseGrowth")?,
            appreciation: self.appreciation.to_spec("appreciation")?,
            vacancy_rate: self.vacancy_rate.to_spec("vacancyRate")?,
            maintenance_multiplier: self
                .maintenance_multiplier
                .to_spec("maintenanceMultiplier")?,
            purchase_price: self.purchase_price.to_spec("purchasePrice")?,
        })
    }
}

impl From<&UncertaintyInputs> for WireUncertaintyInputs {
    fn from(inputs: &UncertaintyInputs) -> Self {
        Self {
            rent_growth: inputs.rent_growth.into(),
            initial_rent: inputs.initial_rent.into(),
            expense_growth: inputs.expense_growth.into(),
            appreciation: inputs.appreciation.into(),
            vacancy_rate: inputs.vacancy_rate.into(),
            maintenance_multiplier: inputs.maintenance_multiplier.into(),
            purchase_price: inputs.purchase_price.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    Progress(ProgressEvent),
    #[serde(rename_all = "camelCase")]
    Complete {
        data: Vec<SimulationTrialResult>,
        requested: u32,
        failed_trials: u32,
    },
    Failed {
        reason: String,
    },
    Cancelled {
        completed: u32,
        total: u32,
    },
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Progress(_) => "progress",
            Response::Complete { .. } => "complete",
            Response::Failed { .. } => "failed",
            Response::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Progress(_))
    }

    fn from_run(run: SimulationRun) -> Self {
        match run.status {
            RunStatus::Completed => Response::Complete {
                requested: run.requested,
                failed_trials: run.failed_trials,
                data: run.results,
            },
            RunStatus::Cancelled => Response::Cancelled {
                completed: run.results.len() as u32,
                total: run.requested,
            },
        }
    }
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Response::Failed {
            reason: err.to_string(),
        }
    }
}

pub fn decode_request(json: &str) -> Result<Request, ProtocolError> {
    Ok(serde_json::from_str(json)?)
}

/// Seed for a request without `randomSeed`: wall-clock nanoseconds mixed
/// through splitmix64.
pub fn resolve_seed(requested: Option<u64>) -> u64 {
    requested.unwrap_or_else(|| {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        splitmix64(nanos)
    })
}

/// Runs one request to completion, emitting every response message in
/// order. Always emits exactly one terminal message.
pub fn handle_run<F>(
    request: &RunSimulation,
    config: RunConfig,
    cancel: &CancellationToken,
    mut emit: F,
) where
    F: FnMut(Response),
{
    let terminal = match execute(request, config, cancel, &mut emit) {
        Ok(run) => Response::from_run(run),
        Err(err) => {
            error!(error = %err, "simulation request rejected");
            err.into()
        }
    };
    emit(terminal);
}

fn execute<F>(
    request: &RunSimulation,
    config: RunConfig,
    cancel: &CancellationToken,
    emit: &mut F,
) -> Result<SimulationRun, ProtocolError>
where
    F: FnMut(Response),
{
    let uncertainty = request.uncertainty_inputs.to_domain()?;
    let seed = resolve_seed(request.random_seed);
    if request.random_seed.is_none() {
        info!(seed, "no randomSeed supplied, derived one from the clock");
    }

    let mut orchestrator = SimulationOrchestrator::new(config);
    let mut sink = |event: ProgressEvent| emit(Response::Progress(event));
    let run = orchestrator.run(
        &request.base_params,
        &uncertainty,
        request.simulation_count,
        seed,
        &mut sink,
        cancel,
    )?;
    Ok(run)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn handle_message<F>(json: &str, config: RunConfig, cancel: &CancellationToken, mut emit: F)
    where
        F: FnMut(Response),
    {
        match decode_request(json) {
            Ok(Request::RunSimulation(request)) => handle_run(&request, config, cancel, emit),
            Err(err) => emit(err.into()),
        }
    }

    pub(crate) fn sample_request_json(count: u32, seed: u64) -> Value {
        json!({
            "type": "RUN_SIMULATION",
            "baseParams": {
                "purchasePrice": 300000,
                "initialMonthlyRent": 2000,
                "annualInterestRate": 0.06,
                "loanAmount": 240000,
                "loanTermMonths": 360,
                "projectionYears": 10,
                "annualTaxes": 3000,
                "annualInsurance": 1200,
                "annualMaintenance": 1500,
                "annualManagement": 0,
                "annualCapEx": 0,
                "initialInvestment": 60000
            },
            "uncertaintyInputs": {
                "rentGrowth": { "type": "normal", "mean": 0.03, "stdDev": 0.01 },
                "initialRent": { "type": "triangular", "min": 1800, "mode": 2000, "max": 2300 },
                "expenseGrowth": { "type": "uniform", "min": 0.01, "max": 0.03 },
                "appreciation": { "type": "normal", "mean": 0.03, "stdDev": 0.02 },
                "vacancyRate": { "type": "uniform", "min": 0.02, "max": 0.08 },
                "maintenanceMultiplier": { "type": "lognormal", "meanLog": 0.0, "stdDevLog": 0.2 },
                "purchasePrice": { "type": "uniform", "min": 290000, "max": 310000 }
            },
            "simulationCount": count,
            "randomSeed": seed
        })
    }

    fn collect(request: &Value) -> Vec<Response> {
        let mut responses = Vec::new();
        handle_message(
            &request.to_string(),
            RunConfig::default(),
            &CancellationToken::new(),
            |response| responses.push(response),
        );
        responses
    }

    #[test]
    fn decode_request_parses_wire_keys() {
        let request = decode_request(&sample_request_json(25, 7).to_string()).expect("valid json");
        let Request::RunSimulation(run) = request;
        assert_eq!(run.simulation_count, 25);
        assert_eq!(run.random_seed, Some(7));
        assert_eq!(run.base_params.loan_term_months, 360);
        assert_eq!(run.base_params.annual_cap_ex, 0.0);

        let uncertainty = run.uncertainty_inputs.to_domain().expect("known tags");
        assert_eq!(
            uncertainty.maintenance_multiplier,
            DistributionSpec::Lognormal {
                mean_log: 0.0,
                std_dev_log: 0.2
            }
        );
    }

    #[test]
    fn random_seed_is_optional() {
        let mut request = sample_request_json(5, 0);
        request
            .as_object_mut()
            .expect("object")
            .remove("randomSeed");
        let Request::RunSimulation(run) =
            decode_request(&request.to_string()).expect("valid json");
        assert_eq!(run.random_seed, None);

        let responses = collect(&request);
        assert!(matches!(
            responses.last(),
            Some(Response::Complete { data, .. }) if data.len() == 5
        ));
    }

    #[test]
    fn run_of_2500_emits_two_progress_messages_then_complete() {
        let responses = collect(&sample_request_json(2_500, 42));

        assert_eq!(responses.len(), 3);
        assert_eq!(
            responses[0],
            Response::Progress(ProgressEvent::new(1_000, 2_500))
        );
        assert_eq!(
            responses[1],
            Response::Progress(ProgressEvent::new(2_000, 2_500))
        );
        match &responses[2] {
            Response::Complete {
                data,
                requested,
                failed_trials,
            } => {
                assert_eq!(data.len(), 2_500);
                assert_eq!(*requested, 2_500);
                assert_eq!(*failed_trials, 0);
            }
            other => panic!("expected COMPLETE, got {other:?}"),
        }
    }

    #[test]
    fn identical_requests_produce_identical_streams() {
        let request = sample_request_json(300, 99);
        let a = serde_json::to_string(&collect(&request)).expect("serializable");
        let b = serde_json::to_string(&collect(&request)).expect("serializable");
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_distribution_fails_fast_and_names_the_tag() {
        let mut request = sample_request_json(2_500, 1);
        request["uncertaintyInputs"]["appreciation"] = json!({ "type": "pareto", "alpha": 2 });

        let responses = collect(&request);
        assert_eq!(responses.len(), 1);
        match &responses[0] {
            Response::Failed { reason } => {
                assert!(reason.contains("pareto"), "reason was {reason}");
                assert!(reason.contains("appreciation"), "reason was {reason}");
            }
            other => panic!("expected FAILED, got {other:?}"),
        }
    }

    #[test]
    fn missing_distribution_parameter_fails_fast() {
        let mut request = sample_request_json(10, 1);
        request["uncertaintyInputs"]["rentGrowth"] = json!({ "type": "normal", "mean": 0.03 });

        let responses = collect(&request);
        assert!(matches!(
            responses.as_slice(),
            [Response::Failed { reason }] if reason.contains("stdDev")
        ));
    }

    #[test]
    fn distribution_tags_are_case_insensitive() {
        let spec = WireDistribution {
            kind: "Uniform".to_string(),
            min: Some(1.0),
            max: Some(2.0),
            ..WireDistribution::default()
        }
        .to_spec("purchasePrice")
        .expect("known tag");
        assert_eq!(spec, DistributionSpec::Uniform { min: 1.0, max: 2.0 });
    }

    #[test]
    fn degenerate_base_parameters_fail_fast() {
        let mut request = sample_request_json(10, 1);
        request["baseParams"]["projectionYears"] = json!(0);

        let responses = collect(&request);
        assert!(matches!(
            responses.as_slice(),
            [Response::Failed { reason }] if reason.contains("projectionYears")
        ));
    }

    #[test]
    fn zero_simulation_count_fails_fast() {
        let responses = collect(&sample_request_json(0, 1));
        assert!(matches!(
            responses.as_slice(),
            [Response::Failed { reason }] if reason.contains("simulationCount")
        ));
    }

    #[test]
    fn malformed_and_unknown_messages_fail() {
        let mut responses = Vec::new();
        let cancel = CancellationToken::new();
        handle_message("{not json", RunConfig::default(), &cancel, |r| {
            responses.push(r)
        });
        handle_message(
            r#"{"type":"STOP_SIMULATION"}"#,
            RunConfig::default(),
            &cancel,
            |r| responses.push(r),
        );
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.kind() == "failed"));
    }

    #[test]
    fn cancelled_run_reports_cancelled_instead_of_complete() {
        let Request::RunSimulation(request) =
            decode_request(&sample_request_json(100, 1).to_string()).expect("valid json");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut responses = Vec::new();
        handle_run(&request, RunConfig::default(), &cancel, |r| {
            responses.push(r)
        });
        assert_eq!(
            responses,
            vec![Response::Cancelled {
                completed: 0,
                total: 100
            }]
        );
    }

    #[test]
    fn huge_simulation_count_cancels_without_reserving_every_slot() {
        let Request::RunSimulation(request) =
            decode_request(&sample_request_json(4_000_000_000, 1).to_string())
                .expect("valid json");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut responses = Vec::new();
        handle_run(&request, RunConfig::default(), &cancel, |r| {
            responses.push(r)
        });
        assert_eq!(
            responses,
            vec![Response::Cancelled {
                completed: 0,
                total: 4_000_000_000
            }]
        );
    }

    #[test]
    fn responses_serialize_with_type_discriminator() {
        let progress = serde_json::to_value(Response::Progress(ProgressEvent::new(1_000, 4_000)))
            .expect("serializable");
        assert_eq!(
            progress,
            json!({ "type": "PROGRESS", "completed": 1000, "total": 4000, "percentage": 25.0 })
        );

        let complete = serde_json::to_value(Response::Complete {
            data: Vec::new(),
            requested: 3,
            failed_trials: 3,
        })
        .expect("serializable");
        assert_eq!(
            complete,
            json!({ "type": "COMPLETE", "data": [], "requested": 3, "failedTrials": 3 })
        );

        let failed = serde_json::to_value(Response::Failed {
            reason: "bad".to_string(),
        })
        .expect("serializable");
        assert_eq!(failed, json!({ "type": "FAILED", "reason": "bad" }));
    }

    #[test]
    fn trial_results_use_camel_case_keys() {
        let responses = collect(&sample_request_json(1, 3));
        let json = serde_json::to_string(&responses).expect("serializable");
        for key in [
            "\"totalReturn\"",
            "\"totalCashFlow\"",
            "\"totalAppreciation\"",
            "\"totalPrincipalPaydown\"",
            "\"finalEquity\"",
            "\"finalPropertyValue\"",
            "\"annualizedReturn\"",
            "\"cashOnCashReturn\"",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
    }

    #[test]
    fn wire_distribution_round_trips_domain_specs() {
        let inputs = crate::api::default_uncertainty();
        let wire = WireUncertaintyInputs::from(&inputs);
        assert_eq!(wire.to_domain().expect("known tags"), inputs);
    }

    #[test]
    fn resolve_seed_prefers_the_requested_seed() {
        assert_eq!(resolve_seed(Some(17)), 17);
    }
}
