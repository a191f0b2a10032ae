//! Error taxonomy for the simulation engine.
//!
//! Configuration and parameter errors are detected once, before the first
//! trial, and fail the whole run. [`TrialError`] is confined to a single
//! trial: the orchestrator counts it and moves on.

use thiserror::Error;

/// Invalid uncertainty configuration. Deterministic, so it would recur on
/// every trial.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("unknown distribution type '{tag}' for input '{input}'")]
    UnknownDistribution { input: String, tag: String },

    #[error("invalid distribution for input '{input}': {reason}")]
    InvalidDistribution { input: String, reason: String },
}

/// Base parameters or run settings that would make every trial degenerate.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParameterError {
    #[error("projectionYears must be > 0")]
    NonPositiveProjectionYears,

    #[error("loanAmount must be >= 0, got {0}")]
    NegativeLoanAmount(f64),

    #[error("loanTermMonths must be > 0 when loanAmount is {0}")]
    MissingLoanTerm(f64),

    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("simulationCount must be > 0")]
    ZeroSimulationCount,

    #[error("invalid run configuration: {0}")]
    InvalidRunConfig(&'static str),
}

/// Failure confined to one trial.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrialError {
    #[error("trial produced a non-finite {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },
}

/// Errors that abort a run before any trial executes.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("invalid parameters: {0}")]
    InvalidParameters(#[from] ParameterError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_distribution_message_names_the_tag() {
        let err = ConfigurationError::UnknownDistribution {
            input: "rentGrowth".to_string(),
            tag: "cauchy".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cauchy"));
        assert!(msg.contains("rentGrowth"));
    }

    #[test]
    fn parameter_errors_convert_into_simulation_errors() {
        let err: SimulationError = ParameterError::NonPositiveProjectionYears.into();
        assert_eq!(
            err.to_string(),
            "invalid parameters: projectionYears must be > 0"
        );
    }
}
