use super::error::ConfigurationError;
use super::rng::RandomSource;
use super::types::{DistributionSpec, UncertaintyInputs};

pub fn sample(spec: &DistributionSpec, rng: &mut RandomSource) -> f64 {
    match *spec {
        DistributionSpec::Uniform { min, max } => min + rng.next() * (max - min),
        DistributionSpec::Normal { mean, std_dev } => mean + rng.standard_normal() * std_dev,
        DistributionSpec::Triangular { min, mode, max } => {
            let u = rng.next();
            let span = max - min;
            let f = (mode - min) / span;
            if u < f {
                min + (u * span * (mode - min)).sqrt()
            } else {
                max - ((1.0 - u) * span * (max - mode)).sqrt()
            }
        }
        DistributionSpec::Lognormal {
            mean_log,
            std_dev_log,
        } => (mean_log + rng.standard_normal() * std_dev_log).exp(),
    }
}

/// Rejects parameter sets the sampler cannot draw from meaningfully.
pub fn validate_spec(input: &str, spec: &DistributionSpec) -> Result<(), ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidDistribution {
        input: input.to_string(),
        reason,
    };

    let params = match *spec {
        DistributionSpec::Uniform { min, max } => vec![("min", min), ("max", max)],
        DistributionSpec::Normal { mean, std_dev } => vec![("mean", mean), ("stdDev", std_dev)],
        DistributionSpec::Triangular { min, mode, max } => {
            vec![("min", min), ("mode", mode), ("max", max)]
        }
        DistributionSpec::Lognormal {
            mean_log,
            std_dev_log,
        } => vec![("meanLog", mean_log), ("stdDevLog", std_dev_log)],
    };
    for (name, value) in params {
        if !value.is_finite() {
            return Err(invalid(format!("{name} must be finite, got {value}")));
        }
    }

    match *spec {
        DistributionSpec::Uniform { min, max } if min > max => {
            Err(invalid(format!("min ({min}) must be <= max ({max})")))
        }
        DistributionSpec::Normal { std_dev, .. } if std_dev < 0.0 => {
            Err(invalid(format!("stdDev must be >= 0, got {std_dev}")))
        }
        DistributionSpec::Lognormal { std_dev_log, .. } if std_dev_log < 0.0 => {
            Err(invalid(format!("stdDevLog must be >= 0, got {std_dev_log}")))
        }
        DistributionSpec::Triangular { min, max, .. } if min >= max => {
            Err(invalid(format!("min ({min}) must be < max ({max})")))
        }
        DistributionSpec::Triangular { min, mode, max } if mode < min || mode > max => Err(
            invalid(format!("mode ({mode}) must lie within [{min}, {max}]")),
        ),
        _ => Ok(()),
    }
}

pub fn validate_uncertainty(inputs: &UncertaintyInputs) -> Result<(), ConfigurationError> {
    for (name, spec) in inputs.named() {
        validate_spec(name, spec)?;
    }
    Ok(())
}
