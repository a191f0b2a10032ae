use serde::{Deserialize, Serialize};

use super::error::ParameterError;

/// Fixed inputs of one property investment. Monetary fields are in currency
/// units, rates are decimals (0.06 = 6%).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseParameters {
    pub purchase_price: f64,
    pub initial_monthly_rent: f64,
    pub annual_interest_rate: f64,
    pub loan_amount: f64,
    pub loan_term_months: u32,
    pub projection_years: u32,
    pub annual_taxes: f64,
    pub annual_insurance: f64,
    pub annual_maintenance: f64,
    pub annual_management: f64,
    #[serde(rename = "annualCapEx")]
    pub annual_cap_ex: f64,
    pub initial_investment: f64,
}

impl BaseParameters {
    pub fn validate(&self) -> Result<(), ParameterError> {
        for (field, value) in [
            ("purchasePrice", self.purchase_price),
            ("initialMonthlyRent", self.initial_monthly_rent),
            ("annualInterestRate", self.annual_interest_rate),
            ("loanAmount", self.loan_amount),
            ("annualTaxes", self.annual_taxes),
            ("annualInsurance", self.annual_insurance),
            ("annualMaintenance", self.annual_maintenance),
            ("annualManagement", self.annual_management),
            ("annualCapEx", self.annual_cap_ex),
            ("initialInvestment", self.initial_investment),
        ] {
            if !value.is_finite() {
                return Err(ParameterError::NonFinite { field, value });
            }
        }

        if self.projection_years == 0 {
            return Err(ParameterError::NonPositiveProjectionYears);
        }
        if self.loan_amount < 0.0 {
            return Err(ParameterError::NegativeLoanAmount(self.loan_amount));
        }
        if self.loan_amount > 0.0 && self.loan_term_months == 0 {
            return Err(ParameterError::MissingLoanTerm(self.loan_amount));
        }
        Ok(())
    }

    pub fn annual_operating_expenses(&self) -> f64 {
        self.annual_taxes
            + self.annual_insurance
            + self.annual_maintenance
            + self.annual_management
            + self.annual_cap_ex
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthRates {
    pub rent_growth_rate: f64,
    pub expense_growth_rate: f64,
    pub property_appreciation_rate: f64,
}

/// Closed set of sampling distributions. Wire decoding (and rejection of
/// unknown tags) lives in the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DistributionSpec {
    Uniform {
        min: f64,
        max: f64,
    },
    Normal {
        mean: f64,
        #[serde(rename = "stdDev")]
        std_dev: f64,
    },
    Triangular {
        min: f64,
        mode: f64,
        max: f64,
    },
    Lognormal {
        #[serde(rename = "meanLog")]
        mean_log: f64,
        #[serde(rename = "stdDevLog")]
        std_dev_log: f64,
    },
}

impl DistributionSpec {
    #[cfg(test)]
    pub(crate) fn fixed(value: f64) -> Self {
        DistributionSpec::Uniform {
            min: value,
            max: value,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            DistributionSpec::Uniform { .. } => "uniform",
            DistributionSpec::Normal { .. } => "normal",
            DistributionSpec::Triangular { .. } => "triangular",
            DistributionSpec::Lognormal { .. } => "lognormal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertaintyInputs {
    pub rent_growth: DistributionSpec,
    pub initial_rent: DistributionSpec,
    pub expense_growth: DistributionSpec,
    pub appreciation: DistributionSpec,
    pub vacancy_rate: DistributionSpec,
    pub maintenance_multiplier: DistributionSpec,
    pub purchase_price: DistributionSpec,
}

impl UncertaintyInputs {
    /// Inputs in draw order. The orchestrator samples them in exactly this
    /// sequence from one RNG stream.
    pub fn named(&self) -> [(&'static str, &DistributionSpec); 7] {
        [
            ("rentGrowth", &self.rent_growth),
            ("initialRent", &self.initial_rent),
            ("expenseGrowth", &self.expense_growth),
            ("appreciation", &self.appreciation),
            ("vacancyRate", &self.vacancy_rate),
            ("maintenanceMultiplier", &self.maintenance_multiplier),
            ("purchasePrice", &self.purchase_price),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationTrialResult {
    pub total_return: f64,
    pub total_cash_flow: f64,
    pub total_appreciation: f64,
    pub total_principal_paydown: f64,
    pub final_equity: f64,
    pub final_property_value: f64,
    pub annualized_return: f64,
    pub cash_on_cash_return: f64,
}

/// One row of the yearly projection schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearProjection {
    pub year: u32,
    pub monthly_rent: f64,
    pub annual_rent: f64,
    pub expenses: f64,
    pub net_operating_income: f64,
    pub annual_debt_service: f64,
    pub annual_interest: f64,
    pub annual_principal: f64,
    pub cash_flow: f64,
    pub loan_balance: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRun {
    pub requested: u32,
    pub results: Vec<SimulationTrialResult>,
    pub failed_trials: u32,
    pub status: RunStatus,
}

impl SimulationRun {
    pub fn attempted(&self) -> u32 {
        self.results.len() as u32 + self.failed_trials
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub completed: u32,
    pub total: u32,
    pub percentage: f64,
}

impl ProgressEvent {
    pub fn new(completed: u32, total: u32) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            (completed as f64 * 100.0 / total as f64).min(100.0)
        };
        Self {
            completed,
            total,
            percentage,
        }
    }
}
