use super::error::TrialError;
use super::types::{BaseParameters, GrowthRates, SimulationTrialResult, YearProjection};

/// Level monthly payment of a fully amortizing loan.
pub fn monthly_payment(loan_amount: f64, annual_interest_rate: f64, term_months: u32) -> f64 {
    if loan_amount <= 0.0 || term_months == 0 {
        return 0.0;
    }

    let r = annual_interest_rate / 12.0;
    let n = term_months as f64;
    if r == 0.0 {
        return loan_amount / n;
    }

    let factor = (1.0 + r).powf(n);
    loan_amount * r * factor / (factor - 1.0)
}

/// Year-by-year operating schedule for one set of sampled inputs.
///
/// Debt service is held at the level monthly payment for every year and
/// interest is the annual rate applied to the opening balance of the year.
pub struct YearlySchedule<'a> {
    base: &'a BaseParameters,
    growth: GrowthRates,
    vacancy_rate: f64,
    annual_debt_service: f64,
    base_expenses: f64,
    loan_balance: f64,
    year: u32,
}

impl<'a> YearlySchedule<'a> {
    pub fn new(base: &'a BaseParameters, growth: GrowthRates, vacancy_rate: f64) -> Self {
        let payment = monthly_payment(
            base.loan_amount,
            base.annual_interest_rate,
            base.loan_term_months,
        );
        Self {
            base,
            growth,
            vacancy_rate,
            annual_debt_service: payment * 12.0,
            base_expenses: base.annual_operating_expenses(),
            loan_balance: base.loan_amount.max(0.0),
            year: 0,
        }
    }

    pub fn loan_balance(&self) -> f64 {
        self.loan_balance
    }
}

impl Iterator for YearlySchedule<'_> {
    type Item = YearProjection;

    fn next(&mut self) -> Option<YearProjection> {
        if self.year >= self.base.projection_years {
            return None;
        }
        self.year += 1;
        let elapsed = (self.year - 1) as i32;

        let monthly_rent =
            self.base.initial_monthly_rent * (1.0 + self.growth.rent_growth_rate).powi(elapsed);
        let annual_rent = monthly_rent * 12.0 * (1.0 - self.vacancy_rate);
        let expenses = self.base_expenses * (1.0 + self.growth.expense_growth_rate).powi(elapsed);
        let net_operating_income = annual_rent - expenses;

        let annual_interest = self.loan_balance * self.base.annual_interest_rate;
        let annual_principal = self.annual_debt_service - annual_interest;
        let cash_flow = net_operating_income - self.annual_debt_service;
        self.loan_balance = (self.loan_balance - annual_principal).max(0.0);

        Some(YearProjection {
            year: self.year,
            monthly_rent,
            annual_rent,
            expenses,
            net_operating_income,
            annual_debt_service: self.annual_debt_service,
            annual_interest,
            annual_principal,
            cash_flow,
            loan_balance: self.loan_balance,
        })
    }
}

#[cfg(test)]
pub(crate) fn project_schedule(
    base: &BaseParameters,
    growth: GrowthRates,
    vacancy_rate: f64,
) -> Vec<YearProjection> {
    YearlySchedule::new(base, growth, vacancy_rate).collect()
}

pub fn project(
    base: &BaseParameters,
    growth: GrowthRates,
    vacancy_rate: f64,
) -> Result<SimulationTrialResult, TrialError> {
    let mut schedule = YearlySchedule::new(base, growth, vacancy_rate);
    let mut total_cash_flow = 0.0;
    let mut total_principal_paydown = 0.0;
    for row in schedule.by_ref() {
        total_cash_flow += row.cash_flow;
        total_principal_paydown += row.annual_principal;
    }

    let years = base.projection_years as f64;
    let final_property_value =
        base.purchase_price * (1.0 + growth.property_appreciation_rate).powf(years);
    let total_appreciation = final_property_value - base.purchase_price;
    let final_equity = final_property_value - schedule.loan_balance();
    let total_return = total_cash_flow + total_principal_paydown + total_appreciation;

    let (annualized_return, cash_on_cash_return) = if base.initial_investment > 0.0 {
        let growth_multiple = 1.0 + total_return / base.initial_investment;
        (
            (growth_multiple.powf(1.0 / years) - 1.0) * 100.0,
            // Average-annual ratio: cumulative cash-on-cash divided by years.
            (total_cash_flow / base.initial_investment) * 100.0 / years,
        )
    } else {
        (0.0, 0.0)
    };

    let result = SimulationTrialResult {
        total_return,
        total_cash_flow,
        total_appreciation,
        total_principal_paydown,
        final_equity,
        final_property_value,
        annualized_return,
        cash_on_cash_return,
    };
    ensure_finite(&result)?;
    Ok(result)
}

fn ensure_finite(result: &SimulationTrialResult) -> Result<(), TrialError> {
    for (field, value) in [
        ("totalReturn", result.total_return),
        ("totalCashFlow", result.total_cash_flow),
        ("totalAppreciation", result.total_appreciation),
        ("totalPrincipalPaydown", result.total_principal_paydown),
        ("finalEquity", result.final_equity),
        ("finalPropertyValue", result.final_property_value),
        ("annualizedReturn", result.annualized_return),
        ("cashOnCashReturn", result.cash_on_cash_return),
    ] {
        if !value.is_finite() {
            return Err(TrialError::NonFinite { field, value });
        }
    }
    Ok(())
}
