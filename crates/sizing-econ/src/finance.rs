//! Financial recurrence from production quantities to discounted cash flow.
//!
//! Every line item is an affine function of the `x[product, period]`
//! variables: decision variables only ever multiply scenario constants, so
//! the whole ledger stays linear and can be handed to an LP as-is or
//! evaluated directly against a fixed plan.

use serde::{Deserialize, Serialize};
use sizing_core::{Scenario, ScenarioSet};

use crate::linear::{LinearExpr, PlanIndex};
use crate::tiling::TilingTable;
use crate::EconError;

/// Exponent applied to `1 + WACC` when discounting period `t`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountConvention {
    /// Exponent `t`: the first period is not discounted.
    #[default]
    PeriodIndex,
    /// Exponent `t + 1`: cash flows arrive at period end.
    EndOfPeriod,
}

impl DiscountConvention {
    /// Multiplier turning a period-`period` cash flow into present value.
    pub fn factor(self, wacc: f64, period: usize) -> f64 {
        let exponent = match self {
            DiscountConvention::PeriodIndex => period,
            DiscountConvention::EndOfPeriod => period + 1,
        };
        1.0 / (1.0 + wacc).powi(exponent as i32)
    }
}

/// Line items of one scenario in one period.
#[derive(Clone, Debug)]
pub struct PeriodLedger {
    pub sales: LinearExpr,
    pub cost_of_sales_ex_dep: LinearExpr,
    pub cost_of_sales: LinearExpr,
    pub gross_margin: LinearExpr,
    pub rd_expense: LinearExpr,
    pub sga_expense: LinearExpr,
    pub operating_margin: LinearExpr,
    pub net_income: LinearExpr,
    pub working_capital: LinearExpr,
    pub delta_working_capital: LinearExpr,
    pub net_cash_flow: LinearExpr,
    /// Discounted net cash flow.
    pub npv: LinearExpr,
    pub depreciation: f64,
    pub investment: f64,
    pub discount_factor: f64,
}

/// All periods of one scenario.
#[derive(Clone, Debug)]
pub struct ScenarioLedger {
    /// Cash conversion cycle in years.
    pub ccc: f64,
    pub rd_rate: f64,
    pub sga_rate: f64,
    pub tax_rate: f64,
    pub periods: Vec<PeriodLedger>,
    /// Sum of discounted net cash flow over the horizon.
    pub total_npv: LinearExpr,
}

/// The financial model for one substrate size across a scenario collection.
#[derive(Clone, Debug)]
pub struct FinancialModel {
    index: PlanIndex,
    scenarios: Vec<ScenarioLedger>,
    expected_npv: LinearExpr,
}

impl FinancialModel {
    /// Build every scenario ledger for the substrate `tiling` was computed on.
    pub fn build(
        set: &ScenarioSet,
        tiling: &TilingTable,
        discount: DiscountConvention,
    ) -> Result<Self, EconError> {
        if tiling.scenario_count() != set.len() || tiling.product_count() != set.product_count() {
            return Err(EconError::ShapeMismatch {
                expected: format!("{} scenarios x {} products", set.len(), set.product_count()),
                found: format!(
                    "{} scenarios x {} products",
                    tiling.scenario_count(),
                    tiling.product_count()
                ),
            });
        }
        let index = PlanIndex::new(set.product_count(), set.horizon());
        let area = tiling.substrate().area_m2();
        let scenarios: Vec<ScenarioLedger> = set
            .iter()
            .enumerate()
            .map(|(s, scenario)| scenario_ledger(index, s, scenario, tiling, area, discount))
            .collect();

        // Sample average approximation of E[NPV].
        let weight = 1.0 / scenarios.len() as f64;
        let mut expected_npv = LinearExpr::default();
        for ledger in &scenarios {
            expected_npv.add_scaled(&ledger.total_npv, weight);
        }
        tracing::debug!(
            scenarios = scenarios.len(),
            variables = index.len(),
            substrate = %tiling.substrate(),
            "financial model built"
        );
        Ok(Self {
            index,
            scenarios,
            expected_npv,
        })
    }

    pub fn index(&self) -> PlanIndex {
        self.index
    }

    pub fn scenarios(&self) -> &[ScenarioLedger] {
        &self.scenarios
    }

    /// `(1/S) Σ_s Σ_t NPV[s, t]`.
    pub fn expected_npv(&self) -> &LinearExpr {
        &self.expected_npv
    }

    /// Total discounted cash flow of each scenario under `plan`.
    pub fn scenario_npvs(&self, plan: &[f64]) -> Result<Vec<f64>, EconError> {
        self.check_plan(plan)?;
        Ok(self
            .scenarios
            .iter()
            .map(|l| l.total_npv.evaluate(plan))
            .collect())
    }

    /// Reject plans that do not carry one value per decision variable.
    pub fn check_plan(&self, plan: &[f64]) -> Result<(), EconError> {
        if plan.len() != self.index.len() {
            return Err(EconError::PlanLength {
                expected: self.index.len(),
                found: plan.len(),
            });
        }
        Ok(())
    }
}

fn scenario_ledger(
    index: PlanIndex,
    s: usize,
    scenario: &Scenario,
    tiling: &TilingTable,
    area: f64,
    discount: DiscountConvention,
) -> ScenarioLedger {
    let params = scenario.params;
    let ccc = params.cash_conversion_cycle();
    let expense_rate = params.rd_rate + params.sga_rate;

    let sales: Vec<LinearExpr> = (0..index.periods)
        .map(|t| {
            let mut e = LinearExpr::default();
            for p in 0..index.products {
                let per_sheet =
                    scenario.price(p, t) * scenario.product_yield(p, t) * tiling.units(s, p);
                e.add_term(index.var(p, t), per_sheet);
            }
            e
        })
        .collect();
    let working_capital: Vec<LinearExpr> = sales.iter().map(|e| e.clone() * ccc).collect();

    let mut periods = Vec::with_capacity(index.periods);
    let mut total_npv = LinearExpr::default();
    for t in 0..index.periods {
        let depreciation = scenario.depreciation[t];
        let investment = scenario.investment[t];

        let mut cost_of_sales_ex_dep = LinearExpr::default();
        let sheet_cost = scenario.substrate_cost[t] * area;
        for p in 0..index.products {
            cost_of_sales_ex_dep.add_term(index.var(p, t), sheet_cost);
        }
        let cost_of_sales = cost_of_sales_ex_dep.clone() + LinearExpr::constant(depreciation);
        let gross_margin = sales[t].clone() - cost_of_sales.clone();
        let rd_expense = sales[t].clone() * params.rd_rate;
        let sga_expense = sales[t].clone() * params.sga_rate;
        let operating_margin = gross_margin.clone() - sales[t].clone() * expense_rate;
        let net_income = operating_margin.clone() * (1.0 - params.tax_rate);

        let delta_working_capital = if t == 0 {
            working_capital[0].clone()
        } else {
            working_capital[t - 1].clone() - working_capital[t].clone()
        };
        let net_cash_flow = net_income.clone() + LinearExpr::constant(depreciation)
            - delta_working_capital.clone()
            - LinearExpr::constant(investment);
        let discount_factor = discount.factor(params.wacc, t);
        let npv = net_cash_flow.clone() * discount_factor;
        total_npv += &npv;

        periods.push(PeriodLedger {
            sales: sales[t].clone(),
            cost_of_sales_ex_dep,
            cost_of_sales,
            gross_margin,
            rd_expense,
            sga_expense,
            operating_margin,
            net_income,
            working_capital: working_capital[t].clone(),
            delta_working_capital,
            net_cash_flow,
            npv,
            depreciation,
            investment,
            discount_factor,
        });
    }

    ScenarioLedger {
        ccc,
        rd_rate: params.rd_rate,
        sga_rate: params.sga_rate,
        tax_rate: params.tax_rate,
        periods,
        total_npv,
    }
}

/// Undiscounted per-sheet profit proxy of `product` in `period`:
/// `E[price * yield * units] - E[substrate cost * area]` over scenarios,
/// excluding depreciation. Computed from inputs, before any solve.
pub fn expected_unit_margin(
    set: &ScenarioSet,
    tiling: &TilingTable,
    product: usize,
    period: usize,
) -> f64 {
    let n = set.len() as f64;
    let area = tiling.substrate().area_m2();
    let (revenue, cost) = set
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(revenue, cost), (s, scenario)| {
            (
                revenue
                    + scenario.price(product, period)
                        * scenario.product_yield(product, period)
                        * tiling.units(s, product),
                cost + scenario.substrate_cost[period] * area,
            )
        });
    revenue / n - cost / n
}
