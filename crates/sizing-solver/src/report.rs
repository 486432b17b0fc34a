//! Summary of one solved substrate size.

use serde::Serialize;
use sizing_core::ScenarioSet;
use sizing_econ::{LinearExpr, PeriodLedger, ScenarioLedger};

use crate::engine::{SolveStatus, SolvedModel};

/// Profit and loss of one period, averaged across scenarios.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeriodStatement {
    pub period: i32,
    pub sales: f64,
    pub cost_of_sales: f64,
    pub cost_of_sales_ex_dep: f64,
    pub gross_margin: f64,
    pub depreciation: f64,
    pub rd_rate: f64,
    pub rd_expense: f64,
    pub sga_rate: f64,
    pub sga_expense: f64,
    pub operating_margin: f64,
    pub tax_rate: f64,
    pub net_income: f64,
    pub delta_working_capital: f64,
    pub capex: f64,
    /// Discounted net cash flow.
    pub npv: f64,
}

/// Substrates started per product and period.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductionTable {
    pub periods: Vec<i32>,
    pub products: Vec<String>,
    /// `substrates[product][period]`.
    pub substrates: Vec<Vec<u64>>,
    /// Column sums of `substrates`.
    pub total: Vec<u64>,
}

/// Everything the driver receives for one `(width, height, policy)`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    pub width_m: f64,
    pub height_m: f64,
    pub policy: String,
    pub status: SolveStatus,
    pub backend: String,
    pub elapsed_secs: f64,
    pub expected_npv: f64,
    pub max_npv: f64,
    pub min_npv: f64,
    pub scenario_npvs: Vec<f64>,
    /// Scenarios whose total discounted cash flow is strictly negative.
    pub negative_scenarios: usize,
    pub profit_and_loss: Vec<PeriodStatement>,
    pub production: ProductionTable,
}

impl Report {
    pub fn from_solved(solved: &SolvedModel, set: &ScenarioSet) -> Self {
        let plan = &solved.plan;
        let ledgers = solved.financials.scenarios();
        let scenario_npvs: Vec<f64> = ledgers.iter().map(|l| l.total_npv.evaluate(plan)).collect();
        let max_npv = scenario_npvs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min_npv = scenario_npvs.iter().copied().fold(f64::INFINITY, f64::min);
        let negative_scenarios = scenario_npvs.iter().filter(|&&v| v < 0.0).count();

        let profit_and_loss = set
            .period_labels()
            .iter()
            .enumerate()
            .map(|(t, &label)| statement(ledgers, t, label, plan))
            .collect();

        Self {
            width_m: solved.substrate.width_m,
            height_m: solved.substrate.height_m,
            policy: solved.policy.to_string(),
            status: solved.status,
            backend: solved.backend.to_string(),
            elapsed_secs: solved.elapsed.as_secs_f64(),
            expected_npv: solved.objective,
            max_npv,
            min_npv,
            scenario_npvs,
            negative_scenarios,
            profit_and_loss,
            production: production(solved, set),
        }
    }
}

fn average<F>(ledgers: &[ScenarioLedger], t: usize, f: F) -> f64
where
    F: Fn(&ScenarioLedger, &PeriodLedger) -> f64,
{
    ledgers.iter().map(|l| f(l, &l.periods[t])).sum::<f64>() / ledgers.len() as f64
}

fn statement(ledgers: &[ScenarioLedger], t: usize, period: i32, plan: &[f64]) -> PeriodStatement {
    let mean = |f: fn(&ScenarioLedger, &PeriodLedger) -> f64| average(ledgers, t, f);
    let line = |f: fn(&PeriodLedger) -> &LinearExpr| average(ledgers, t, |_, p| f(p).evaluate(plan));
    PeriodStatement {
        period,
        sales: line(|p| &p.sales),
        cost_of_sales: line(|p| &p.cost_of_sales),
        cost_of_sales_ex_dep: line(|p| &p.cost_of_sales_ex_dep),
        gross_margin: line(|p| &p.gross_margin),
        depreciation: mean(|_, p| p.depreciation),
        rd_rate: mean(|l, _| l.rd_rate),
        rd_expense: line(|p| &p.rd_expense),
        sga_rate: mean(|l, _| l.sga_rate),
        sga_expense: line(|p| &p.sga_expense),
        operating_margin: line(|p| &p.operating_margin),
        tax_rate: mean(|l, _| l.tax_rate),
        net_income: line(|p| &p.net_income),
        delta_working_capital: line(|p| &p.delta_working_capital),
        capex: mean(|_, p| p.investment),
        npv: line(|p| &p.npv),
    }
}

fn production(solved: &SolvedModel, set: &ScenarioSet) -> ProductionTable {
    let index = solved.financials.index();
    // Plans are integral after rounding in the engine.
    let substrates: Vec<Vec<u64>> = (0..index.products)
        .map(|p| {
            (0..index.periods)
                .map(|t| solved.plan[index.var(p, t)].max(0.0).round() as u64)
                .collect()
        })
        .collect();
    let total = (0..index.periods)
        .map(|t| substrates.iter().map(|row| row[t]).sum())
        .collect();
    ProductionTable {
        periods: set.period_labels().to_vec(),
        products: set.product_names(),
        substrates,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::engine::{solve, CancelToken, EvaluationRequest};
    use crate::policy::Policy;
    use sizing_core::{
        FinancialParams, Market, MarketYields, ProductDims, Scenario, ScenarioProduct, Substrate,
    };

    fn scenario(price: f64) -> Scenario {
        Scenario {
            periods: vec![2024, 2025],
            products: vec![
                ScenarioProduct {
                    name: "NB-13".to_string(),
                    market: Market::Notebook,
                    dims: ProductDims {
                        height_m: 1.0,
                        width_m: 0.5,
                    },
                    prices: vec![price, price],
                },
                ScenarioProduct {
                    name: "TV-65".to_string(),
                    market: Market::Television,
                    dims: ProductDims {
                        height_m: 4.0,
                        width_m: 4.0,
                    },
                    prices: vec![500.0, 500.0],
                },
            ],
            yields: MarketYields {
                notebook: vec![1.0, 1.0],
                monitor: vec![1.0, 1.0],
                television: vec![1.0, 1.0],
            },
            substrate_cost: vec![10.0, 10.0],
            investment: vec![1_000.0, 0.0],
            depreciation: vec![500.0, 500.0],
            params: FinancialParams {
                max_capacity: 1.0,
                rd_rate: 0.0,
                sga_rate: 0.0,
                tax_rate: 0.0,
                wacc: 0.0,
                dpo: 0.0,
                dso: 0.0,
                dio: 0.0,
            },
        }
    }

    fn report(prices: &[f64]) -> Report {
        let set = ScenarioSet::new(prices.iter().map(|&p| scenario(p)).collect()).unwrap();
        let request = EvaluationRequest {
            substrate: Substrate::new(2.0, 1.0),
            policy: Policy::Unconstrained,
            verbose: false,
        };
        let solved = solve(&set, &request, &SolverConfig::default(), &CancelToken::new()).unwrap();
        Report::from_solved(&solved, &set)
    }

    #[test]
    fn production_table_has_total_row() {
        let r = report(&[10.0]);
        assert_eq!(r.production.products, vec!["NB-13", "TV-65"]);
        assert_eq!(r.production.periods, vec![2024, 2025]);
        // TV does not fit; 12 sheets of notebooks each period.
        assert_eq!(r.production.substrates, vec![vec![12, 12], vec![0, 0]]);
        assert_eq!(r.production.total, vec![12, 12]);
    }

    #[test]
    fn statement_averages_across_scenarios() {
        let r = report(&[10.0, 30.0]);
        let first = &r.profit_and_loss[0];
        // 4 units per sheet, 12 sheets, mean price 20.
        assert!((first.sales - 960.0).abs() < 1e-9);
        assert!((first.cost_of_sales_ex_dep - 240.0).abs() < 1e-9);
        assert!((first.cost_of_sales - 740.0).abs() < 1e-9);
        assert_eq!(first.capex, 1_000.0);
        assert_eq!(r.profit_and_loss[1].capex, 0.0);
        assert_eq!(r.scenario_npvs.len(), 2);
        assert!(r.max_npv >= r.min_npv);
        let mean = r.scenario_npvs.iter().sum::<f64>() / 2.0;
        assert!((mean - r.expected_npv).abs() < 1e-6);
    }

    #[test]
    fn negative_scenarios_are_counted() {
        // Scenario NPVs: price 10 -> 2*(480-240) - 1000 = -520; price 30 -> 2*(1440-240) - 1000 = 1400.
        let r = report(&[10.0, 30.0]);
        assert_eq!(r.negative_scenarios, 1);
        assert!((r.min_npv + 520.0).abs() < 1e-6);
        assert!((r.max_npv - 1_400.0).abs() < 1e-6);
    }

    #[test]
    fn serializes_for_the_driver() {
        let r = report(&[10.0]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "optimal");
        assert_eq!(json["policy"], "unconstrained");
        assert_eq!(json["production"]["total"][1], 12);
        assert_eq!(json["profit_and_loss"].as_array().map(Vec::len), Some(2));
    }
}
