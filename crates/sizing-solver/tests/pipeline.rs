use sizing_core::{
    FinancialParams, Market, MarketYields, ProductDims, Scenario, ScenarioProduct, ScenarioSet,
    Substrate,
};
use sizing_econ::{DiscountConvention, PlanIndex};
use sizing_solver::{
    evaluate, evaluate_plan, sweep, BackendKind, CancelToken, EngineError, EvaluationRequest,
    GridAxis, GridCell, MarketThresholds, Policy, Report, SolveStatus, SolverConfig,
};

fn params(max_capacity: f64) -> FinancialParams {
    FinancialParams {
        max_capacity,
        rd_rate: 0.05,
        sga_rate: 0.05,
        tax_rate: 0.2,
        wacc: 0.1,
        dpo: 0.0,
        dso: 0.0,
        dio: 0.0,
    }
}

fn product(name: &str, market: Market, height_m: f64, width_m: f64, price: f64) -> ScenarioProduct {
    ScenarioProduct {
        name: name.to_string(),
        market,
        dims: ProductDims { height_m, width_m },
        prices: vec![price; 3],
    }
}

/// Three periods; on a 1m x 1m sheet NB tiles 8, MON 4 and TV 1.
fn scenario(nb: f64, mon: f64, tv: f64) -> Scenario {
    Scenario {
        periods: vec![2025, 2026, 2027],
        products: vec![
            product("NB", Market::Notebook, 0.25, 0.5, nb),
            product("MON", Market::Monitor, 0.5, 0.5, mon),
            product("TV", Market::Television, 1.0, 1.0, tv),
        ],
        yields: MarketYields {
            notebook: vec![1.0; 3],
            monitor: vec![1.0; 3],
            television: vec![1.0; 3],
        },
        substrate_cost: vec![10.0; 3],
        investment: vec![500.0, 0.0, 0.0],
        depreciation: vec![100.0; 3],
        params: params(10.0),
    }
}

fn fixture() -> ScenarioSet {
    ScenarioSet::new(vec![
        scenario(20.0, 30.0, 150.0),
        scenario(18.0, 33.0, 140.0),
        scenario(22.0, 27.0, 160.0),
    ])
    .unwrap()
}

fn run(set: &ScenarioSet, substrate: Substrate, policy: Policy, config: &SolverConfig) -> Result<Report, EngineError> {
    let request = EvaluationRequest {
        substrate,
        policy,
        verbose: true,
    };
    evaluate(set, &request, config, &CancelToken::new())
}

fn unit_sheet() -> Substrate {
    Substrate::new(1.0, 1.0)
}

fn market_share(notebook: f64, monitor: f64, television: f64) -> Policy {
    Policy::MarketShare(MarketThresholds {
        notebook,
        monitor,
        television,
    })
}

/// One period, one notebook product; `max_capacity` is monthly.
fn toy_set(max_capacity: f64) -> ScenarioSet {
    let scenario = Scenario {
        periods: vec![2025],
        products: vec![ScenarioProduct {
            name: "P".to_string(),
            market: Market::Notebook,
            dims: ProductDims {
                height_m: 1.0,
                width_m: 0.5,
            },
            prices: vec![100.0],
        }],
        yields: MarketYields {
            notebook: vec![0.9],
            monitor: vec![1.0],
            television: vec![1.0],
        },
        substrate_cost: vec![10.0],
        investment: vec![0.0],
        depreciation: vec![0.0],
        params: FinancialParams {
            max_capacity,
            rd_rate: 0.05,
            sga_rate: 0.03,
            tax_rate: 0.25,
            wacc: 0.0,
            dpo: 0.0,
            dso: 0.0,
            dio: 0.0,
        },
    };
    ScenarioSet::new(vec![scenario]).unwrap()
}

/// After-tax NPV of one 2m x 1m sheet of the toy product: 4 units, area 2.
fn toy_margin_per_sheet() -> f64 {
    let (price, yld, units, cost, area, tax, rd, sga) = (100.0, 0.9, 4.0, 10.0, 2.0, 0.25, 0.05, 0.03);
    let sales = price * yld * units;
    (1.0 - tax) * (sales - cost * area - sales * (rd + sga))
}

#[test]
fn toy_instance_matches_hand_computation() {
    let set = toy_set(10.0);
    let r = run(&set, Substrate::new(2.0, 1.0), Policy::Unconstrained, &SolverConfig::default()).unwrap();
    assert_eq!(r.production.substrates, vec![vec![120]]);
    assert!((r.expected_npv - 120.0 * toy_margin_per_sheet()).abs() < 1e-6);
    assert!((r.expected_npv - 28_008.0).abs() < 1e-6);
    assert_eq!(r.negative_scenarios, 0);
    assert_eq!(r.status, SolveStatus::Optimal);
}

#[test]
fn toy_instance_with_one_hundred_sheets_per_period() {
    // 100 sheets a period, quoted monthly.
    let set = toy_set(100.0 / 12.0);
    let r = run(&set, Substrate::new(2.0, 1.0), Policy::Unconstrained, &SolverConfig::default()).unwrap();
    assert_eq!(r.production.substrates, vec![vec![100]]);
    assert!((toy_margin_per_sheet() - 233.4).abs() < 1e-9);
    assert!((r.expected_npv - 23_340.0).abs() < 1e-6);
    assert!((r.profit_and_loss[0].npv - r.expected_npv).abs() < 1e-6);
    assert_eq!(r.status, SolveStatus::Optimal);
}

#[test]
fn product_too_large_for_substrate_is_never_produced() {
    let set = fixture();
    let small = Substrate::new(0.5, 0.5);
    for policy in [Policy::Unconstrained, Policy::ProductShare(0.1)] {
        let r = run(&set, small, policy, &SolverConfig::default()).unwrap();
        assert_eq!(r.production.substrates[2], vec![0, 0, 0]);
    }
}

#[test]
fn relaxing_policy_never_lowers_expected_npv() {
    let set = fixture();
    let config = SolverConfig::default();
    let high = run(&set, unit_sheet(), Policy::ProductShare(0.3), &config).unwrap();
    let low = run(&set, unit_sheet(), Policy::ProductShare(0.1), &config).unwrap();
    let free = run(&set, unit_sheet(), Policy::Unconstrained, &config).unwrap();
    assert!(high.expected_npv <= low.expected_npv + 1e-6);
    assert!(low.expected_npv <= free.expected_npv + 1e-6);
    // Floors bind after the two ramp-up periods only.
    assert_eq!(high.production.substrates[1][..2], [0, 0]);
    assert_eq!(high.production.substrates[1][2], 36);
}

#[test]
fn capacity_is_respected_every_period() {
    let r = run(&fixture(), unit_sheet(), market_share(0.2, 0.2, 0.2), &SolverConfig::default()).unwrap();
    assert!(r.production.total.iter().all(|&t| t <= 120));
}

#[test]
fn identical_profitable_scenarios_have_no_negative_npv() {
    let set = ScenarioSet::new(vec![scenario(20.0, 30.0, 150.0); 4]).unwrap();
    let r = run(&set, unit_sheet(), Policy::Unconstrained, &SolverConfig::default()).unwrap();
    assert_eq!(r.negative_scenarios, 0);
    assert!(r.scenario_npvs.iter().all(|v| (v - r.expected_npv).abs() < 1e-6));
    assert!((r.max_npv - r.min_npv).abs() < 1e-6);
}

#[test]
fn reported_plan_replays_to_reported_npv() {
    let set = fixture();
    let r = run(&set, unit_sheet(), market_share(0.1, 0.2, 0.1), &SolverConfig::default()).unwrap();
    let index = PlanIndex::new(set.product_count(), set.horizon());
    let mut plan = vec![0.0; index.len()];
    for (p, row) in r.production.substrates.iter().enumerate() {
        for (t, &x) in row.iter().enumerate() {
            plan[index.var(p, t)] = x as f64;
        }
    }
    let replayed = evaluate_plan(&set, unit_sheet(), &plan, DiscountConvention::PeriodIndex).unwrap();
    assert!((replayed - r.expected_npv).abs() < 1e-6);
    let by_period: f64 = r.profit_and_loss.iter().map(|s| s.npv).sum();
    assert!((by_period - r.expected_npv).abs() < 1e-6);
}

#[test]
fn unprofitable_market_gets_no_floor() {
    // MON earns 4 x 2 = 8 per sheet against a cost of 10.
    let set = ScenarioSet::new(vec![scenario(20.0, 2.0, 150.0)]).unwrap();
    let r = run(&set, unit_sheet(), market_share(0.1, 0.5, 0.1), &SolverConfig::default()).unwrap();
    assert_eq!(r.production.substrates[1], vec![0, 0, 0]);
    // TV is profitable but worse than NB, so its floor binds: ceil(0.1 * 120).
    assert_eq!(r.production.substrates[2], vec![12, 12, 12]);
    assert_eq!(r.production.substrates[0], vec![108, 108, 108]);
}

#[test]
fn contradictory_product_floors_are_infeasible() {
    let err = run(&fixture(), unit_sheet(), Policy::ProductShare(0.5), &SolverConfig::default()).unwrap_err();
    assert!(err.is_infeasible());
    assert!(err.to_string().contains("product-share(0.5)"));
}

#[test]
fn cancelled_token_aborts_before_solving() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let request = EvaluationRequest {
        substrate: unit_sheet(),
        policy: Policy::Unconstrained,
        verbose: false,
    };
    let err = evaluate(&fixture(), &request, &SolverConfig::default(), &cancel).unwrap_err();
    assert!(matches!(err, EngineError::Cancelled { .. }));
}

#[test]
fn zero_time_limit_falls_back_to_the_allocation() {
    let set = fixture();
    let exact = run(&set, unit_sheet(), Policy::ProductShare(0.2), &SolverConfig::default()).unwrap();
    let config = SolverConfig {
        time_limit_secs: Some(0.0),
        ..SolverConfig::default()
    };
    let timed = run(&set, unit_sheet(), Policy::ProductShare(0.2), &config).unwrap();
    assert_eq!(timed.status, SolveStatus::TimeLimitIncumbent);
    assert_eq!(timed.backend, "period_allocation");
    assert!((timed.expected_npv - exact.expected_npv).abs() < 1e-6);

    let strict = SolverConfig {
        time_limit_secs: Some(0.0),
        incumbent_fallback: false,
        ..SolverConfig::default()
    };
    let err = run(&set, unit_sheet(), Policy::ProductShare(0.2), &strict).unwrap_err();
    assert!(matches!(err, EngineError::TimedOut { .. }));
    assert!(err.to_string().contains("product-share(0.2)"));
}

#[test]
fn backends_agree_on_objective() {
    let set = fixture();
    let alloc = SolverConfig {
        backend: BackendKind::PeriodAllocation,
        ..SolverConfig::default()
    };
    for policy in [
        Policy::Unconstrained,
        market_share(0.1, 0.3, 0.2),
        Policy::ProductShare(0.25),
    ] {
        let lp = run(&set, unit_sheet(), policy.clone(), &SolverConfig::default()).unwrap();
        let pa = run(&set, unit_sheet(), policy, &alloc).unwrap();
        assert!((lp.expected_npv - pa.expected_npv).abs() < 1e-6);
        assert_eq!(pa.backend, "period_allocation");
    }
}

#[test]
fn end_of_period_discounting_shifts_every_cash_flow() {
    let set = fixture();
    let base = run(&set, unit_sheet(), Policy::Unconstrained, &SolverConfig::default()).unwrap();
    let config = SolverConfig {
        discount: DiscountConvention::EndOfPeriod,
        ..SolverConfig::default()
    };
    let shifted = run(&set, unit_sheet(), Policy::Unconstrained, &config).unwrap();
    assert!((shifted.expected_npv - base.expected_npv / 1.1).abs() < 1e-6);
}

#[test]
fn grid_has_one_row_per_height() {
    let set = fixture();
    let widths = GridAxis {
        start: 0.5,
        step: 0.5,
        count: 2,
    };
    let heights = GridAxis {
        start: 0.5,
        step: 0.25,
        count: 3,
    };
    let config = SolverConfig::default();
    let grid = sweep(&set, &widths, &heights, &Policy::ProductShare(0.1), &config, &CancelToken::new()).unwrap();
    assert_eq!(grid.shape(), (3, 2));
    assert_eq!(grid.widths, vec![0.5, 1.0]);
    assert_eq!(grid.heights, vec![0.5, 0.75, 1.0]);
    assert!(grid.cells.iter().flatten().all(|c| matches!(c, GridCell::Npv { .. })));
    let (best, _) = grid.best().unwrap();
    assert_eq!(best, Substrate::new(1.0, 1.0));

    let parallel = SolverConfig {
        workers: 3,
        ..SolverConfig::default()
    };
    let again = sweep(&set, &widths, &heights, &Policy::ProductShare(0.1), &parallel, &CancelToken::new()).unwrap();
    for (a, b) in grid.cells.iter().flatten().zip(again.cells.iter().flatten()) {
        assert!((a.npv().unwrap() - b.npv().unwrap()).abs() < 1e-6);
    }

    let mut out = Vec::new();
    grid.write_csv(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "height\\width,0.50,1.00");
    assert!(lines[1].starts_with("0.50,"));
}

#[test]
fn infeasible_cells_do_not_stop_the_sweep() {
    let widths = GridAxis {
        start: 1.0,
        step: 0.0,
        count: 2,
    };
    let heights = GridAxis {
        start: 1.0,
        step: 0.0,
        count: 1,
    };
    let grid = sweep(
        &fixture(),
        &widths,
        &heights,
        &Policy::ProductShare(0.5),
        &SolverConfig::default(),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(grid.cells[0].iter().all(|c| *c == GridCell::Infeasible));
    assert_eq!(grid.best(), None);
}

#[test]
fn cancelled_sweep_returns_error() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = sweep(
        &fixture(),
        &GridAxis::DEFAULT_WIDTHS,
        &GridAxis::DEFAULT_HEIGHTS,
        &Policy::Unconstrained,
        &SolverConfig::default(),
        &cancel,
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled { .. }));
}
