//! Model assembly and solve for one substrate size.

use sizing_core::{ScenarioSet, Substrate};
use sizing_econ::{DiscountConvention, EconError, FinancialModel, TilingTable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{LpBackend, PeriodAllocation, SolveError, SolverBackend};
use crate::config::{BackendKind, ConfigError, SolverConfig};
use crate::model::{ModelBuilder, ModelSpec};
use crate::policy::{apply_policy, Policy, PolicyContext};
use crate::report::Report;

const FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// Shared flag that aborts an evaluation in progress.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How the returned plan was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    /// The time limit expired; the plan is the per-period allocation.
    TimeLimitIncumbent,
}

/// One evaluation of the pipeline.
#[derive(Clone, Debug)]
pub struct EvaluationRequest {
    pub substrate: Substrate,
    pub policy: Policy,
    /// Log the solve summary and plan at info level.
    pub verbose: bool,
}

/// Failures of one evaluation; each carries the cell that produced it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid model input at {substrate}: {source}")]
    Econ {
        substrate: Substrate,
        #[source]
        source: EconError,
    },
    #[error("no feasible plan at {substrate} under {policy}")]
    Infeasible { substrate: Substrate, policy: String },
    #[error("unbounded model at {substrate} under {policy}")]
    Unbounded { substrate: Substrate, policy: String },
    #[error("solver {backend} failed at {substrate} under {policy}: {message}")]
    Solver {
        substrate: Substrate,
        policy: String,
        backend: &'static str,
        message: String,
    },
    #[error("solve at {substrate} under {policy} exceeded the time limit of {limit:?}")]
    TimedOut {
        substrate: Substrate,
        policy: String,
        limit: Duration,
    },
    #[error("evaluation at {substrate} under {policy} was cancelled")]
    Cancelled { substrate: Substrate, policy: String },
    /// A sweep worker died; `substrate` is the cell it was on, when known.
    #[error("worker failed{} under {policy}: {message}", located(.substrate))]
    Worker {
        substrate: Option<Substrate>,
        policy: String,
        message: String,
    },
}

fn located(substrate: &Option<Substrate>) -> String {
    substrate.as_ref().map(|s| format!(" at {s}")).unwrap_or_default()
}

impl EngineError {
    /// True for the "no feasible plan at this substrate size" outcome.
    pub fn is_infeasible(&self) -> bool {
        matches!(self, EngineError::Infeasible { .. })
    }
}

/// Solved model for one substrate size, ready for reporting.
#[derive(Clone, Debug)]
pub struct SolvedModel {
    pub substrate: Substrate,
    pub policy: Policy,
    pub tiling: TilingTable,
    pub financials: FinancialModel,
    /// `x[product, period]` in [`sizing_econ::PlanIndex`] order.
    pub plan: Vec<f64>,
    /// Expected NPV of `plan`.
    pub objective: f64,
    pub status: SolveStatus,
    pub backend: &'static str,
    pub elapsed: Duration,
}

/// Tiling, financial ledger and the sealed program for one substrate.
pub struct BuiltModel {
    pub tiling: TilingTable,
    pub financials: FinancialModel,
    pub spec: ModelSpec,
}

/// Build the program without solving it.
pub fn build_model(
    set: &ScenarioSet,
    substrate: Substrate,
    policy: &Policy,
    discount: DiscountConvention,
) -> Result<BuiltModel, EngineError> {
    let econ = |source| EngineError::Econ { substrate, source };
    let tiling = TilingTable::build(set, substrate).map_err(econ)?;
    let financials = FinancialModel::build(set, &tiling, discount).map_err(econ)?;

    let index = financials.index();
    let mut builder = ModelBuilder::new(index);
    let ctx = PolicyContext {
        set,
        tiling: &tiling,
        index,
    };
    apply_policy(&mut builder, policy, &ctx);
    builder.maximize(financials.expected_npv().clone());
    debug!(
        %substrate,
        %policy,
        variables = index.len(),
        constraints = builder.constraint_count(),
        "model built"
    );
    let spec = builder.finish();
    Ok(BuiltModel {
        tiling,
        financials,
        spec,
    })
}

/// Build and solve the expected-NPV program for one substrate size with the
/// backend named in `config`.
pub fn solve(
    set: &ScenarioSet,
    request: &EvaluationRequest,
    config: &SolverConfig,
    cancel: &CancelToken,
) -> Result<SolvedModel, EngineError> {
    match config.backend {
        BackendKind::Lp => solve_with(set, request, config, cancel, &LpBackend),
        BackendKind::PeriodAllocation => solve_with(set, request, config, cancel, &PeriodAllocation),
    }
}

/// Build and solve with an explicit backend.
///
/// The program separates by period, so it is solved one period at a time on
/// the calling thread. `cancel` and the time limit are checked between
/// periods, and the remaining budget is handed to the backend for each one.
pub fn solve_with(
    set: &ScenarioSet,
    request: &EvaluationRequest,
    config: &SolverConfig,
    cancel: &CancelToken,
    backend: &dyn SolverBackend,
) -> Result<SolvedModel, EngineError> {
    let substrate = request.substrate;
    let policy = &request.policy;
    let limit = config.time_limit()?;
    let cancelled = || EngineError::Cancelled {
        substrate,
        policy: policy.to_string(),
    };
    if cancel.is_cancelled() {
        return Err(cancelled());
    }
    let started = Instant::now();
    let BuiltModel {
        tiling,
        financials,
        spec,
    } = build_model(set, substrate, policy, config.discount)?;
    if cancel.is_cancelled() {
        return Err(cancelled());
    }
    // The budget covers solving, not model assembly.
    let deadline = limit.map(|l| Instant::now() + l);

    let solved = solve_by_period(&spec, backend, deadline, cancel)
        .map_err(|e| solve_error(e, substrate, policy, backend.name()))?;
    if cancel.is_cancelled() {
        return Err(cancelled());
    }
    let (values, status, backend) = match solved {
        Some(values) => (values, SolveStatus::Optimal, backend.name()),
        None => {
            let limit = limit.unwrap_or_default();
            if !config.incumbent_fallback {
                return Err(EngineError::TimedOut {
                    substrate,
                    policy: policy.to_string(),
                    limit,
                });
            }
            warn!(%substrate, %policy, ?limit, "time limit reached; using per-period allocation");
            let values = PeriodAllocation
                .solve(&spec)
                .map_err(|e| solve_error(Interrupt::Solve(e), substrate, policy, PeriodAllocation.name()))?;
            (values, SolveStatus::TimeLimitIncumbent, PeriodAllocation.name())
        }
    };

    let plan = round_plan(&spec, values);
    if !spec.is_feasible(&plan, FEASIBILITY_TOLERANCE) {
        return Err(EngineError::Solver {
            substrate,
            policy: policy.to_string(),
            backend,
            message: "returned plan violates the model after rounding".to_string(),
        });
    }
    let objective = financials.expected_npv().evaluate(&plan);
    let elapsed = started.elapsed();

    if request.verbose {
        info!(%substrate, %policy, backend, objective, ?elapsed, ?status, "solved");
        let index = financials.index();
        for (product, name) in set.product_names().iter().enumerate() {
            let row: Vec<f64> = (0..index.periods)
                .map(|t| plan[index.var(product, t)])
                .collect();
            info!(product = %name, plan = ?row, "production");
        }
    } else {
        debug!(%substrate, %policy, backend, objective, ?elapsed, "solved");
    }

    Ok(SolvedModel {
        substrate,
        policy: policy.clone(),
        tiling,
        financials,
        plan,
        objective,
        status,
        backend,
        elapsed,
    })
}

/// Entry point for drivers: solve and report.
pub fn evaluate(
    set: &ScenarioSet,
    request: &EvaluationRequest,
    config: &SolverConfig,
    cancel: &CancelToken,
) -> Result<Report, EngineError> {
    let solved = solve(set, request, config, cancel)?;
    Ok(Report::from_solved(&solved, set))
}

/// Expected NPV of a fixed production plan, replayed through the financial model.
pub fn evaluate_plan(
    set: &ScenarioSet,
    substrate: Substrate,
    plan: &[f64],
    discount: DiscountConvention,
) -> Result<f64, EngineError> {
    let econ = |source| EngineError::Econ { substrate, source };
    let tiling = TilingTable::build(set, substrate).map_err(econ)?;
    let financials = FinancialModel::build(set, &tiling, discount).map_err(econ)?;
    financials.check_plan(plan).map_err(econ)?;
    Ok(financials.expected_npv().evaluate(plan))
}

/// Why a period-by-period solve stopped short.
enum Interrupt {
    Cancelled,
    Solve(SolveError),
}

/// Solve each period block in turn. `Ok(None)` means the time budget ran
/// out before every period had an optimal plan.
fn solve_by_period(
    spec: &ModelSpec,
    backend: &dyn SolverBackend,
    deadline: Option<Instant>,
    cancel: &CancelToken,
) -> Result<Option<Vec<f64>>, Interrupt> {
    let index = spec.index;
    let mut values = vec![0.0; spec.vars.len()];
    for period in 0..index.periods {
        if cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        let budget = match deadline {
            Some(d) => {
                let left = d.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Ok(None);
                }
                Some(left)
            }
            None => None,
        };
        let block = spec.period_block(period).ok_or_else(|| {
            Interrupt::Solve(SolveError::Unsupported(format!("rows of period {period} span other periods")))
        })?;
        let block_values = match backend.solve_within(&block, budget) {
            Ok(v) => v,
            Err(SolveError::TimeLimit) => return Ok(None),
            Err(e) => return Err(Interrupt::Solve(e)),
        };
        if block_values.len() != block.vars.len() {
            return Err(Interrupt::Solve(SolveError::Backend(format!(
                "{} values for {} variables",
                block_values.len(),
                block.vars.len()
            ))));
        }
        for (product, v) in block_values.into_iter().enumerate() {
            values[index.var(product, period)] = v;
        }
    }
    Ok(Some(values))
}

fn solve_error(e: Interrupt, substrate: Substrate, policy: &Policy, backend: &'static str) -> EngineError {
    let policy = policy.to_string();
    match e {
        Interrupt::Cancelled => EngineError::Cancelled { substrate, policy },
        Interrupt::Solve(SolveError::Infeasible) => EngineError::Infeasible { substrate, policy },
        Interrupt::Solve(SolveError::Unbounded) => EngineError::Unbounded { substrate, policy },
        Interrupt::Solve(other) => EngineError::Solver {
            substrate,
            policy,
            backend,
            message: other.to_string(),
        },
    }
}

/// Snap integer variables to the nearest integer.
fn round_plan(spec: &ModelSpec, mut values: Vec<f64>) -> Vec<f64> {
    for (v, decl) in values.iter_mut().zip(&spec.vars) {
        if decl.integer {
            *v = v.round();
        }
        // -0.0 from rounding
        if *v == 0.0 {
            *v = 0.0;
        }
    }
    values
}
