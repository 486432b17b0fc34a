//! Solving layers that turn a [`ModelSpec`] into variable values.

use good_lp::{
    default_solver, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolutionStatus, SolverModel, Variable, WithTimeLimit,
};
use sizing_econ::LinearExpr;
use std::time::Duration;
use thiserror::Error;

use crate::model::{ConstraintKind, ModelSpec, Sense};

const TOLERANCE: f64 = 1e-9;

/// Outcome of a failed solve.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("model is infeasible")]
    Infeasible,
    #[error("model is unbounded")]
    Unbounded,
    /// The time budget ran out before an optimal plan was proven.
    #[error("time limit reached")]
    TimeLimit,
    /// The backend cannot represent this model structure.
    #[error("unsupported model structure: {0}")]
    Unsupported(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// A solving layer. Implementations must not retain the model.
pub trait SolverBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Optimal value of every variable, in declaration order.
    fn solve(&self, model: &ModelSpec) -> Result<Vec<f64>, SolveError>;

    /// Like [`SolverBackend::solve`], giving up with [`SolveError::TimeLimit`]
    /// once `limit` has elapsed. Backends without a budget ignore it.
    fn solve_within(&self, model: &ModelSpec, limit: Option<Duration>) -> Result<Vec<f64>, SolveError> {
        let _ = limit;
        self.solve(model)
    }
}

/// Mixed-integer program solved through `good_lp`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LpBackend;

fn to_expression(expr: &LinearExpr, handles: &[Variable]) -> Expression {
    let mut out = Expression::with_capacity(handles.len());
    for (var, coef) in expr.terms() {
        out.add_mul(coef, handles[var]);
    }
    out
}

impl SolverBackend for LpBackend {
    fn name(&self) -> &'static str {
        "lp"
    }

    fn solve(&self, model: &ModelSpec) -> Result<Vec<f64>, SolveError> {
        self.solve_within(model, None)
    }

    fn solve_within(&self, model: &ModelSpec, limit: Option<Duration>) -> Result<Vec<f64>, SolveError> {
        let mut vars = ProblemVariables::new();
        let handles: Vec<Variable> = model
            .vars
            .iter()
            .map(|decl| {
                let mut def = variable().min(decl.lower);
                if let Some(upper) = decl.upper {
                    def = def.max(upper);
                }
                if decl.integer {
                    def = def.integer();
                }
                vars.add(def)
            })
            .collect();

        let objective = to_expression(&model.objective, &handles);
        let mut problem = vars.maximise(objective).using(default_solver);
        if let Some(limit) = limit {
            problem = problem.with_time_limit(limit.as_secs_f64());
        }
        for c in &model.constraints {
            let lhs = to_expression(&c.expr, &handles);
            let row = match c.sense {
                Sense::Le => lhs.leq(c.rhs),
                Sense::Ge => lhs.geq(c.rhs),
                Sense::Eq => lhs.eq(c.rhs),
            };
            problem = problem.with(row);
        }

        match problem.solve() {
            Ok(solution) if matches!(solution.status(), SolutionStatus::Optimal) => {
                Ok(handles.iter().map(|&h| solution.value(h)).collect())
            }
            Ok(_) => Err(SolveError::TimeLimit),
            // microlp reports a budget that ran out before any incumbent as `Other`.
            Err(ResolutionError::Other(_)) if limit.is_some() => Err(SolveError::TimeLimit),
            Err(ResolutionError::Infeasible) => Err(SolveError::Infeasible),
            Err(ResolutionError::Unbounded) => Err(SolveError::Unbounded),
            Err(e) => Err(SolveError::Backend(e.to_string())),
        }
    }
}

/// Exact allocation for per-period capacity rows with disjoint floors.
///
/// Each variable belongs to one capacity row, so the objective separates by
/// row. Within a row: start every variable at its lower bound, cover each
/// floor with its best-paying members, then hand remaining capacity to
/// positive-coefficient variables in descending order. Ties go to the lower
/// variable id.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeriodAllocation;

struct Row {
    members: Vec<usize>,
    capacity: f64,
    floors: Vec<(Vec<usize>, f64)>,
}

impl PeriodAllocation {
    fn rows(model: &ModelSpec, lower: &mut [f64]) -> Result<(Vec<Row>, Vec<Option<usize>>), SolveError> {
        let n = model.vars.len();
        let mut row_of: Vec<Option<usize>> = vec![None; n];
        let mut rows: Vec<Row> = Vec::new();
        let mut group_floors: Vec<(Vec<usize>, f64)> = Vec::new();

        for c in &model.constraints {
            let mut members = Vec::new();
            for (var, coef) in c.expr.terms() {
                if coef == 0.0 {
                    continue;
                }
                if (coef - 1.0).abs() > TOLERANCE {
                    return Err(SolveError::Unsupported(format!("{} has coefficient {coef}", c.kind)));
                }
                members.push(var);
            }
            match (c.kind, c.sense) {
                (ConstraintKind::PeriodCapacity { .. }, Sense::Le) => {
                    for &v in &members {
                        if row_of[v].is_some() {
                            return Err(SolveError::Unsupported(format!(
                                "variable {v} in more than one capacity row"
                            )));
                        }
                        row_of[v] = Some(rows.len());
                    }
                    rows.push(Row {
                        members,
                        capacity: c.rhs,
                        floors: Vec::new(),
                    });
                }
                (ConstraintKind::ProductFloor { .. }, Sense::Ge) if members.len() == 1 => {
                    lower[members[0]] = lower[members[0]].max(c.rhs);
                }
                (ConstraintKind::MarketFloor { .. }, Sense::Ge) => {
                    group_floors.push((members, c.rhs));
                }
                (kind, sense) => {
                    return Err(SolveError::Unsupported(format!("{kind} with sense {sense:?}")));
                }
            }
        }

        let mut grouped = vec![false; n];
        for (members, floor) in group_floors {
            let Some(&first) = members.first() else {
                if floor > TOLERANCE {
                    return Err(SolveError::Infeasible);
                }
                continue;
            };
            let row = row_of[first]
                .ok_or_else(|| SolveError::Unsupported(format!("floor on unbounded variable {first}")))?;
            for &v in &members {
                if row_of[v] != Some(row) || grouped[v] {
                    return Err(SolveError::Unsupported(
                        "floors must be disjoint and within one period".to_string(),
                    ));
                }
                grouped[v] = true;
            }
            rows[row].floors.push((members, floor));
        }
        Ok((rows, row_of))
    }
}

/// Raise variables in `order` towards their upper bounds until `amount` is placed.
fn fill(order: &[usize], amount: f64, x: &mut [f64], upper: &[f64]) -> f64 {
    let mut left = amount;
    for &v in order {
        if left <= TOLERANCE {
            break;
        }
        let take = left.min(upper[v] - x[v]).max(0.0);
        x[v] += take;
        left -= take;
    }
    left.max(0.0)
}

impl SolverBackend for PeriodAllocation {
    fn name(&self) -> &'static str {
        "period_allocation"
    }

    fn solve(&self, model: &ModelSpec) -> Result<Vec<f64>, SolveError> {
        let mut lower: Vec<f64> = model.vars.iter().map(|v| v.lower).collect();
        let upper: Vec<f64> = model
            .vars
            .iter()
            .map(|v| v.upper.unwrap_or(f64::INFINITY))
            .collect();
        let (rows, row_of) = Self::rows(model, &mut lower)?;
        if lower.iter().zip(&upper).any(|(l, u)| l > &(u + TOLERANCE)) {
            return Err(SolveError::Infeasible);
        }

        let coef = |v: usize| model.objective.coefficient(v);
        let by_value = |members: &[usize]| {
            let mut order = members.to_vec();
            order.sort_by(|&a, &b| coef(b).total_cmp(&coef(a)).then(a.cmp(&b)));
            order
        };

        let mut x = lower;
        for (v, row) in row_of.iter().enumerate() {
            if row.is_none() && coef(v) > 0.0 {
                if upper[v].is_infinite() {
                    return Err(SolveError::Unbounded);
                }
                x[v] = upper[v];
            }
        }

        for row in &rows {
            for (members, floor) in &row.floors {
                let have: f64 = members.iter().map(|&v| x[v]).sum();
                if fill(&by_value(members), floor - have, &mut x, &upper) > TOLERANCE {
                    return Err(SolveError::Infeasible);
                }
            }
            let used: f64 = row.members.iter().map(|&v| x[v]).sum();
            if used > row.capacity + TOLERANCE {
                return Err(SolveError::Infeasible);
            }
            let gainful: Vec<usize> = by_value(&row.members)
                .into_iter()
                .filter(|&v| coef(v) > 0.0)
                .collect();
            fill(&gainful, row.capacity - used, &mut x, &upper);
        }
        Ok(x)
    }
}
