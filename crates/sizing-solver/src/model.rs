//! Solver-independent description of the production-planning program.
//!
//! A [`ModelBuilder`] collects variable bounds, labelled constraints and the
//! objective; [`ModelBuilder::finish`] seals them into an immutable
//! [`ModelSpec`] that any backend can consume.

use sizing_core::Market;
use sizing_econ::{LinearExpr, PlanIndex};
use std::fmt;

/// Bounds and integrality of one decision variable.
#[derive(Clone, Debug, PartialEq)]
pub struct VarDecl {
    pub lower: f64,
    /// `None` is unbounded above.
    pub upper: Option<f64>,
    pub integer: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

/// Structural role of a constraint row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Total substrates in a period within capacity.
    PeriodCapacity { period: usize },
    /// Minimum substrates for one market in a period.
    MarketFloor { market: Market, period: usize },
    /// Minimum substrates for one product in a period.
    ProductFloor { product: usize, period: usize },
}

impl ConstraintKind {
    /// Period whose variables the row constrains.
    pub fn period(&self) -> usize {
        match *self {
            ConstraintKind::PeriodCapacity { period }
            | ConstraintKind::MarketFloor { period, .. }
            | ConstraintKind::ProductFloor { period, .. } => period,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::PeriodCapacity { period } => write!(f, "capacity[{period}]"),
            ConstraintKind::MarketFloor { market, period } => {
                write!(f, "market_floor[{market},{period}]")
            }
            ConstraintKind::ProductFloor { product, period } => {
                write!(f, "product_floor[{product},{period}]")
            }
        }
    }
}

/// `expr (sense) rhs`; `expr` carries no constant.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl Constraint {
    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let lhs = self.expr.evaluate(values);
        match self.sense {
            Sense::Le => lhs <= self.rhs + tolerance,
            Sense::Ge => lhs >= self.rhs - tolerance,
            Sense::Eq => (lhs - self.rhs).abs() <= tolerance,
        }
    }
}

/// Immutable maximization program over `x[product, period]`.
#[derive(Clone, Debug)]
pub struct ModelSpec {
    pub index: PlanIndex,
    pub vars: Vec<VarDecl>,
    pub constraints: Vec<Constraint>,
    /// Maximized. Its constant part does not affect the optimum.
    pub objective: LinearExpr,
}

impl ModelSpec {
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective.evaluate(values)
    }

    /// Check bounds and every constraint row.
    pub fn is_feasible(&self, values: &[f64], tolerance: f64) -> bool {
        values.len() == self.vars.len()
            && self.vars.iter().zip(values).all(|(v, &x)| {
                x >= v.lower - tolerance && v.upper.map_or(true, |u| x <= u + tolerance)
            })
            && self
                .constraints
                .iter()
                .all(|c| c.is_satisfied(values, tolerance))
    }

    /// Sub-program over the variables of `period`; block variable `p` is
    /// `x[p, period]`. The objective constant is dropped.
    ///
    /// `None` when a row of this period reaches into another period.
    pub fn period_block(&self, period: usize) -> Option<ModelSpec> {
        let index = self.index;
        let local = |var: usize| {
            let (product, t) = index.split(var);
            (t == period).then_some(product)
        };

        let vars = (0..index.products)
            .map(|p| self.vars[index.var(p, period)].clone())
            .collect();
        let mut constraints = Vec::new();
        for c in self.constraints.iter().filter(|c| c.kind.period() == period) {
            let mut expr = LinearExpr::default();
            for (var, coef) in c.expr.terms() {
                expr.add_term(local(var)?, coef);
            }
            constraints.push(Constraint {
                kind: c.kind,
                expr,
                sense: c.sense,
                rhs: c.rhs,
            });
        }
        let mut objective = LinearExpr::default();
        for (var, coef) in self.objective.terms() {
            if let Some(p) = local(var) {
                objective.add_term(p, coef);
            }
        }
        Some(ModelSpec {
            index: PlanIndex::new(index.products, 1),
            vars,
            constraints,
            objective,
        })
    }
}

/// Collects the program before it is sealed.
#[derive(Debug)]
pub struct ModelBuilder {
    index: PlanIndex,
    vars: Vec<VarDecl>,
    constraints: Vec<Constraint>,
    objective: LinearExpr,
}

impl ModelBuilder {
    /// Declare one non-negative integer variable per (product, period).
    pub fn new(index: PlanIndex) -> Self {
        let vars = (0..index.len())
            .map(|_| VarDecl {
                lower: 0.0,
                upper: None,
                integer: true,
            })
            .collect();
        Self {
            index,
            vars,
            constraints: Vec::new(),
            objective: LinearExpr::default(),
        }
    }

    pub fn index(&self) -> PlanIndex {
        self.index
    }

    /// Tighten the upper bound of `var`.
    pub fn set_upper(&mut self, var: usize, upper: f64) {
        let decl = &mut self.vars[var];
        decl.upper = Some(decl.upper.map_or(upper, |u| u.min(upper)));
    }

    /// Add a row; any constant in `expr` is moved to the right-hand side.
    pub fn add_constraint(&mut self, kind: ConstraintKind, expr: LinearExpr, sense: Sense, rhs: f64) {
        let offset = expr.constant_part();
        let mut expr = expr;
        expr.add_constant(-offset);
        self.constraints.push(Constraint {
            kind,
            expr,
            sense,
            rhs: rhs - offset,
        });
    }

    pub fn maximize(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn finish(self) -> ModelSpec {
        ModelSpec {
            index: self.index,
            vars: self.vars,
            constraints: self.constraints,
            objective: self.objective,
        }
    }
}
