#![deny(warnings)]

//! Optimization of expected NPV over production plans for a candidate substrate.
//!
//! This crate provides:
//! - A solver-independent model builder and two solving layers
//! - Production policies (unconstrained, per-market share, per-product share)
//! - One-substrate evaluation with time limit, fallback and cancellation
//! - Reporting and a substrate-size grid sweep

pub mod backend;
pub mod config;
pub mod engine;
pub mod grid;
pub mod model;
pub mod policy;
pub mod report;

pub use backend::{LpBackend, PeriodAllocation, SolveError, SolverBackend};
pub use config::{BackendKind, ConfigError, PolicyConfig, SolverConfig};
pub use engine::{
    build_model, evaluate, evaluate_plan, solve, solve_with, BuiltModel, CancelToken, EngineError,
    EvaluationRequest, SolveStatus, SolvedModel,
};
pub use grid::{sweep, GridAxis, GridCell, NpvGrid};
pub use model::{Constraint, ConstraintKind, ModelBuilder, ModelSpec, Sense, VarDecl};
pub use policy::{apply_policy, MarketThresholds, Policy, PolicyContext, PolicyParams, RAMP_UP_PERIODS};
pub use report::{PeriodStatement, ProductionTable, Report};
