#![deny(warnings)]

//! Economic models for substrate sizing.
//!
//! This crate provides:
//! - Tiling of product units onto a candidate substrate in either orientation
//! - Affine expressions over the production-quantity decision variables
//! - The per-scenario, per-period financial recurrence from production
//!   quantities to discounted cash flow

use thiserror::Error;

pub mod finance;
pub mod linear;
pub mod tiling;

pub use finance::{
    expected_unit_margin, DiscountConvention, FinancialModel, PeriodLedger, ScenarioLedger,
};
pub use linear::{LinearExpr, PlanIndex};
pub use tiling::{compute_tiling, Orientation, Tiling, TilingTable};

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Substrate and product dimensions must be finite and strictly positive.
    #[error("invalid dimension: {0}")]
    InvalidDimension(String),
    /// Derived tables must agree with the scenario collection they came from.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },
    /// A production plan does not have one entry per decision variable.
    #[error("plan has {found} entries, expected {expected}")]
    PlanLength { expected: usize, found: usize },
}
