//! Production-mix policies layered on top of the capacity constraint.

use serde::{Deserialize, Serialize};
use sizing_core::{Market, ScenarioSet};
use sizing_econ::{expected_unit_margin, LinearExpr, PlanIndex, TilingTable};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::model::{ConstraintKind, ModelBuilder, Sense};

/// Periods exempt from the per-product floor while production ramps up.
pub const RAMP_UP_PERIODS: usize = 2;

const ROUNDING_SLACK: f64 = 1e-9;

/// Minimum production share per market, as a fraction of period capacity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MarketThresholds {
    pub notebook: f64,
    pub monitor: f64,
    pub television: f64,
}

impl MarketThresholds {
    /// Require every market key with a value in [0,1].
    pub fn from_map(map: &BTreeMap<Market, f64>) -> Result<Self, ConfigError> {
        let fetch = |market: Market| -> Result<f64, ConfigError> {
            let value = *map
                .get(&market)
                .ok_or(ConfigError::MissingMarketThreshold(market))?;
            check_fraction(market.label(), value)
        };
        Ok(Self {
            notebook: fetch(Market::Notebook)?,
            monitor: fetch(Market::Monitor)?,
            television: fetch(Market::Television)?,
        })
    }

    pub fn get(&self, market: Market) -> f64 {
        match market {
            Market::Notebook => self.notebook,
            Market::Monitor => self.monitor,
            Market::Television => self.television,
        }
    }
}

fn check_fraction(what: &str, value: f64) -> Result<f64, ConfigError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ThresholdOutOfRange {
            what: what.to_string(),
            value,
        });
    }
    Ok(value)
}

/// Raw policy parameters as supplied by the driver.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_thresholds: Option<BTreeMap<Market, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_threshold: Option<f64>,
}

/// Production policy regime.
#[derive(Clone, Debug, PartialEq)]
pub enum Policy {
    /// Capacity is the only constraint.
    Unconstrained,
    /// Each market with a profitable product gets a minimum share of capacity.
    MarketShare(MarketThresholds),
    /// Every product gets a minimum share of capacity after ramp-up.
    ProductShare(f64),
}

impl Policy {
    /// Map the driver selector (1, 2, 3) and its parameters to a policy.
    pub fn from_selector(selector: u8, params: &PolicyParams) -> Result<Self, ConfigError> {
        match selector {
            1 => {
                if params != &PolicyParams::default() {
                    warn!("policy parameters ignored for the unconstrained policy");
                }
                Ok(Policy::Unconstrained)
            }
            2 => {
                let map = params
                    .market_thresholds
                    .as_ref()
                    .ok_or(ConfigError::MissingMarketThreshold(Market::Notebook))?;
                Ok(Policy::MarketShare(MarketThresholds::from_map(map)?))
            }
            3 => {
                let value = params
                    .product_threshold
                    .ok_or(ConfigError::MissingProductThreshold)?;
                Ok(Policy::ProductShare(check_fraction("product", value)?))
            }
            other => Err(ConfigError::InvalidSelector(other)),
        }
    }

    /// Driver selector of this policy.
    pub fn selector(&self) -> u8 {
        match self {
            Policy::Unconstrained => 1,
            Policy::MarketShare(_) => 2,
            Policy::ProductShare(_) => 3,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Unconstrained => f.write_str("unconstrained"),
            Policy::MarketShare(t) => write!(
                f,
                "market-share(notebook={}, monitor={}, television={})",
                t.notebook, t.monitor, t.television
            ),
            Policy::ProductShare(t) => write!(f, "product-share({t})"),
        }
    }
}

/// Inputs the constraint builder reads; all borrowed, nothing mutated.
pub struct PolicyContext<'a> {
    pub set: &'a ScenarioSet,
    pub tiling: &'a TilingTable,
    pub index: PlanIndex,
}

impl PolicyContext<'_> {
    /// Substrates per period, taken from scenario 0.
    fn raw_capacity(&self) -> f64 {
        self.set.scenarios()[0].params.period_capacity()
    }

    /// Integral capacity bound; equivalent to the raw bound for integer plans.
    pub fn capacity(&self) -> f64 {
        (self.raw_capacity() + ROUNDING_SLACK).floor()
    }

    /// Integral floor for a share of capacity.
    pub fn share_floor(&self, fraction: f64) -> f64 {
        (fraction * self.raw_capacity() - ROUNDING_SLACK).ceil().max(0.0)
    }
}

/// Add capacity, degenerate-tiling and policy constraints to `builder`.
pub fn apply_policy(builder: &mut ModelBuilder, policy: &Policy, ctx: &PolicyContext<'_>) {
    let index = ctx.index;
    let capacity = ctx.capacity();

    for period in 0..index.periods {
        let mut expr = LinearExpr::default();
        for product in 0..index.products {
            expr.add_term(index.var(product, period), 1.0);
        }
        builder.add_constraint(
            ConstraintKind::PeriodCapacity { period },
            expr,
            Sense::Le,
            capacity,
        );
    }

    for product in 0..index.products {
        if !ctx.tiling.producible(product) {
            debug!(product, "product does not fit the substrate; production fixed at zero");
            for period in 0..index.periods {
                builder.set_upper(index.var(product, period), 0.0);
            }
        }
    }

    match policy {
        Policy::Unconstrained => {}
        Policy::MarketShare(thresholds) => add_market_floors(builder, thresholds, ctx),
        Policy::ProductShare(fraction) => add_product_floors(builder, *fraction, ctx),
    }
}

fn add_market_floors(builder: &mut ModelBuilder, thresholds: &MarketThresholds, ctx: &PolicyContext<'_>) {
    let index = ctx.index;
    for period in 0..index.periods {
        for market in Market::ALL {
            let members: Vec<usize> = (0..index.products)
                .filter(|&p| ctx.set.market_of(p) == market)
                .collect();
            let profitable = members
                .iter()
                .any(|&p| expected_unit_margin(ctx.set, ctx.tiling, p, period) > 0.0);
            if !profitable {
                debug!(%market, period, "no profitable product; market floor skipped");
                continue;
            }
            let mut expr = LinearExpr::default();
            for &p in &members {
                expr.add_term(index.var(p, period), 1.0);
            }
            builder.add_constraint(
                ConstraintKind::MarketFloor { market, period },
                expr,
                Sense::Ge,
                ctx.share_floor(thresholds.get(market)),
            );
        }
    }
}

fn add_product_floors(builder: &mut ModelBuilder, fraction: f64, ctx: &PolicyContext<'_>) {
    let index = ctx.index;
    let floor = ctx.share_floor(fraction);
    for product in (0..index.products).filter(|&p| ctx.tiling.producible(p)) {
        for period in RAMP_UP_PERIODS..index.periods {
            builder.add_constraint(
                ConstraintKind::ProductFloor { product, period },
                LinearExpr::term(index.var(product, period), 1.0),
                Sense::Ge,
                floor,
            );
        }
    }
}
