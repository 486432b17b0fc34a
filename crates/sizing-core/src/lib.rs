#![deny(warnings)]

//! Core domain models and invariants for substrate sizing.
//!
//! This crate defines the serializable scenario data consumed by the
//! optimization core, with validation helpers that guarantee the shape and
//! range invariants the model relies on. A [`ScenarioSet`] can only be
//! constructed from scenarios that agree on product indexing and period
//! labeling.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Months per planning period; capacity is quoted per month.
pub const MONTHS_PER_PERIOD: f64 = 12.0;
/// Day count used for the cash conversion cycle.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Market a product is sold into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    /// Notebook displays.
    #[serde(alias = "Notebook", alias = "notebooks")]
    Notebook,
    /// Desktop monitors.
    #[serde(alias = "Monitor", alias = "monitors")]
    Monitor,
    /// Television panels.
    #[serde(alias = "Television", alias = "televisions")]
    Television,
}

impl Market {
    /// Every market, in index order.
    pub const ALL: [Market; 3] = [Market::Notebook, Market::Monitor, Market::Television];

    /// Stable dense index in `0..3`.
    pub fn index(self) -> usize {
        match self {
            Market::Notebook => 0,
            Market::Monitor => 1,
            Market::Television => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Market::Notebook => "notebook",
            Market::Monitor => "monitor",
            Market::Television => "television",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Physical footprint of one product unit in meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductDims {
    /// Height in meters (> 0).
    pub height_m: f64,
    /// Width in meters (> 0).
    pub width_m: f64,
}

/// Candidate substrate size in meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Substrate {
    /// Width in meters (> 0).
    pub width_m: f64,
    /// Height in meters (> 0).
    pub height_m: f64,
}

impl Substrate {
    pub fn new(width_m: f64, height_m: f64) -> Self {
        Self { width_m, height_m }
    }

    /// Sheet area in m².
    pub fn area_m2(&self) -> f64 {
        self.width_m * self.height_m
    }
}

impl fmt::Display for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}m x {:.3}m", self.width_m, self.height_m)
    }
}

/// A catalog product as realized in one scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioProduct {
    /// Catalog name; identical across scenarios for the same index.
    pub name: String,
    /// Market label.
    pub market: Market,
    /// Sampled physical footprint.
    pub dims: ProductDims,
    /// Selling price per unit, one entry per period.
    pub prices: Vec<f64>,
}

/// Yield per market, one series per market indexed by period.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MarketYields {
    pub notebook: Vec<f64>,
    pub monitor: Vec<f64>,
    pub television: Vec<f64>,
}

impl MarketYields {
    pub fn series(&self, market: Market) -> &[f64] {
        match market {
            Market::Notebook => &self.notebook,
            Market::Monitor => &self.monitor,
            Market::Television => &self.television,
        }
    }
}

/// Scalar financial parameters of one scenario.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinancialParams {
    /// Maximum substrates processed per month (> 0).
    pub max_capacity: f64,
    /// R&D expense as a fraction of sales, in [0,1].
    pub rd_rate: f64,
    /// SG&A expense as a fraction of sales, in [0,1].
    pub sga_rate: f64,
    /// Corporate tax rate, in [0,1).
    pub tax_rate: f64,
    /// Weighted average cost of capital (> -1).
    pub wacc: f64,
    /// Days payable outstanding (>= 0).
    pub dpo: f64,
    /// Days sales outstanding (>= 0).
    pub dso: f64,
    /// Days inventory outstanding (>= 0).
    pub dio: f64,
}

impl FinancialParams {
    /// Cash conversion cycle as a fraction of a year: (DIO + DSO - DPO) / 365.
    pub fn cash_conversion_cycle(&self) -> f64 {
        (self.dio + self.dso - self.dpo) / DAYS_PER_YEAR
    }

    /// Substrates available per period (monthly capacity x 12).
    pub fn period_capacity(&self) -> f64 {
        self.max_capacity * MONTHS_PER_PERIOD
    }
}

/// One sampled realization of every uncertain input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    /// Period labels (e.g. calendar years); index 0 is the first modeled period.
    pub periods: Vec<i32>,
    /// Products in catalog order.
    pub products: Vec<ScenarioProduct>,
    /// Sellable fraction per market and period.
    pub yields: MarketYields,
    /// Substrate cost per m², per period.
    pub substrate_cost: Vec<f64>,
    /// Investment outlay per period.
    pub investment: Vec<f64>,
    /// Aggregated depreciation charge per period. May be left empty in
    /// input files and derived from `investment`.
    #[serde(default)]
    pub depreciation: Vec<f64>,
    /// Scalar parameters.
    pub params: FinancialParams,
}

impl Scenario {
    /// Number of modeled periods.
    pub fn horizon(&self) -> usize {
        self.periods.len()
    }

    /// Price of `product` in `period`.
    pub fn price(&self, product: usize, period: usize) -> f64 {
        self.products[product].prices[period]
    }

    /// Yield applying to `product` in `period`, looked up through its market.
    pub fn product_yield(&self, product: usize, period: usize) -> f64 {
        self.yields.series(self.products[product].market)[period]
    }
}

/// Validation errors for scenario invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A scenario collection must hold at least one scenario.
    #[error("scenario collection is empty")]
    EmptyScenarioSet,
    /// A scenario must list at least one product.
    #[error("scenario has no products")]
    NoProducts,
    /// A scenario must model at least one period.
    #[error("scenario has no periods")]
    EmptyHorizon,
    /// Numeric field must be finite.
    #[error("non-finite value in {0}")]
    NonFinite(String),
    /// Product dimensions must be strictly positive.
    #[error("product {0} has a non-positive dimension")]
    NonPositiveDimension(String),
    /// Price or cost must be non-negative.
    #[error("negative monetary value in {0}")]
    NegativeMoney(String),
    /// Yield must be within [0, 1].
    #[error("yield for {market} in period {period} must be within [0,1]")]
    InvalidYield { market: Market, period: usize },
    /// Rate or day count outside its admissible range.
    #[error("{field} = {value} is out of range")]
    OutOfRange { field: &'static str, value: f64 },
    /// A per-period series does not match the horizon.
    #[error("series {series} has {found} entries, expected {expected}")]
    SeriesLength {
        series: String,
        expected: usize,
        found: usize,
    },
    /// Scenario disagrees with scenario 0 on products or periods.
    #[error("scenario {scenario} does not match scenario 0: {detail}")]
    ShapeMismatch { scenario: usize, detail: String },
    /// Depreciation period must be at least one period.
    #[error("depreciation period must be >= 1")]
    InvalidDepreciationPeriod,
}

fn check_series(name: &str, series: &[f64], horizon: usize) -> Result<(), ValidationError> {
    if series.len() != horizon {
        return Err(ValidationError::SeriesLength {
            series: name.to_string(),
            expected: horizon,
            found: series.len(),
        });
    }
    if series.iter().any(|v| !v.is_finite()) {
        return Err(ValidationError::NonFinite(name.to_string()));
    }
    if series.iter().any(|v| *v < 0.0) {
        return Err(ValidationError::NegativeMoney(name.to_string()));
    }
    Ok(())
}

fn check_range(field: &'static str, value: f64, ok: bool) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite(field.to_string()));
    }
    if !ok {
        return Err(ValidationError::OutOfRange { field, value });
    }
    Ok(())
}

/// Validate a product against the scenario horizon.
pub fn validate_product(p: &ScenarioProduct, horizon: usize) -> Result<(), ValidationError> {
    let d = p.dims;
    if !(d.height_m.is_finite() && d.width_m.is_finite()) {
        return Err(ValidationError::NonFinite(format!("{} dimensions", p.name)));
    }
    if d.height_m <= 0.0 || d.width_m <= 0.0 {
        return Err(ValidationError::NonPositiveDimension(p.name.clone()));
    }
    check_series(&format!("{} prices", p.name), &p.prices, horizon)
}

/// Validate scalar financial parameters.
pub fn validate_params(p: &FinancialParams) -> Result<(), ValidationError> {
    check_range("max_capacity", p.max_capacity, p.max_capacity > 0.0)?;
    check_range("rd_rate", p.rd_rate, (0.0..=1.0).contains(&p.rd_rate))?;
    check_range("sga_rate", p.sga_rate, (0.0..=1.0).contains(&p.sga_rate))?;
    check_range("tax_rate", p.tax_rate, (0.0..1.0).contains(&p.tax_rate))?;
    check_range("wacc", p.wacc, p.wacc > -1.0)?;
    check_range("dpo", p.dpo, p.dpo >= 0.0)?;
    check_range("dso", p.dso, p.dso >= 0.0)?;
    check_range("dio", p.dio, p.dio >= 0.0)?;
    Ok(())
}

/// Validate a single scenario in isolation.
pub fn validate_scenario(s: &Scenario) -> Result<(), ValidationError> {
    let horizon = s.horizon();
    if horizon == 0 {
        return Err(ValidationError::EmptyHorizon);
    }
    if s.products.is_empty() {
        return Err(ValidationError::NoProducts);
    }
    for p in &s.products {
        validate_product(p, horizon)?;
    }
    for market in Market::ALL {
        let series = s.yields.series(market);
        if series.len() != horizon {
            return Err(ValidationError::SeriesLength {
                series: format!("{market} yield"),
                expected: horizon,
                found: series.len(),
            });
        }
        for (period, y) in series.iter().enumerate() {
            if !y.is_finite() || !(0.0..=1.0).contains(y) {
                return Err(ValidationError::InvalidYield { market, period });
            }
        }
    }
    check_series("substrate_cost", &s.substrate_cost, horizon)?;
    check_series("investment", &s.investment, horizon)?;
    check_series("depreciation", &s.depreciation, horizon)?;
    validate_params(&s.params)
}

fn check_same_shape(index: usize, base: &Scenario, s: &Scenario) -> Result<(), ValidationError> {
    let mismatch = |detail: String| ValidationError::ShapeMismatch {
        scenario: index,
        detail,
    };
    if s.periods != base.periods {
        return Err(mismatch("period labels differ".to_string()));
    }
    if s.products.len() != base.products.len() {
        return Err(mismatch(format!(
            "{} products instead of {}",
            s.products.len(),
            base.products.len()
        )));
    }
    for (i, (a, b)) in base.products.iter().zip(&s.products).enumerate() {
        if a.name != b.name || a.market != b.market {
            return Err(mismatch(format!("product {i} is {} ({})", b.name, b.market)));
        }
    }
    Ok(())
}

/// Immutable, shape-consistent collection of scenarios indexed `0..S`.
///
/// Shared read-only between concurrent evaluations; nothing in the
/// optimization core mutates it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "Vec<Scenario>", into = "Vec<Scenario>")]
pub struct ScenarioSet {
    scenarios: Vec<Scenario>,
}

impl ScenarioSet {
    /// Validate every scenario and their mutual shape, then seal the set.
    pub fn new(scenarios: Vec<Scenario>) -> Result<Self, ValidationError> {
        let Some(base) = scenarios.first() else {
            return Err(ValidationError::EmptyScenarioSet);
        };
        for (i, s) in scenarios.iter().enumerate() {
            validate_scenario(s)?;
            check_same_shape(i, base, s)?;
        }
        tracing::debug!(
            scenarios = scenarios.len(),
            products = base.products.len(),
            periods = base.horizon(),
            "scenario set validated"
        );
        Ok(Self { scenarios })
    }

    /// Number of scenarios.
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Always false for a constructed set; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Number of products shared by every scenario.
    pub fn product_count(&self) -> usize {
        self.scenarios[0].products.len()
    }

    /// Number of periods shared by every scenario.
    pub fn horizon(&self) -> usize {
        self.scenarios[0].horizon()
    }

    /// Period labels shared by every scenario.
    pub fn period_labels(&self) -> &[i32] {
        &self.scenarios[0].periods
    }

    /// Product names in index order.
    pub fn product_names(&self) -> Vec<String> {
        self.scenarios[0]
            .products
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Market of product `p` (identical in every scenario).
    pub fn market_of(&self, product: usize) -> Market {
        self.scenarios[0].products[product].market
    }

    pub fn get(&self, scenario: usize) -> Option<&Scenario> {
        self.scenarios.get(scenario)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scenario> {
        self.scenarios.iter()
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }
}

impl TryFrom<Vec<Scenario>> for ScenarioSet {
    type Error = ValidationError;

    fn try_from(scenarios: Vec<Scenario>) -> Result<Self, Self::Error> {
        ScenarioSet::new(scenarios)
    }
}

impl From<ScenarioSet> for Vec<Scenario> {
    fn from(set: ScenarioSet) -> Self {
        set.scenarios
    }
}

/// Spread each period's investment evenly over `years` periods starting at
/// that period, summing overlapping schedules. Charges beyond the horizon are
/// dropped; the result has the same length as `investment`.
pub fn straight_line_depreciation(
    investment: &[f64],
    years: u32,
) -> Result<Vec<f64>, ValidationError> {
    if years == 0 {
        return Err(ValidationError::InvalidDepreciationPeriod);
    }
    let horizon = investment.len();
    let mut out = vec![0.0; horizon];
    for (start, outlay) in investment.iter().enumerate() {
        if !outlay.is_finite() {
            return Err(ValidationError::NonFinite("investment".to_string()));
        }
        let charge = outlay / f64::from(years);
        for slot in out.iter_mut().skip(start).take(years as usize) {
            *slot += charge;
        }
    }
    Ok(out)
}
