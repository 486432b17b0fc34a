//! Solver and policy configuration, loadable from YAML.

use serde::{Deserialize, Serialize};
use sizing_core::Market;
use sizing_econ::DiscountConvention;
use std::time::Duration;
use thiserror::Error;

use crate::policy::{Policy, PolicyParams};

/// Configuration errors: fatal, reported before any model is built.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Policy selector must be 1, 2 or 3.
    #[error("invalid policy selector {0}; expected 1, 2 or 3")]
    InvalidSelector(u8),
    /// MarketShare needs a threshold for every market.
    #[error("market share policy is missing a threshold for {0}")]
    MissingMarketThreshold(Market),
    /// ProductShare needs exactly one scalar threshold.
    #[error("product share policy requires a single product_threshold")]
    MissingProductThreshold,
    /// Thresholds are fractions of capacity.
    #[error("threshold for {what} = {value} is outside [0,1]")]
    ThresholdOutOfRange { what: String, value: f64 },
    /// Time limit must be a finite, non-negative number of seconds.
    #[error("invalid time limit {0}")]
    InvalidTimeLimit(f64),
    /// Grid axis must have a positive start and step and at least one point.
    #[error("invalid grid axis: {0}")]
    InvalidAxis(String),
    #[error("yaml error: {0}")]
    Yaml(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e.to_string())
    }
}

/// Which solving layer receives the built model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Integer program through `good_lp`.
    #[default]
    Lp,
    /// Closed-form per-period allocation.
    PeriodAllocation,
}

/// Knobs for one model build + solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub backend: BackendKind,
    /// Wall-clock limit for solving, in seconds. `None` waits forever.
    pub time_limit_secs: Option<f64>,
    /// On timeout, return the per-period allocation instead of failing.
    pub incumbent_fallback: bool,
    pub discount: DiscountConvention,
    /// Threads used by grid sweeps (1 = sequential).
    pub workers: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Lp,
            time_limit_secs: None,
            incumbent_fallback: true,
            discount: DiscountConvention::PeriodIndex,
            workers: 1,
        }
    }
}

impl SolverConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: SolverConfig = serde_yaml::from_str(text)?;
        cfg.time_limit()?;
        Ok(cfg)
    }

    /// Validated time limit.
    pub fn time_limit(&self) -> Result<Option<Duration>, ConfigError> {
        match self.time_limit_secs {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
            Some(secs) => Err(ConfigError::InvalidTimeLimit(secs)),
        }
    }
}

/// Driver-facing policy selection: a selector plus its parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// 1 = unconstrained, 2 = market share, 3 = product share.
    pub selector: u8,
    #[serde(flatten)]
    pub params: PolicyParams,
}

impl PolicyConfig {
    pub fn to_policy(&self) -> Result<Policy, ConfigError> {
        Policy::from_selector(self.selector, &self.params)
    }
}
