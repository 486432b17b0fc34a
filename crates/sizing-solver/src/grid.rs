//! Expected-NPV sweep over a grid of substrate sizes.
//!
//! Cells are independent evaluations sharing the read-only scenario set.
//! A cell that fails is recorded and the sweep moves on; only
//! cancellation stops it.

use serde::{Deserialize, Serialize};
use sizing_core::{ScenarioSet, Substrate};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use tracing::{info, warn};

use crate::config::{ConfigError, SolverConfig};
use crate::engine::{solve, CancelToken, EngineError, EvaluationRequest};
use crate::policy::Policy;

/// Evenly spaced candidate lengths: `start + step * i` for `i < count`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridAxis {
    pub start: f64,
    pub step: f64,
    pub count: usize,
}

impl GridAxis {
    /// Substrate widths 1.00 to 1.85 m.
    pub const DEFAULT_WIDTHS: GridAxis = GridAxis {
        start: 1.0,
        step: 0.05,
        count: 18,
    };
    /// Substrate heights 1.00 to 1.55 m.
    pub const DEFAULT_HEIGHTS: GridAxis = GridAxis {
        start: 1.0,
        step: 0.05,
        count: 12,
    };

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.start.is_finite() || self.start <= 0.0 {
            return Err(ConfigError::InvalidAxis(format!("start = {}", self.start)));
        }
        if !self.step.is_finite() || self.step < 0.0 {
            return Err(ConfigError::InvalidAxis(format!("step = {}", self.step)));
        }
        if self.count == 0 {
            return Err(ConfigError::InvalidAxis("count = 0".to_string()));
        }
        Ok(())
    }

    pub fn values(&self) -> Vec<f64> {
        // Multiplied, not accumulated, to avoid drift.
        (0..self.count)
            .map(|i| self.start + self.step * i as f64)
            .collect()
    }
}

/// Outcome of one grid cell.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridCell {
    Npv { value: f64, negative_scenarios: usize },
    /// No plan satisfies the policy at this size.
    Infeasible,
    Failed { reason: String },
}

impl GridCell {
    pub fn npv(&self) -> Option<f64> {
        match self {
            GridCell::Npv { value, .. } => Some(*value),
            _ => None,
        }
    }

    fn csv_field(&self) -> String {
        match self {
            GridCell::Npv { value, .. } => value.to_string(),
            GridCell::Infeasible => "infeasible".to_string(),
            GridCell::Failed { .. } => "failed".to_string(),
        }
    }
}

/// Rows are heights, columns are widths.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NpvGrid {
    pub widths: Vec<f64>,
    pub heights: Vec<f64>,
    /// `cells[height][width]`.
    pub cells: Vec<Vec<GridCell>>,
}

impl NpvGrid {
    pub fn shape(&self) -> (usize, usize) {
        (self.heights.len(), self.widths.len())
    }

    /// Substrate and expected NPV of the best feasible cell. Ties keep the first in row order.
    pub fn best(&self) -> Option<(Substrate, f64)> {
        let mut best: Option<(Substrate, f64)> = None;
        for (h, row) in self.heights.iter().zip(&self.cells) {
            for (w, cell) in self.widths.iter().zip(row) {
                if let Some(v) = cell.npv() {
                    if best.map_or(true, |(_, b)| v > b) {
                        best = Some((Substrate::new(*w, *h), v));
                    }
                }
            }
        }
        best
    }

    /// Header row of widths, then one row per height led by that height.
    pub fn write_csv<W: io::Write>(&self, out: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(out);
        let mut header = vec!["height\\width".to_string()];
        header.extend(self.widths.iter().map(|w| format!("{w:.2}")));
        writer.write_record(&header)?;
        for (h, row) in self.heights.iter().zip(&self.cells) {
            let mut record = vec![format!("{h:.2}")];
            record.extend(row.iter().map(GridCell::csv_field));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn evaluate_cell(
    set: &ScenarioSet,
    substrate: Substrate,
    policy: &Policy,
    config: &SolverConfig,
    cancel: &CancelToken,
) -> Result<GridCell, EngineError> {
    let request = EvaluationRequest {
        substrate,
        policy: policy.clone(),
        verbose: false,
    };
    match solve(set, &request, config, cancel) {
        Ok(solved) => {
            let negative_scenarios = solved
                .financials
                .scenarios()
                .iter()
                .filter(|l| l.total_npv.evaluate(&solved.plan) < 0.0)
                .count();
            Ok(GridCell::Npv {
                value: solved.objective,
                negative_scenarios,
            })
        }
        Err(e @ EngineError::Cancelled { .. }) => Err(e),
        Err(e) if e.is_infeasible() => {
            info!(%substrate, "no feasible plan");
            Ok(GridCell::Infeasible)
        }
        Err(e) => {
            warn!(%substrate, error = %e, "cell failed");
            Ok(GridCell::Failed {
                reason: e.to_string(),
            })
        }
    }
}

/// Evaluate every `(width, height)` pair under one policy.
///
/// Uses `config.workers` scoped threads pulling cells from a shared counter.
pub fn sweep(
    set: &ScenarioSet,
    widths: &GridAxis,
    heights: &GridAxis,
    policy: &Policy,
    config: &SolverConfig,
    cancel: &CancelToken,
) -> Result<NpvGrid, EngineError> {
    widths.validate()?;
    heights.validate()?;
    config.time_limit()?;
    let ws = widths.values();
    let hs = heights.values();
    let total = ws.len() * hs.len();
    let workers = config.workers.clamp(1, total);
    info!(cells = total, workers, %policy, "grid sweep started");

    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<Option<GridCell>>> = Mutex::new(vec![None; total]);
    let worker_error = |substrate: Option<Substrate>, message: &str| EngineError::Worker {
        substrate,
        policy: policy.to_string(),
        message: message.to_string(),
    };
    let worker = || -> Result<(), EngineError> {
        loop {
            let i = next.fetch_add(1, Ordering::Relaxed);
            if i >= total {
                return Ok(());
            }
            let substrate = Substrate::new(ws[i % ws.len()], hs[i / ws.len()]);
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    substrate,
                    policy: policy.to_string(),
                });
            }
            let cell = evaluate_cell(set, substrate, policy, config, cancel)?;
            results
                .lock()
                .map_err(|_| worker_error(Some(substrate), "result lock poisoned"))?[i] = Some(cell);
        }
    };

    if workers == 1 {
        worker()?;
    } else {
        thread::scope(|scope| -> Result<(), EngineError> {
            let handles: Vec<_> = (0..workers).map(|_| scope.spawn(&worker)).collect();
            for handle in handles {
                handle
                    .join()
                    .map_err(|_| worker_error(None, "grid worker panicked"))??;
            }
            Ok(())
        })?;
    }

    let flat = results
        .into_inner()
        .map_err(|_| worker_error(None, "result lock poisoned"))?;
    let mut cells = Vec::with_capacity(hs.len());
    let mut flat = flat.into_iter();
    for _ in 0..hs.len() {
        let row: Vec<GridCell> = flat
            .by_ref()
            .take(ws.len())
            .map(|c| {
                c.unwrap_or_else(|| GridCell::Failed {
                    reason: "not evaluated".to_string(),
                })
            })
            .collect();
        cells.push(row);
    }
    let grid = NpvGrid {
        widths: ws,
        heights: hs,
        cells,
    };
    if let Some((substrate, npv)) = grid.best() {
        info!(%substrate, npv, "grid sweep finished");
    } else {
        warn!("grid sweep found no feasible cell");
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_axes_match_driver_grid() {
        let w = GridAxis::DEFAULT_WIDTHS.values();
        let h = GridAxis::DEFAULT_HEIGHTS.values();
        assert_eq!(w.len(), 18);
        assert_eq!(h.len(), 12);
        assert!((w[17] - 1.85).abs() < 1e-9);
        assert!((h[11] - 1.55).abs() < 1e-9);
    }

    #[test]
    fn axis_validation() {
        let bad = GridAxis {
            start: 0.0,
            step: 0.1,
            count: 3,
        };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidAxis(_))));
        let empty = GridAxis {
            start: 1.0,
            step: 0.1,
            count: 0,
        };
        assert!(empty.validate().is_err());
        assert!(GridAxis::DEFAULT_WIDTHS.validate().is_ok());
    }

    #[test]
    fn best_skips_non_numeric_cells() {
        let grid = NpvGrid {
            widths: vec![1.0, 2.0],
            heights: vec![1.0],
            cells: vec![vec![
                GridCell::Infeasible,
                GridCell::Npv {
                    value: 5.0,
                    negative_scenarios: 0,
                },
            ]],
        };
        assert_eq!(grid.best(), Some((Substrate::new(2.0, 1.0), 5.0)));
        assert_eq!(grid.shape(), (1, 2));
    }

    #[test]
    fn csv_layout() {
        let grid = NpvGrid {
            widths: vec![1.0, 1.05],
            heights: vec![1.0, 1.05],
            cells: vec![
                vec![
                    GridCell::Npv {
                        value: 1.5,
                        negative_scenarios: 0,
                    },
                    GridCell::Infeasible,
                ],
                vec![
                    GridCell::Failed {
                        reason: "boom".to_string(),
                    },
                    GridCell::Npv {
                        value: -2.0,
                        negative_scenarios: 1,
                    },
                ],
            ],
        };
        let mut out = Vec::new();
        grid.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "height\\width,1.00,1.05\n1.00,1.5,infeasible\n1.05,failed,-2\n"
        );
    }

    #[test]
    fn worker_errors_name_the_cell() {
        let at_cell = EngineError::Worker {
            substrate: Some(Substrate::new(1.2, 1.1)),
            policy: "unconstrained".to_string(),
            message: "result lock poisoned".to_string(),
        };
        let text = at_cell.to_string();
        assert!(text.contains("unconstrained"));
        assert!(text.contains(&Substrate::new(1.2, 1.1).to_string()));

        let unknown = EngineError::Worker {
            substrate: None,
            policy: "unconstrained".to_string(),
            message: "grid worker panicked".to_string(),
        };
        assert_eq!(unknown.to_string(), "worker failed under unconstrained: grid worker panicked");
    }
}
