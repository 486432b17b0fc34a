//! How many product units fit on a substrate.

use serde::{Deserialize, Serialize};
use sizing_core::{ProductDims, ScenarioSet, Substrate};

use crate::EconError;

/// Placement of a product relative to the substrate axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Product width along substrate width.
    Native,
    /// Product turned a quarter: product height along substrate width.
    Rotated,
}

/// Grid of product units cut from one substrate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tiling {
    /// Units along the substrate width.
    pub columns: u64,
    /// Units along the substrate height.
    pub rows: u64,
    /// `columns * rows`.
    pub units: u64,
    pub orientation: Orientation,
}

fn check(label: &str, v: f64) -> Result<(), EconError> {
    if !v.is_finite() || v <= 0.0 {
        return Err(EconError::InvalidDimension(format!("{label} = {v}")));
    }
    Ok(())
}

fn fit(extent: f64, pitch: f64) -> u64 {
    // Both operands are positive and finite, so the quotient is too.
    (extent / pitch).floor() as u64
}

/// Maximum units of `dims` that tile `substrate`, trying both orientations.
///
/// Ties between orientations resolve to [`Orientation::Native`]. A product
/// larger than the substrate in both orientations yields zero units; that is
/// not an error.
///
/// Example:
/// let t = compute_tiling(ProductDims { height_m: 1.0, width_m: 0.5 }, Substrate::new(2.0, 1.0)).unwrap();
/// assert_eq!(t.units, 4);
pub fn compute_tiling(dims: ProductDims, substrate: Substrate) -> Result<Tiling, EconError> {
    check("product height", dims.height_m)?;
    check("product width", dims.width_m)?;
    check("substrate width", substrate.width_m)?;
    check("substrate height", substrate.height_m)?;

    let native = {
        let columns = fit(substrate.width_m, dims.width_m);
        let rows = fit(substrate.height_m, dims.height_m);
        Tiling {
            columns,
            rows,
            units: columns.saturating_mul(rows),
            orientation: Orientation::Native,
        }
    };
    let rotated = {
        let columns = fit(substrate.width_m, dims.height_m);
        let rows = fit(substrate.height_m, dims.width_m);
        Tiling {
            columns,
            rows,
            units: columns.saturating_mul(rows),
            orientation: Orientation::Rotated,
        }
    };
    if native.units >= rotated.units {
        Ok(native)
    } else {
        Ok(rotated)
    }
}

/// Tiling for every (scenario, product) pair at one substrate size.
#[derive(Clone, Debug)]
pub struct TilingTable {
    substrate: Substrate,
    products: usize,
    cells: Vec<Tiling>,
}

impl TilingTable {
    /// Tile every product of every scenario onto `substrate`.
    pub fn build(set: &ScenarioSet, substrate: Substrate) -> Result<Self, EconError> {
        let products = set.product_count();
        let mut cells = Vec::with_capacity(set.len() * products);
        for scenario in set.iter() {
            for product in &scenario.products {
                cells.push(compute_tiling(product.dims, substrate)?);
            }
        }
        Ok(Self {
            substrate,
            products,
            cells,
        })
    }

    pub fn substrate(&self) -> Substrate {
        self.substrate
    }

    /// Number of scenarios covered.
    pub fn scenario_count(&self) -> usize {
        if self.products == 0 {
            0
        } else {
            self.cells.len() / self.products
        }
    }

    pub fn product_count(&self) -> usize {
        self.products
    }

    pub fn get(&self, scenario: usize, product: usize) -> Tiling {
        self.cells[scenario * self.products + product]
    }

    /// Units per substrate as a coefficient.
    pub fn units(&self, scenario: usize, product: usize) -> f64 {
        self.get(scenario, product).units as f64
    }

    /// True when the product fits at least once in some scenario.
    pub fn producible(&self, product: usize) -> bool {
        (0..self.scenario_count()).any(|s| self.get(s, product).units > 0)
    }
}
