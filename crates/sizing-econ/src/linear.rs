//! Affine expressions over the production-quantity variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub};

/// Dense indexing of the `x[product, period]` decision variables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanIndex {
    pub products: usize,
    pub periods: usize,
}

impl PlanIndex {
    pub fn new(products: usize, periods: usize) -> Self {
        Self { products, periods }
    }

    /// Number of decision variables.
    pub fn len(&self) -> usize {
        self.products * self.periods
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Variable id of `x[product, period]`.
    pub fn var(&self, product: usize, period: usize) -> usize {
        product * self.periods + period
    }

    /// Inverse of [`PlanIndex::var`].
    pub fn split(&self, var: usize) -> (usize, usize) {
        (var / self.periods, var % self.periods)
    }
}

/// `constant + Σ coef * x[var]`, with terms kept in variable order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearExpr {
    constant: f64,
    terms: BTreeMap<usize, f64>,
}

impl LinearExpr {
    pub fn constant(value: f64) -> Self {
        Self {
            constant: value,
            terms: BTreeMap::new(),
        }
    }

    pub fn term(var: usize, coef: f64) -> Self {
        let mut e = Self::default();
        e.add_term(var, coef);
        e
    }

    pub fn add_term(&mut self, var: usize, coef: f64) {
        *self.terms.entry(var).or_insert(0.0) += coef;
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// `self += k * other`
    pub fn add_scaled(&mut self, other: &LinearExpr, k: f64) {
        self.constant += k * other.constant;
        for (&var, &coef) in &other.terms {
            self.add_term(var, k * coef);
        }
    }

    pub fn constant_part(&self) -> f64 {
        self.constant
    }

    pub fn coefficient(&self, var: usize) -> f64 {
        self.terms.get(&var).copied().unwrap_or(0.0)
    }

    pub fn terms(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.terms.iter().map(|(&v, &c)| (v, c))
    }

    /// Value at `values[var]`; missing variables count as zero.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms.iter().fold(self.constant, |acc, (&var, &coef)| {
            acc + coef * values.get(var).copied().unwrap_or(0.0)
        })
    }
}

impl Add for LinearExpr {
    type Output = LinearExpr;

    fn add(mut self, rhs: LinearExpr) -> LinearExpr {
        self.add_scaled(&rhs, 1.0);
        self
    }
}

impl Sub for LinearExpr {
    type Output = LinearExpr;

    fn sub(mut self, rhs: LinearExpr) -> LinearExpr {
        self.add_scaled(&rhs, -1.0);
        self
    }
}

impl Mul<f64> for LinearExpr {
    type Output = LinearExpr;

    fn mul(mut self, k: f64) -> LinearExpr {
        self.constant *= k;
        for coef in self.terms.values_mut() {
            *coef *= k;
        }
        self
    }
}

impl AddAssign<&LinearExpr> for LinearExpr {
    fn add_assign(&mut self, rhs: &LinearExpr) {
        self.add_scaled(rhs, 1.0);
    }
}

impl<'a> Sum<&'a LinearExpr> for LinearExpr {
    fn sum<I: Iterator<Item = &'a LinearExpr>>(iter: I) -> Self {
        iter.fold(LinearExpr::default(), |mut acc, e| {
            acc += e;
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_index_roundtrip() {
        let idx = PlanIndex::new(3, 4);
        assert_eq!(idx.len(), 12);
        assert_eq!(idx.var(2, 1), 9);
        assert_eq!(idx.split(9), (2, 1));
    }

    #[test]
    fn arithmetic_and_evaluation() {
        let a = LinearExpr::term(0, 2.0) + LinearExpr::constant(5.0);
        let b = LinearExpr::term(1, 3.0) + LinearExpr::term(0, 1.0);
        let e = (a.clone() - b) * 2.0;
        assert_eq!(e.coefficient(0), 2.0);
        assert_eq!(e.coefficient(1), -6.0);
        assert_eq!(e.constant_part(), 10.0);
        assert_eq!(e.evaluate(&[1.0, 1.0]), 6.0);

        let total: LinearExpr = [a.clone(), a].iter().sum();
        assert_eq!(total.evaluate(&[3.0]), 22.0);
    }
}
