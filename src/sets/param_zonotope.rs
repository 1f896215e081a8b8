//! Parameterized zonotopes
//!
//! A `ParamZonotope` over-approximates a quantity for every value of the
//! trajectory parameter `k ∈ [-1, 1]^n`:
//!
//! ```text
//! Z(k) = c + Σ_i g_i k[id_i] + Σ_j r_j ε_j,    ε_j ∈ [-1, 1]
//! ```
//!
//! The dependent generators `g_i` are "sliceable": fixing `k` collapses them
//! to a point, and their contribution is differentiable in `k`. The
//! independent generators `r_j` carry the remaining uncertainty (time
//! discretization, tracking error, linearization remainders) and can only be
//! bounded.

use nalgebra::{DMatrix, DVector};

use super::hcat;
use crate::common::error::{RtdError, RtdResult};

#[derive(Debug, Clone, PartialEq)]
pub struct ParamZonotope {
    center: DVector<f64>,
    dep_gens: DMatrix<f64>,
    dep_ids: Vec<usize>,
    indep_gens: DMatrix<f64>,
}

impl ParamZonotope {
    pub fn new(
        center: DVector<f64>,
        dep_gens: DMatrix<f64>,
        dep_ids: Vec<usize>,
        indep_gens: DMatrix<f64>,
    ) -> RtdResult<Self> {
        let dim = center.len();
        if dep_gens.nrows() != dim {
            return Err(RtdError::dimension("dependent generators", dim, dep_gens.nrows()));
        }
        if indep_gens.nrows() != dim {
            return Err(RtdError::dimension("independent generators", dim, indep_gens.nrows()));
        }
        if dep_ids.len() != dep_gens.ncols() {
            return Err(RtdError::dimension("dependent generator ids", dep_gens.ncols(), dep_ids.len()));
        }
        Ok(Self {
            center,
            dep_gens,
            dep_ids,
            indep_gens,
        })
    }

    /// A point set with no generators
    pub fn from_center(center: DVector<f64>) -> Self {
        let dim = center.len();
        Self {
            center,
            dep_gens: DMatrix::zeros(dim, 0),
            dep_ids: Vec::new(),
            indep_gens: DMatrix::zeros(dim, 0),
        }
    }

    /// One-dimensional set `c + Σ coeff·k[id] ± radius`
    pub fn scalar(center: f64, dependent: &[(usize, f64)], independent_radius: f64) -> Self {
        let dep_gens = DMatrix::from_row_slice(
            1,
            dependent.len(),
            &dependent.iter().map(|(_, g)| *g).collect::<Vec<_>>(),
        );
        let dep_ids = dependent.iter().map(|(id, _)| *id).collect();
        let indep_gens = if independent_radius > 0.0 {
            DMatrix::from_element(1, 1, independent_radius)
        } else {
            DMatrix::zeros(1, 0)
        };
        Self {
            center: DVector::from_element(1, center),
            dep_gens,
            dep_ids,
            indep_gens,
        }
    }

    pub fn dim(&self) -> usize {
        self.center.len()
    }

    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    pub fn dep_gens(&self) -> &DMatrix<f64> {
        &self.dep_gens
    }

    pub fn dep_ids(&self) -> &[usize] {
        &self.dep_ids
    }

    pub fn indep_gens(&self) -> &DMatrix<f64> {
        &self.indep_gens
    }

    /// Number of parameters this set depends on (largest id + 1)
    pub fn num_params(&self) -> usize {
        self.dep_ids.iter().max().map_or(0, |m| m + 1)
    }

    /// Evaluate the sliceable part at `k`
    pub fn slice(&self, k: &DVector<f64>) -> RtdResult<DVector<f64>> {
        if k.len() < self.num_params() {
            return Err(RtdError::dimension("slice parameters", self.num_params(), k.len()));
        }
        let mut out = self.center.clone();
        for (col, &id) in self.dep_gens.column_iter().zip(self.dep_ids.iter()) {
            out.axpy(k[id], &col, 1.0);
        }
        Ok(out)
    }

    /// Jacobian of [`slice`](Self::slice) with respect to `k` (`dim × n_params`)
    ///
    /// The set is affine in `k`, so the Jacobian does not depend on where it
    /// is evaluated.
    pub fn slice_jacobian(&self, n_params: usize) -> RtdResult<DMatrix<f64>> {
        if n_params < self.num_params() {
            return Err(RtdError::dimension("jacobian parameters", self.num_params(), n_params));
        }
        let mut jac = DMatrix::zeros(self.dim(), n_params);
        for (col, &id) in self.dep_gens.column_iter().zip(self.dep_ids.iter()) {
            let mut target = jac.column_mut(id);
            target += col;
        }
        Ok(jac)
    }

    /// Row-wise sum of absolute independent generators
    pub fn independent_radius(&self) -> DVector<f64> {
        if self.indep_gens.ncols() == 0 {
            return DVector::zeros(self.dim());
        }
        self.indep_gens.abs().column_sum()
    }

    /// Interval hull over all `k ∈ [-1, 1]^n` and all independent factors
    pub fn interval(&self) -> (DVector<f64>, DVector<f64>) {
        let mut radius = self.independent_radius();
        if self.dep_gens.ncols() > 0 {
            radius += self.dep_gens.abs().column_sum();
        }
        (&self.center - &radius, &self.center + &radius)
    }

    /// Dependent and independent generators side by side
    pub fn all_generators(&self) -> DMatrix<f64> {
        hcat(&self.dep_gens, &self.indep_gens)
    }

    /// Same set with the independent generators dropped
    pub fn sliceable_part(&self) -> Self {
        Self {
            center: self.center.clone(),
            dep_gens: self.dep_gens.clone(),
            dep_ids: self.dep_ids.clone(),
            indep_gens: DMatrix::zeros(self.dim(), 0),
        }
    }

    /// Reduce the independent generators to at most `order · dim` columns
    ///
    /// The largest `(order - 1) · dim` generators are kept and the rest are
    /// enclosed in an axis-aligned box. Dependent generators are untouched.
    /// Returns a new set; `self` is not modified.
    pub fn reduce_independent(&self, order: usize) -> Self {
        let dim = self.dim();
        let order = order.max(1);
        let n_indep = self.indep_gens.ncols();
        if n_indep <= order * dim {
            return self.clone();
        }

        let mut ranked: Vec<(f64, usize)> = self
            .indep_gens
            .column_iter()
            .enumerate()
            .map(|(i, g)| (g.norm(), i))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let n_keep = (order - 1) * dim;
        let mut reduced = DMatrix::zeros(dim, n_keep + dim);
        let mut boxed = DVector::zeros(dim);
        for (slot, &(_, i)) in ranked.iter().enumerate() {
            let g = self.indep_gens.column(i);
            if slot < n_keep {
                reduced.column_mut(slot).copy_from(&g);
            } else {
                boxed += g.abs();
            }
        }
        for d in 0..dim {
            reduced[(d, n_keep + d)] = boxed[d];
        }

        Self {
            center: self.center.clone(),
            dep_gens: self.dep_gens.clone(),
            dep_ids: self.dep_ids.clone(),
            indep_gens: reduced,
        }
    }

    /// Minkowski sum; parameters with the same id stay correlated
    pub fn add(&self, other: &Self) -> RtdResult<Self> {
        if other.dim() != self.dim() {
            return Err(RtdError::dimension("set sum", self.dim(), other.dim()));
        }
        let mut dep_ids = self.dep_ids.clone();
        dep_ids.extend_from_slice(&other.dep_ids);
        Ok(Self {
            center: &self.center + &other.center,
            dep_gens: hcat(&self.dep_gens, &other.dep_gens),
            dep_ids,
            indep_gens: hcat(&self.indep_gens, &other.indep_gens),
        })
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            center: &self.center * factor,
            dep_gens: &self.dep_gens * factor,
            dep_ids: self.dep_ids.clone(),
            indep_gens: &self.indep_gens * factor,
        }
    }

    pub fn offset(&self, shift: &DVector<f64>) -> RtdResult<Self> {
        if shift.len() != self.dim() {
            return Err(RtdError::dimension("set offset", self.dim(), shift.len()));
        }
        let mut out = self.clone();
        out.center += shift;
        Ok(out)
    }

    /// Append independent generators
    pub fn buffered(&self, extra: &DMatrix<f64>) -> RtdResult<Self> {
        if extra.nrows() != self.dim() {
            return Err(RtdError::dimension("buffer generators", self.dim(), extra.nrows()));
        }
        let mut out = self.clone();
        out.indep_gens = hcat(&self.indep_gens, extra);
        Ok(out)
    }
}
