//! Zonotopes and their halfspace representation
//!
//! Obstacles are described as zonotopes `{c + G β : β ∈ [-1, 1]^m}`. The
//! obstacle constraints need them in `A x ≤ b` form, which is what
//! [`Zonotope::halfspaces`] produces.

use itertools::Itertools;
use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use super::hcat;
use crate::common::error::{RtdError, RtdResult};

/// Normals shorter than this are treated as degenerate and skipped
const NORMAL_EPS: f64 = 1e-12;

/// A zonotope given by its center and generator columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zonotope {
    center: DVector<f64>,
    generators: DMatrix<f64>,
}

impl Zonotope {
    pub fn new(center: DVector<f64>, generators: DMatrix<f64>) -> RtdResult<Self> {
        if generators.nrows() != center.len() {
            return Err(RtdError::dimension(
                "zonotope generators",
                center.len(),
                generators.nrows(),
            ));
        }
        Ok(Self { center, generators })
    }

    /// Axis-aligned box with the given half extents
    pub fn from_box(center: DVector<f64>, half_extents: &DVector<f64>) -> RtdResult<Self> {
        if half_extents.len() != center.len() {
            return Err(RtdError::dimension(
                "box half extents",
                center.len(),
                half_extents.len(),
            ));
        }
        let generators = DMatrix::from_diagonal(&half_extents.abs());
        Ok(Self { center, generators })
    }

    pub fn dim(&self) -> usize {
        self.center.len()
    }

    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    pub fn generators(&self) -> &DMatrix<f64> {
        &self.generators
    }

    /// Minkowski sum with an origin-centered zonotope given by `extra` generators
    pub fn buffered(&self, extra: &DMatrix<f64>) -> RtdResult<Self> {
        if extra.nrows() != self.dim() {
            return Err(RtdError::dimension(
                "buffer generators",
                self.dim(),
                extra.nrows(),
            ));
        }
        Ok(Self {
            center: self.center.clone(),
            generators: hcat(&self.generators, extra),
        })
    }

    /// Interval hull as (lower, upper)
    pub fn interval(&self) -> (DVector<f64>, DVector<f64>) {
        let radius = self.generators.abs().column_sum();
        (&self.center - &radius, &self.center + &radius)
    }

    /// Halfspace form `A x ≤ b` of this zonotope
    ///
    /// In 2-D there is one facet normal per generator and in 3-D one per
    /// generator pair. Axis-aligned supporting halfspaces are always added,
    /// so the result stays bounded for degenerate generator sets and is an
    /// interval hull in higher dimensions.
    pub fn halfspaces(&self) -> Halfspaces {
        let dim = self.dim();
        let mut normals: Vec<DVector<f64>> = Vec::new();

        match dim {
            2 => {
                for g in self.generators.column_iter() {
                    let n = DVector::from_vec(vec![-g[1], g[0]]);
                    let norm = n.norm();
                    if norm > NORMAL_EPS {
                        normals.push(n / norm);
                    }
                }
            }
            3 => {
                for (i, j) in (0..self.generators.ncols()).tuple_combinations() {
                    let gi = self.generators.column(i);
                    let gj = self.generators.column(j);
                    let a = Vector3::new(gi[0], gi[1], gi[2]);
                    let b = Vector3::new(gj[0], gj[1], gj[2]);
                    let n = a.cross(&b);
                    let norm = n.norm();
                    if norm > NORMAL_EPS {
                        normals.push(DVector::from_column_slice((n / norm).as_slice()));
                    }
                }
            }
            _ => {}
        }
        for axis in 0..dim {
            let mut e = DVector::zeros(dim);
            e[axis] = 1.0;
            normals.push(e);
        }

        let rows = 2 * normals.len();
        let mut a = DMatrix::zeros(rows, dim);
        let mut b = DVector::zeros(rows);
        for (idx, n) in normals.iter().enumerate() {
            let offset = n.dot(&self.center);
            let spread: f64 = (n.transpose() * &self.generators).abs().sum();
            a.row_mut(2 * idx).copy_from(&n.transpose());
            b[2 * idx] = offset + spread;
            a.row_mut(2 * idx + 1).copy_from(&(-n).transpose());
            b[2 * idx + 1] = -offset + spread;
        }
        Halfspaces { a, b }
    }
}

/// Polytope in halfspace form `A x ≤ b`
#[derive(Debug, Clone, PartialEq)]
pub struct Halfspaces {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
}

impl Halfspaces {
    pub fn len(&self) -> usize {
        self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    /// Largest signed distance `a_i·x - b_i` and the row attaining it
    ///
    /// A positive value means `x` lies outside the polytope.
    pub fn max_violation(&self, x: &DVector<f64>) -> (f64, usize) {
        let values = &self.a * x - &self.b;
        let mut best = (f64::NEG_INFINITY, 0);
        for (i, v) in values.iter().enumerate() {
            let v = if v.is_nan() { f64::NEG_INFINITY } else { *v };
            if v > best.0 {
                best = (v, i);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> Zonotope {
        Zonotope::from_box(DVector::from_vec(vec![0.0, 0.0]), &DVector::from_vec(vec![1.0, 1.0]))
            .unwrap()
    }

    #[test]
    fn test_box_halfspaces_contain_center() {
        let hs = unit_square().halfspaces();
        let (v, _) = hs.max_violation(&DVector::from_vec(vec![0.0, 0.0]));
        assert_relative_eq!(v, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_box_halfspaces_outside_point() {
        let hs = unit_square().halfspaces();
        let (v, idx) = hs.max_violation(&DVector::from_vec(vec![3.0, 0.5]));
        assert_relative_eq!(v, 2.0, epsilon = 1e-12);
        assert_relative_eq!(hs.a[(idx, 0)].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotated_zonotope_facets() {
        // diamond |x| + |y| <= 1
        let gens = DMatrix::from_row_slice(2, 2, &[0.5, 0.5, 0.5, -0.5]);
        let z = Zonotope::new(DVector::zeros(2), gens).unwrap();
        let hs = z.halfspaces();
        let (inside, _) = hs.max_violation(&DVector::from_vec(vec![0.4, 0.4]));
        let (outside, _) = hs.max_violation(&DVector::from_vec(vec![0.6, 0.6]));
        assert!(inside < 0.0);
        assert!(outside > 0.0);
    }

    #[test]
    fn test_3d_halfspaces() {
        let z = Zonotope::from_box(DVector::zeros(3), &DVector::from_vec(vec![1.0, 2.0, 3.0])).unwrap();
        let hs = z.halfspaces();
        assert!(hs.max_violation(&DVector::from_vec(vec![0.9, 1.9, 2.9])).0 < 0.0);
        assert!(hs.max_violation(&DVector::from_vec(vec![0.0, 0.0, 3.5])).0 > 0.0);
    }

    #[test]
    fn test_buffered_grows_interval() {
        let z = unit_square();
        let extra = DMatrix::from_row_slice(2, 1, &[0.5, 0.0]);
        let (lo, hi) = z.buffered(&extra).unwrap().interval();
        assert_relative_eq!(lo[0], -1.5, epsilon = 1e-12);
        assert_relative_eq!(hi[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dimension_checks() {
        assert!(Zonotope::new(DVector::zeros(2), DMatrix::zeros(3, 1)).is_err());
        assert!(unit_square().buffered(&DMatrix::zeros(3, 1)).is_err());
    }
}
