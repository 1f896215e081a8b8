//! Scalar bound constraints shared by the joint-limit and torque families

use nalgebra::{DMatrix, DVector};

use crate::common::{ConstraintEval, NlConstraint, RtdError, RtdResult};
use crate::sets::ParamZonotope;

/// Which side of a limit a bound enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSide {
    Upper,
    Lower,
}

/// Tight (sliceable) bound functions for one quantity
///
/// With the independent part of `set` folded into the center, the bounds
/// are `set + buf - max ≤ 0` and `min - (set - buf) ≤ 0`.
pub fn limit_bounds(set: &ParamZonotope, lower: f64, upper: f64) -> RtdResult<[(BoundSide, ParamZonotope); 2]> {
    if set.dim() != 1 {
        return Err(RtdError::dimension("bounded quantity", 1, set.dim()));
    }
    let buffer = set.independent_radius()[0];
    let tight = set.sliceable_part();
    let upper_bound = tight.offset(&DVector::from_element(1, buffer - upper))?;
    let lower_bound = tight.scale(-1.0).offset(&DVector::from_element(1, lower + buffer))?;
    Ok([(BoundSide::Upper, upper_bound), (BoundSide::Lower, lower_bound)])
}

/// Whether a bound can be violated anywhere in the parameter box
pub fn can_violate(bound: &ParamZonotope) -> bool {
    bound.interval().1[0] >= 0.0
}

/// Stack of affine scalar constraints `h_i(k) ≤ 0`
pub struct ScalarBoundConstraint {
    num_params: usize,
    jacobian: DMatrix<f64>,
    offsets: DVector<f64>,
}

impl ScalarBoundConstraint {
    /// Precompute `h(k) = offsets + J k` from 1-D affine sets
    pub fn new(bounds: &[ParamZonotope], num_params: usize) -> RtdResult<Self> {
        let mut jacobian = DMatrix::zeros(bounds.len(), num_params);
        let mut offsets = DVector::zeros(bounds.len());
        for (row, bound) in bounds.iter().enumerate() {
            if bound.dim() != 1 {
                return Err(RtdError::dimension("scalar bound", 1, bound.dim()));
            }
            offsets[row] = bound.center()[0];
            jacobian.row_mut(row).copy_from(&bound.slice_jacobian(num_params)?.row(0));
        }
        Ok(ScalarBoundConstraint {
            num_params,
            jacobian,
            offsets,
        })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

impl NlConstraint for ScalarBoundConstraint {
    fn evaluate(&self, k: &DVector<f64>) -> RtdResult<ConstraintEval> {
        if k.len() != self.num_params {
            return Err(RtdError::dimension("constraint parameters", self.num_params, k.len()));
        }
        let mut h = self.offsets.clone();
        h.gemv(1.0, &self.jacobian, k, 1.0);
        Ok(ConstraintEval::inequality(h, self.jacobian.clone()))
    }
}
