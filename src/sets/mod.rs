//! Set representations consumed by the reachable set families
//!
//! The set-propagation numerics live outside this crate; these types are the
//! exchange format they produce and the constraint builders consume.

pub mod param_zonotope;
pub mod zonotope;

pub use param_zonotope::*;
pub use zonotope::*;

use nalgebra::DMatrix;

/// Horizontally concatenate two matrices with the same number of rows
pub(crate) fn hcat(left: &DMatrix<f64>, right: &DMatrix<f64>) -> DMatrix<f64> {
    debug_assert_eq!(left.nrows(), right.nrows());
    let rows = left.nrows();
    let mut out = DMatrix::zeros(rows, left.ncols() + right.ncols());
    out.columns_mut(0, left.ncols()).copy_from(left);
    out.columns_mut(left.ncols(), right.ncols()).copy_from(right);
    out
}
