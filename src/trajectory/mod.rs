//! Parameterized arm trajectories
//!
//! A trajectory turns the parameter vector chosen by the optimizer into
//! per-joint position, velocity and acceleration commands, evaluated in
//! closed form.

pub mod polynomial;
pub mod profile;
pub mod zero_hold;
pub mod piecewise;
pub mod bernstein;
pub mod factory;
pub mod container;

pub use polynomial::*;
pub use profile::*;
pub use zero_hold::*;
pub use piecewise::*;
pub use bernstein::*;
pub use factory::*;
pub use container::*;

use crate::common::{RobotState, RtdError, RtdResult};

/// Time since the start state, failing for times before it
pub(crate) fn relative_time(start_state: &RobotState, time: f64, name: &str) -> RtdResult<f64> {
    if !time.is_finite() || time < start_state.time() {
        return Err(RtdError::invalid_trajectory(format!(
            "invalid time {} provided to {} starting at {}",
            time,
            name,
            start_state.time()
        )));
    }
    Ok(time - start_state.time())
}
