//! Zero-hold trajectory, the fail-safe fallback
//!
//! Holds the start position forever with zero velocity and acceleration,
//! ignoring any parameters it is given.

use nalgebra::DVector;

use super::relative_time;
use crate::common::{RobotState, RtdResult, Trajectory};
use crate::trajopt::TrajOptProps;

#[derive(Debug, Clone)]
pub struct ZeroHoldArmTrajectory {
    traj_opt_props: TrajOptProps,
    start_state: RobotState,
    trajectory_params: Option<DVector<f64>>,
}

impl ZeroHoldArmTrajectory {
    pub fn new(traj_opt_props: TrajOptProps, start_state: RobotState) -> Self {
        ZeroHoldArmTrajectory {
            traj_opt_props,
            start_state,
            trajectory_params: None,
        }
    }
}

impl Trajectory for ZeroHoldArmTrajectory {
    fn traj_opt_props(&self) -> &TrajOptProps {
        &self.traj_opt_props
    }

    fn trajectory_params(&self) -> Option<&DVector<f64>> {
        self.trajectory_params.as_ref()
    }

    fn start_state(&self) -> &RobotState {
        &self.start_state
    }

    fn validate(&self) -> RtdResult<()> {
        Ok(())
    }

    fn set_parameters(&mut self, trajectory_params: &DVector<f64>) -> RtdResult<()> {
        self.trajectory_params = Some(trajectory_params.clone());
        Ok(())
    }

    fn get_command(&self, time: f64) -> RtdResult<RobotState> {
        relative_time(&self.start_state, time, "ZeroHoldArmTrajectory")?;
        RobotState::at_rest(time, self.start_state.position().clone())
    }
}
