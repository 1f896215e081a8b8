//! Waypoint-tracking objective for arm trajectories

use std::sync::Arc;

use nalgebra::DVector;

use crate::common::{
    Objective, ObjectiveEval, ObjectiveFn, ProblemInstances, RobotState, RtdError, RtdResult, Trajectory,
    TrajectoryFactory,
};
use crate::trajopt::TrajOptProps;

/// Squared distance to the waypoint at `time_for_cost` after the start
///
/// The trajectory used for the cost comes from the same factory that builds
/// the final trajectory, so both share their kinematics.
pub struct GenericArmObjective {
    trajectory_factory: Arc<dyn TrajectoryFactory>,
    t_cost: f64,
}

impl GenericArmObjective {
    pub fn new(traj_opt_props: &TrajOptProps, trajectory_factory: Arc<dyn TrajectoryFactory>) -> Self {
        GenericArmObjective {
            trajectory_factory,
            t_cost: traj_opt_props.time_for_cost(),
        }
    }

    pub fn time_for_cost(&self) -> f64 {
        self.t_cost
    }

    fn eval_trajectory(
        trajectory: &mut dyn Trajectory,
        params: &DVector<f64>,
        q_des: &DVector<f64>,
        t_cost: f64,
    ) -> RtdResult<f64> {
        trajectory.set_parameters(params)?;
        let plan = trajectory.get_command(t_cost)?;
        Ok((plan.position() - q_des).norm_squared())
    }
}

impl Objective for GenericArmObjective {
    fn gen_objective(
        &self,
        robot_state: &RobotState,
        waypoint: &DVector<f64>,
        rs_instances: &ProblemInstances,
    ) -> RtdResult<ObjectiveFn> {
        if waypoint.len() != robot_state.num_joints() {
            return Err(RtdError::dimension("waypoint", robot_state.num_joints(), waypoint.len()));
        }
        let mut trajectory = self
            .trajectory_factory
            .create_trajectory(robot_state, Some(rs_instances), None)?;
        let q_des = waypoint.clone();
        let t_cost = robot_state.time() + self.t_cost;

        Ok(Box::new(move |params: &DVector<f64>| -> RtdResult<ObjectiveEval> {
            let cost = Self::eval_trajectory(trajectory.as_mut(), params, &q_des, t_cost)?;
            Ok(ObjectiveEval { cost, gradient: None })
        }))
    }
}
