//! Piecewise-acceleration trajectory
//!
//! Each joint accelerates at a constant rate, chosen by the parameter, until
//! the plan time and then brakes linearly so that it comes to rest exactly at
//! the horizon time. After the horizon the final position is held.
//!
//! With `planTime == horizonTime` there is no braking phase: position stays
//! continuous but the velocity drops from its peak to zero at the horizon.

use nalgebra::DVector;

use super::relative_time;
use crate::common::{ParamBounds, RobotState, RtdError, RtdResult, Trajectory};
use crate::trajopt::TrajOptProps;

/// Closed-form values precomputed when the parameters are set
#[derive(Debug, Clone)]
struct PiecewiseCoefficients {
    q_ddot: DVector<f64>,
    q_peak: DVector<f64>,
    q_dot_peak: DVector<f64>,
    q_ddot_to_stop: DVector<f64>,
    q_end: DVector<f64>,
}

#[derive(Debug, Clone)]
pub struct PiecewiseArmTrajectory {
    traj_opt_props: TrajOptProps,
    start_state: RobotState,
    input_range: ParamBounds,
    output_range: ParamBounds,
    trajectory_params: Option<DVector<f64>>,
    coefficients: Option<PiecewiseCoefficients>,
}

impl PiecewiseArmTrajectory {
    /// `input_range` and `output_range` define the map from the optimization
    /// parameter to the actual joint accelerations
    pub fn new(
        traj_opt_props: TrajOptProps,
        start_state: RobotState,
        input_range: ParamBounds,
        output_range: ParamBounds,
    ) -> RtdResult<Self> {
        if output_range.len() != input_range.len() {
            return Err(RtdError::dimension("piecewise output range", input_range.len(), output_range.len()));
        }
        Ok(PiecewiseArmTrajectory {
            traj_opt_props,
            start_state,
            input_range,
            output_range,
            trajectory_params: None,
            coefficients: None,
        })
    }

    pub fn num_parameters(&self) -> usize {
        self.input_range.len()
    }

    /// Actual per-joint accelerations, once parameterized
    pub fn accelerations(&self) -> Option<&DVector<f64>> {
        self.coefficients.as_ref().map(|c| &c.q_ddot)
    }

    fn internal_update(&mut self, params: &DVector<f64>) -> RtdResult<()> {
        let q_ddot = self.input_range.map_to(&self.output_range, params)?;
        let plan = self.traj_opt_props.plan_time();
        let brake = self.traj_opt_props.horizon_time() - plan;
        let q0 = self.start_state.position();
        let qd0 = self.start_state.velocity();

        let q_peak = q0 + qd0 * plan + &q_ddot * (0.5 * plan * plan);
        let q_dot_peak = qd0 + &q_ddot * plan;
        let q_ddot_to_stop = if brake > 0.0 {
            -&q_dot_peak / brake
        } else {
            DVector::zeros(q_ddot.len())
        };
        let q_end = &q_peak + &q_dot_peak * brake + &q_ddot_to_stop * (0.5 * brake * brake);

        self.coefficients = Some(PiecewiseCoefficients {
            q_ddot,
            q_peak,
            q_dot_peak,
            q_ddot_to_stop,
            q_end,
        });
        Ok(())
    }
}

impl Trajectory for PiecewiseArmTrajectory {
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
        let params = self
            .trajectory_params
            .as_ref()
            .ok_or_else(|| RtdError::invalid_trajectory("PiecewiseArmTrajectory has no parameters"))?;
        if params.len() != self.num_parameters() {
            return Err(RtdError::invalid_trajectory(format!(
                "PiecewiseArmTrajectory expects {} parameters, got {}",
                self.num_parameters(),
                params.len()
            )));
        }
        if self.start_state.num_joints() != params.len() {
            return Err(RtdError::invalid_trajectory(format!(
                "PiecewiseArmTrajectory has {} parameters for {} joints",
                params.len(),
                self.start_state.num_joints()
            )));
        }
        if self.coefficients.is_none() {
            return Err(RtdError::invalid_trajectory("PiecewiseArmTrajectory was not updated"));
        }
        Ok(())
    }

    fn set_parameters(&mut self, trajectory_params: &DVector<f64>) -> RtdResult<()> {
        if trajectory_params.len() != self.num_parameters() {
            return Err(RtdError::invalid_trajectory(format!(
                "PiecewiseArmTrajectory expects {} parameters, got {}",
                self.num_parameters(),
                trajectory_params.len()
            )));
        }
        self.internal_update(trajectory_params)?;
        self.trajectory_params = Some(trajectory_params.clone());
        Ok(())
    }

    fn get_command(&self, time: f64) -> RtdResult<RobotState> {
        self.validate()?;
        let rel = relative_time(&self.start_state, time, "PiecewiseArmTrajectory")?;
        let c = self
            .coefficients
            .as_ref()
            .ok_or_else(|| RtdError::invalid_trajectory("PiecewiseArmTrajectory was not updated"))?;
        let plan = self.traj_opt_props.plan_time();
        let horizon = self.traj_opt_props.horizon_time();
        let q0 = self.start_state.position();
        let qd0 = self.start_state.velocity();

        let (q, qd, qdd) = if rel < plan {
            (
                q0 + qd0 * rel + &c.q_ddot * (0.5 * rel * rel),
                qd0 + &c.q_ddot * rel,
                c.q_ddot.clone(),
            )
        } else if rel < horizon {
            let tau = rel - plan;
            (
                &c.q_peak + &c.q_dot_peak * tau + &c.q_ddot_to_stop * (0.5 * tau * tau),
                &c.q_dot_peak + &c.q_ddot_to_stop * tau,
                c.q_ddot_to_stop.clone(),
            )
        } else {
            let n = q0.len();
            (c.q_end.clone(), DVector::zeros(n), DVector::zeros(n))
        };
        RobotState::new(time, q, qd, qdd)
    }
}
