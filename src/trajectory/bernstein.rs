//! Degree-5 Bernstein trajectory
//!
//! Per joint, a quintic polynomial on `[0, horizonTime]` that starts at the
//! start state and ends at rest at `q0 + K`, with `K` the rescaled parameter.
//! The Bernstein coefficients are converted to a monomial basis once when the
//! parameters are set; commands are then Horner evaluations.

use nalgebra::DVector;

use super::polynomial::{bernstein_to_monomial, match_deg5_bernstein, Polynomial};
use super::relative_time;
use crate::common::{ParamBounds, RobotState, RtdError, RtdResult, Trajectory};
use crate::trajopt::TrajOptProps;

#[derive(Debug, Clone)]
pub struct BernsteinArmTrajectory {
    traj_opt_props: TrajOptProps,
    start_state: RobotState,
    input_range: ParamBounds,
    output_range: ParamBounds,
    trajectory_params: Option<DVector<f64>>,
    /// Monomial coefficients in normalized time `s = t / T`, one per joint
    alphas: Vec<Polynomial>,
    alpha_dots: Vec<Polynomial>,
    alpha_ddots: Vec<Polynomial>,
    q_end: DVector<f64>,
}

impl BernsteinArmTrajectory {
    pub fn new(
        traj_opt_props: TrajOptProps,
        start_state: RobotState,
        input_range: ParamBounds,
        output_range: ParamBounds,
    ) -> RtdResult<Self> {
        if output_range.len() != input_range.len() {
            return Err(RtdError::dimension("bernstein output range", input_range.len(), output_range.len()));
        }
        let n = start_state.num_joints();
        Ok(BernsteinArmTrajectory {
            traj_opt_props,
            start_state,
            input_range,
            output_range,
            trajectory_params: None,
            alphas: Vec::new(),
            alpha_dots: Vec::new(),
            alpha_ddots: Vec::new(),
            q_end: DVector::zeros(n),
        })
    }

    pub fn num_parameters(&self) -> usize {
        self.input_range.len()
    }

    /// Final positions, once parameterized
    pub fn end_position(&self) -> &DVector<f64> {
        &self.q_end
    }

    fn internal_update(&mut self, params: &DVector<f64>) -> RtdResult<()> {
        let offsets = self.input_range.map_to(&self.output_range, params)?;
        let horizon = self.traj_opt_props.horizon_time();
        let q0 = self.start_state.position();
        let qd0 = self.start_state.velocity();
        let qdd0 = self.start_state.acceleration();

        self.q_end = q0 + &offsets;
        self.alphas = (0..q0.len())
            .map(|j| {
                let beta = match_deg5_bernstein(q0[j], qd0[j], qdd0[j], self.q_end[j], 0.0, 0.0, horizon);
                Polynomial::new(bernstein_to_monomial(&beta))
            })
            .collect();
        self.alpha_dots = self.alphas.iter().map(Polynomial::derivative).collect();
        self.alpha_ddots = self.alpha_dots.iter().map(Polynomial::derivative).collect();
        Ok(())
    }
}

impl Trajectory for BernsteinArmTrajectory {
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
            .ok_or_else(|| RtdError::invalid_trajectory("BernsteinArmTrajectory has no parameters"))?;
        if params.len() != self.num_parameters() || self.start_state.num_joints() != params.len() {
            return Err(RtdError::invalid_trajectory(format!(
                "BernsteinArmTrajectory has {} parameters, expected {} for {} joints",
                params.len(),
                self.num_parameters(),
                self.start_state.num_joints()
            )));
        }
        if self.alphas.len() != params.len() {
            return Err(RtdError::invalid_trajectory("BernsteinArmTrajectory was not updated"));
        }
        Ok(())
    }

    fn set_parameters(&mut self, trajectory_params: &DVector<f64>) -> RtdResult<()> {
        if trajectory_params.len() != self.num_parameters() {
            return Err(RtdError::invalid_trajectory(format!(
                "BernsteinArmTrajectory expects {} parameters, got {}",
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
        let rel = relative_time(&self.start_state, time, "BernsteinArmTrajectory")?;
        let horizon = self.traj_opt_props.horizon_time();
        let n = self.alphas.len();

        if rel >= horizon {
            return RobotState::new(time, self.q_end.clone(), DVector::zeros(n), DVector::zeros(n));
        }

        let s = rel / horizon;
        let mut q = DVector::zeros(n);
        let mut qd = DVector::zeros(n);
        let mut qdd = DVector::zeros(n);
        for j in 0..n {
            q[j] = self.alphas[j].eval(s);
            qd[j] = self.alpha_dots[j].eval(s) / horizon;
            qdd[j] = self.alpha_ddots[j].eval(s) / (horizon * horizon);
        }
        RobotState::new(time, q, qd, qdd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn start() -> RobotState {
        RobotState::new(
            0.5,
            DVector::from_vec(vec![0.2, -1.0]),
            DVector::from_vec(vec![0.4, 0.1]),
            DVector::from_vec(vec![-0.3, 0.6]),
        )
        .unwrap()
    }

    fn trajectory() -> BernsteinArmTrajectory {
        let offset = std::f64::consts::PI / 36.0;
        BernsteinArmTrajectory::new(
            TrajOptProps::default(),
            start(),
            ParamBounds::uniform(2, -1.0, 1.0).unwrap(),
            ParamBounds::uniform(2, -offset, offset).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_matches_start_state() {
        let mut traj = trajectory();
        traj.set_parameters(&DVector::from_vec(vec![0.4, -0.7])).unwrap();
        let cmd = traj.get_command(0.5).unwrap();
        for j in 0..2 {
            assert_relative_eq!(cmd.position()[j], start().position()[j], epsilon = 1e-12);
            assert_relative_eq!(cmd.velocity()[j], start().velocity()[j], epsilon = 1e-12);
            assert_relative_eq!(cmd.acceleration()[j], start().acceleration()[j], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_ends_at_rest() {
        let mut traj = trajectory();
        traj.set_parameters(&DVector::from_vec(vec![1.0, -1.0])).unwrap();
        let offset = std::f64::consts::PI / 36.0;

        let before = traj.get_command(1.5 - 1e-12).unwrap();
        assert_relative_eq!(before.velocity()[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(before.acceleration()[1], 0.0, epsilon = 1e-9);

        let end = traj.get_command(1.5).unwrap();
        assert_relative_eq!(end.position()[0], 0.2 + offset, epsilon = 1e-12);
        assert_relative_eq!(end.position()[1], -1.0 - offset, epsilon = 1e-12);
        assert_eq!(end.velocity(), &DVector::zeros(2));
        assert_relative_eq!(before.position()[0], end.position()[0], epsilon = 1e-9);
    }

    #[test]
    fn test_derivatives_follow_parameters() {
        let mut traj = trajectory();
        traj.set_parameters(&DVector::from_vec(vec![0.4, -0.7])).unwrap();
        traj.set_parameters(&DVector::from_vec(vec![-0.9, 0.3])).unwrap();
        for j in 0..2 {
            assert_eq!(traj.alpha_dots[j], traj.alphas[j].derivative());
            assert_eq!(traj.alpha_ddots[j], traj.alphas[j].derivative().derivative());
        }

        let h = 1e-6;
        let mid = traj.get_command(1.0).unwrap();
        let ahead = traj.get_command(1.0 + h).unwrap();
        let behind = traj.get_command(1.0 - h).unwrap();
        for j in 0..2 {
            let qd = (ahead.position()[j] - behind.position()[j]) / (2.0 * h);
            let qdd = (ahead.velocity()[j] - behind.velocity()[j]) / (2.0 * h);
            assert_relative_eq!(mid.velocity()[j], qd, epsilon = 1e-6);
            assert_relative_eq!(mid.acceleration()[j], qdd, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_invalid_until_parameterized() {
        let traj = trajectory();
        assert!(matches!(traj.get_command(1.0), Err(RtdError::InvalidTrajectory(_))));
    }

    #[test]
    fn test_time_before_start_is_invalid() {
        let mut traj = trajectory();
        traj.set_parameters(&DVector::zeros(2)).unwrap();
        assert!(traj.get_command(0.4).is_err());
    }
}
