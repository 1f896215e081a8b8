//! Time-ordered sequence of adopted trajectories
//!
//! The embedding control loop adopts every trajectory the planner certifies
//! and keeps executing the last adopted one whenever planning yields nothing.

use log::warn;

use crate::common::{RobotState, RtdError, RtdResult, Trajectory};

#[derive(Debug)]
pub struct TrajectoryContainer {
    /// `start_times[i]` is when `trajectories[i]` becomes active
    start_times: Vec<f64>,
    trajectories: Vec<Box<dyn Trajectory>>,
}

impl TrajectoryContainer {
    /// Container whose fallback is `initial`, which must be valid
    pub fn new(initial: Box<dyn Trajectory>) -> RtdResult<Self> {
        initial.validate().map_err(|e| {
            RtdError::invalid_trajectory(format!("initial trajectory is invalid: {}", e))
        })?;
        Ok(TrajectoryContainer {
            start_times: vec![initial.start_time()],
            trajectories: vec![initial],
        })
    }

    /// Number of trajectories, the initial one included
    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// Start time of the most recently adopted trajectory
    pub fn last_start_time(&self) -> f64 {
        self.start_times.last().copied().unwrap_or(f64::NEG_INFINITY)
    }

    /// Drop every adopted trajectory, keeping the initial one
    pub fn clear(&mut self) {
        self.start_times.truncate(1);
        self.trajectories.truncate(1);
    }

    /// Adopt `trajectory` from its start time on
    ///
    /// Invalid trajectories and trajectories starting before the last
    /// adopted one are rejected: with `error_if_invalid` as an error,
    /// otherwise with a warning and `Ok(false)`.
    pub fn set_trajectory(&mut self, trajectory: Box<dyn Trajectory>, error_if_invalid: bool) -> RtdResult<bool> {
        let reason = match trajectory.validate() {
            Err(e) => Some(format!("trajectory is invalid: {}", e)),
            Ok(()) if trajectory.start_time() < self.last_start_time() => Some(format!(
                "trajectory starts at {} before the last trajectory at {}",
                trajectory.start_time(),
                self.last_start_time()
            )),
            Ok(()) => None,
        };

        match reason {
            None => {
                self.start_times.push(trajectory.start_time());
                self.trajectories.push(trajectory);
                Ok(true)
            }
            Some(reason) if error_if_invalid => Err(RtdError::invalid_trajectory(reason)),
            Some(reason) => {
                warn!("Rejected trajectory: {}", reason);
                Ok(false)
            }
        }
    }

    /// Trajectory active at `time`
    pub fn active(&self, time: f64) -> &dyn Trajectory {
        let idx = self
            .start_times
            .iter()
            .rposition(|&start| start <= time)
            .unwrap_or(0);
        self.trajectories[idx].as_ref()
    }

    pub fn get_command(&self, time: f64) -> RtdResult<RobotState> {
        self.active(time).get_command(time)
    }

    pub fn get_commands(&self, times: &[f64]) -> RtdResult<Vec<RobotState>> {
        times.iter().map(|&t| self.get_command(t)).collect()
    }
}
