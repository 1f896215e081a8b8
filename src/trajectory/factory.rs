//! Trajectory type tags and the arm trajectory factory

use std::fmt;
use std::str::FromStr;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::{BernsteinArmTrajectory, PiecewiseArmTrajectory, ZeroHoldArmTrajectory};
use crate::common::{
    ProblemInstances, ReachSetInstance, RobotState, RtdError, RtdResult, Trajectory, TrajectoryFactory,
};
use crate::reachsets::{JrsInstance, JRS_FAMILY};
use crate::trajopt::TrajOptProps;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryType {
    ZeroHold,
    Piecewise,
    Bernstein,
}

impl TrajectoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrajectoryType::ZeroHold => "zerohold",
            TrajectoryType::Piecewise => "piecewise",
            TrajectoryType::Bernstein => "bernstein",
        }
    }

    /// Whether building this type needs a joint reachable set instance
    pub fn needs_jrs(&self) -> bool {
        !matches!(self, TrajectoryType::ZeroHold)
    }
}

impl fmt::Display for TrajectoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrajectoryType {
    type Err = RtdError;

    fn from_str(s: &str) -> RtdResult<Self> {
        match s {
            "zerohold" => Ok(TrajectoryType::ZeroHold),
            "piecewise" => Ok(TrajectoryType::Piecewise),
            "bernstein" => Ok(TrajectoryType::Bernstein),
            other => Err(RtdError::config(format!(
                "trajectory type must be one of 'zerohold', 'piecewise' or 'bernstein', got '{}'",
                other
            ))),
        }
    }
}

/// Builds zero-hold, piecewise and Bernstein arm trajectories
///
/// The type is taken from an explicit override, else from the problem's
/// JRS instance, else from the factory default.
#[derive(Debug, Clone)]
pub struct ArmTrajectoryFactory {
    traj_opt_props: TrajOptProps,
    default_type: TrajectoryType,
}

impl ArmTrajectoryFactory {
    pub fn new(traj_opt_props: TrajOptProps, default_type: TrajectoryType) -> Self {
        ArmTrajectoryFactory {
            traj_opt_props,
            default_type,
        }
    }

    pub fn traj_opt_props(&self) -> &TrajOptProps {
        &self.traj_opt_props
    }

    pub fn default_type(&self) -> TrajectoryType {
        self.default_type
    }

    fn find_jrs(rs_instances: Option<&ProblemInstances>) -> Option<&JrsInstance> {
        rs_instances?
            .get(JRS_FAMILY)
            .and_then(|inst| inst.as_any().downcast_ref::<JrsInstance>())
    }

    /// Create a trajectory, optionally forcing its type
    pub fn create_typed(
        &self,
        robot_state: &RobotState,
        rs_instances: Option<&ProblemInstances>,
        trajectory_params: Option<&DVector<f64>>,
        traj_type: Option<TrajectoryType>,
    ) -> RtdResult<Box<dyn Trajectory>> {
        let jrs = Self::find_jrs(rs_instances);
        let traj_type = traj_type
            .or_else(|| jrs.map(|j| j.trajectory_type()))
            .unwrap_or(self.default_type);

        let mut trajectory: Box<dyn Trajectory> = match traj_type {
            TrajectoryType::ZeroHold => Box::new(ZeroHoldArmTrajectory::new(self.traj_opt_props, robot_state.clone())),
            TrajectoryType::Piecewise | TrajectoryType::Bernstein => {
                let jrs = jrs.ok_or_else(|| {
                    RtdError::config(format!(
                        "a JRS instance is required to create a {} trajectory",
                        traj_type
                    ))
                })?;
                let input = jrs.input_range().clone();
                let output = jrs.output_range().clone();
                if traj_type == TrajectoryType::Piecewise {
                    Box::new(PiecewiseArmTrajectory::new(self.traj_opt_props, robot_state.clone(), input, output)?)
                } else {
                    Box::new(BernsteinArmTrajectory::new(self.traj_opt_props, robot_state.clone(), input, output)?)
                }
            }
        };

        if let Some(params) = trajectory_params {
            trajectory.set_parameters(params)?;
        }
        Ok(trajectory)
    }

    /// Like [`create_typed`](Self::create_typed) with a string tag
    pub fn create_tagged(
        &self,
        robot_state: &RobotState,
        rs_instances: Option<&ProblemInstances>,
        trajectory_params: Option<&DVector<f64>>,
        tag: &str,
    ) -> RtdResult<Box<dyn Trajectory>> {
        let traj_type = tag.parse::<TrajectoryType>()?;
        self.create_typed(robot_state, rs_instances, trajectory_params, Some(traj_type))
    }
}

impl TrajectoryFactory for ArmTrajectoryFactory {
    fn create_trajectory(
        &self,
        robot_state: &RobotState,
        rs_instances: Option<&ProblemInstances>,
        trajectory_params: Option<&DVector<f64>>,
    ) -> RtdResult<Box<dyn Trajectory>> {
        self.create_typed(robot_state, rs_instances, trajectory_params, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reachsets::{AnalyticJointReachability, JrsGenerator, JrsOptions, ParameterRange, ReachSetGenerator};
    use std::sync::Arc;

    fn instances_for(traj_type: TrajectoryType, state: &RobotState) -> ProblemInstances {
        let options = JrsOptions {
            trajectory_types: vec![traj_type],
            range: Some(ParameterRange::Fixed {
                center: 0.0,
                half_width: 1.0,
            }),
            ..JrsOptions::default()
        };
        let generator = JrsGenerator::new(
            TrajOptProps::default(),
            options,
            Arc::new(AnalyticJointReachability::default()),
        )
        .unwrap();
        let sets = generator.generate_reachable_set(state, &Default::default()).unwrap();
        let mut instances = ProblemInstances::new();
        instances.insert(JRS_FAMILY.to_string(), sets[&1].clone());
        instances
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!("piecewise".parse::<TrajectoryType>().unwrap(), TrajectoryType::Piecewise);
        assert_eq!(TrajectoryType::Bernstein.to_string(), "bernstein");
        assert!(matches!("spline".parse::<TrajectoryType>(), Err(RtdError::Configuration(_))));
    }

    #[test]
    fn test_unknown_tag_fails_immediately() {
        let factory = ArmTrajectoryFactory::new(TrajOptProps::default(), TrajectoryType::Piecewise);
        let state = RobotState::at_rest(0.0, DVector::zeros(1)).unwrap();
        let err = factory.create_tagged(&state, None, None, "linear").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_jrs_is_configuration_error() {
        let factory = ArmTrajectoryFactory::new(TrajOptProps::default(), TrajectoryType::Piecewise);
        let state = RobotState::at_rest(0.0, DVector::zeros(1)).unwrap();
        assert!(factory.create_trajectory(&state, None, None).unwrap_err().is_configuration());
        let hold = factory
            .create_typed(&state, None, None, Some(TrajectoryType::ZeroHold))
            .unwrap();
        assert!(hold.is_valid());
    }

    #[test]
    fn test_type_follows_jrs_instance() {
        let factory = ArmTrajectoryFactory::new(TrajOptProps::default(), TrajectoryType::Piecewise);
        let state = RobotState::at_rest(0.0, DVector::zeros(1)).unwrap();
        let instances = instances_for(TrajectoryType::Bernstein, &state);
        let params = DVector::from_element(1, 1.0);
        let traj = factory.create_trajectory(&state, Some(&instances), Some(&params)).unwrap();
        assert!(traj.is_valid());
        // Bernstein ends at q0 + offset, piecewise would end at 0.25 a
        let end = traj.get_command(1.0).unwrap();
        approx::assert_relative_eq!(end.position()[0], 1.0, epsilon = 1e-12);
    }
}
