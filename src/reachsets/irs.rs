//! Input reachable set (IRS) family: actuator torque limit constraints
//!
//! Only used when torque constraints are enabled. The required torque over
//! the horizon comes from a [`TorqueModel`]; a constant robust-input margin
//! widens it on both sides.

use std::any::Any;
use std::sync::Arc;

use log::{debug, info};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::backend::TorqueModel;
use super::bounds::{can_violate, limit_bounds, BoundSide, ScalarBoundConstraint};
use super::generator::{GenerationOptions, ProblemSets, ReachSetCache, ReachSetGenerator};
use super::jrs::{as_jrs, JrsGenerator};
use crate::common::{
    JointLimit, NlConstraint, ParamBounds, ReachSetInstance, RobotState, RtdError, RtdResult, WorldState,
};
use crate::sets::ParamZonotope;

pub const IRS_FAMILY: &str = "irs";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IrsOptions {
    /// Bound on the robust part of the control input, added to both sides
    pub robust_margin: f64,
}

#[derive(Debug, Clone)]
pub struct TorqueBound {
    pub step: usize,
    pub joint: usize,
    pub side: BoundSide,
    pub bound: ParamZonotope,
}

#[derive(Debug, Clone)]
pub struct IrsInstance {
    bounds: Vec<TorqueBound>,
    input_range: ParamBounds,
}

impl IrsInstance {
    pub fn new(bounds: Vec<TorqueBound>, input_range: ParamBounds) -> Self {
        IrsInstance { bounds, input_range }
    }

    pub fn bounds(&self) -> &[TorqueBound] {
        &self.bounds
    }
}

impl ReachSetInstance for IrsInstance {
    fn input_range(&self) -> &ParamBounds {
        &self.input_range
    }

    fn num_parameters(&self) -> usize {
        self.input_range.len()
    }

    fn gen_nl_constraint(&self, _world_state: &WorldState) -> RtdResult<Box<dyn NlConstraint>> {
        let active: Vec<ParamZonotope> = self
            .bounds
            .iter()
            .filter(|b| can_violate(&b.bound))
            .map(|b| {
                debug!("Added {:?} torque constraint on joint {} at step {}", b.side, b.joint, b.step);
                b.bound.clone()
            })
            .collect();
        Ok(Box::new(ScalarBoundConstraint::new(&active, self.num_parameters())?))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct IrsGenerator {
    jrs: Arc<JrsGenerator>,
    dynamics: Arc<dyn TorqueModel>,
    torque_limits: Vec<JointLimit>,
    options: IrsOptions,
    cache: ReachSetCache,
}

impl IrsGenerator {
    /// Fails with a configuration error when no torque limits are given
    pub fn new(
        jrs: Arc<JrsGenerator>,
        dynamics: Arc<dyn TorqueModel>,
        torque_limits: Option<Vec<JointLimit>>,
        options: IrsOptions,
    ) -> RtdResult<Self> {
        let torque_limits =
            torque_limits.ok_or_else(|| RtdError::config("torque constraints require torque limits"))?;
        if !(options.robust_margin.is_finite() && options.robust_margin >= 0.0) {
            return Err(RtdError::config("robust input margin must be finite and non-negative"));
        }
        Ok(IrsGenerator {
            jrs,
            dynamics,
            torque_limits,
            options,
            cache: ReachSetCache::new(1),
        })
    }
}

impl ReachSetGenerator for IrsGenerator {
    fn family(&self) -> &str {
        IRS_FAMILY
    }

    fn cache(&self) -> &ReachSetCache {
        &self.cache
    }

    fn generate_reachable_set(&self, robot_state: &RobotState, _options: &GenerationOptions) -> RtdResult<ProblemSets> {
        if robot_state.num_joints() != self.torque_limits.len() {
            return Err(RtdError::dimension("torque limits", robot_state.num_joints(), self.torque_limits.len()));
        }
        let jrs_sets = self.jrs.get_reachable_set(robot_state, false, &GenerationOptions::new())?;
        info!("Generating input reachable set!");

        let margin = DMatrix::from_element(1, 1, self.options.robust_margin);
        let mut out = ProblemSets::new();
        for (&problem_id, instance) in &jrs_sets {
            let jrs = as_jrs(instance.as_ref())?;
            let torques = self.dynamics.torque_sets(jrs)?;
            let mut bounds = Vec::new();
            for (step, per_joint) in torques.iter().enumerate() {
                for (joint, tau) in per_joint.iter().enumerate() {
                    let limit = self.torque_limits[joint];
                    let tau = if self.options.robust_margin > 0.0 {
                        tau.buffered(&margin)?
                    } else {
                        tau.clone()
                    };
                    let (lower, upper) = limit.finite_or(f64::INFINITY);
                    for (side, bound) in limit_bounds(&tau, lower, upper)? {
                        // an infinite limit yields a bound that is never active
                        if bound.center()[0].is_finite() {
                            bounds.push(TorqueBound { step, joint, side, bound });
                        }
                    }
                }
            }
            out.insert(problem_id, Arc::new(IrsInstance::new(bounds, jrs.input_range().clone())));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reachsets::{AnalyticJointReachability, DecoupledJointDynamics, JrsOptions, ParameterRange};
    use crate::trajopt::TrajOptProps;
    use nalgebra::DVector;

    fn jrs() -> Arc<JrsGenerator> {
        Arc::new(
            JrsGenerator::new(
                TrajOptProps::default(),
                JrsOptions {
                    range: Some(ParameterRange::Fixed {
                        center: 0.0,
                        half_width: 5.0,
                    }),
                    ..JrsOptions::default()
                },
                Arc::new(AnalyticJointReachability),
            )
            .unwrap(),
        )
    }

    fn dynamics() -> Arc<dyn TorqueModel> {
        Arc::new(DecoupledJointDynamics::new(vec![1.0], vec![0.0], vec![0.0]).unwrap())
    }

    #[test]
    fn test_requires_torque_limits() {
        let err = IrsGenerator::new(jrs(), dynamics(), None, IrsOptions::default()).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_torque_limit_constrains_acceleration() {
        // |τ| = |q̈| ≤ 2 while the parameter allows accelerations up to 5
        let generator = IrsGenerator::new(
            jrs(),
            dynamics(),
            Some(vec![JointLimit::symmetric(2.0)]),
            IrsOptions { robust_margin: 0.1 },
        )
        .unwrap();
        let state = RobotState::at_rest(0.0, DVector::zeros(1)).unwrap();
        let sets = generator.get_reachable_set(&state, false, &GenerationOptions::new()).unwrap();
        let cons = sets[&1].gen_nl_constraint(&WorldState::new()).unwrap();

        let gentle = cons.evaluate(&DVector::from_element(1, 0.2)).unwrap();
        assert_eq!(gentle.max_violation(), 0.0);
        let aggressive = cons.evaluate(&DVector::from_element(1, 0.8)).unwrap();
        assert!(aggressive.max_violation() > 0.0);
    }

    #[test]
    fn test_infinite_torque_limit_adds_nothing() {
        let generator = IrsGenerator::new(jrs(), dynamics(), Some(vec![JointLimit::unbounded()]), IrsOptions::default())
            .unwrap();
        let state = RobotState::at_rest(0.0, DVector::zeros(1)).unwrap();
        let sets = generator.generate_reachable_set(&state, &GenerationOptions::new()).unwrap();
        let irs = sets[&1].as_any().downcast_ref::<IrsInstance>().unwrap();
        assert!(irs.bounds().is_empty());
    }
}
