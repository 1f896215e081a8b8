//! Joint limit set (JLS) family: position and velocity limit constraints

use std::any::Any;
use std::f64::consts::PI;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::bounds::{can_violate, limit_bounds, BoundSide, ScalarBoundConstraint};
use super::generator::{GenerationOptions, ProblemSets, ReachSetCache, ReachSetGenerator};
use super::jrs::{as_jrs, JrsGenerator};
use crate::common::{ArmInfo, NlConstraint, ParamBounds, ReachSetInstance, RobotState, RtdError, RtdResult, WorldState};
use crate::sets::ParamZonotope;

pub const JLS_FAMILY: &str = "jls";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JlsOptions {
    /// Stand-in magnitude for infinite joint limits
    pub infinite_limit: f64,
}

impl Default for JlsOptions {
    fn default() -> Self {
        JlsOptions {
            infinite_limit: 200.0 * PI,
        }
    }
}

/// The quantity a joint limit bound applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Position,
    Velocity,
}

/// One limit bound `h(k) ≤ 0` at a time step
#[derive(Debug, Clone)]
pub struct JointBound {
    pub step: usize,
    pub joint: usize,
    pub kind: LimitKind,
    pub side: BoundSide,
    pub bound: ParamZonotope,
}

#[derive(Debug, Clone)]
pub struct JlsInstance {
    bounds: Vec<JointBound>,
    input_range: ParamBounds,
}

impl JlsInstance {
    pub fn new(bounds: Vec<JointBound>, input_range: ParamBounds) -> Self {
        JlsInstance { bounds, input_range }
    }

    pub fn bounds(&self) -> &[JointBound] {
        &self.bounds
    }
}

impl ReachSetInstance for JlsInstance {
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
                debug!(
                    "Added {:?} {:?} joint limit constraint on joint {} at step {}",
                    b.side, b.kind, b.joint, b.step
                );
                b.bound.clone()
            })
            .collect();
        Ok(Box::new(ScalarBoundConstraint::new(&active, self.num_parameters())?))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct JlsGenerator {
    jrs: Arc<JrsGenerator>,
    arm_info: ArmInfo,
    options: JlsOptions,
    cache: ReachSetCache,
}

impl JlsGenerator {
    pub fn new(jrs: Arc<JrsGenerator>, arm_info: ArmInfo, options: JlsOptions) -> RtdResult<Self> {
        arm_info.validate()?;
        if !(options.infinite_limit.is_finite() && options.infinite_limit > 0.0) {
            return Err(RtdError::config("JLS infinite limit stand-in must be finite and positive"));
        }
        Ok(JlsGenerator {
            jrs,
            arm_info,
            options,
            cache: ReachSetCache::new(1),
        })
    }

    fn joint_bounds(
        &self,
        step: usize,
        joint: usize,
        kind: LimitKind,
        set: &ParamZonotope,
    ) -> RtdResult<Vec<JointBound>> {
        let limit = match kind {
            LimitKind::Position => self.arm_info.position_limits[joint],
            LimitKind::Velocity => self.arm_info.velocity_limits[joint],
        };
        let (lower, upper) = limit.finite_or(self.options.infinite_limit);
        let pair = limit_bounds(set, lower, upper)?;
        Ok(pair
            .into_iter()
            .map(|(side, bound)| JointBound {
                step,
                joint,
                kind,
                side,
                bound,
            })
            .collect())
    }
}

impl ReachSetGenerator for JlsGenerator {
    fn family(&self) -> &str {
        JLS_FAMILY
    }

    fn cache(&self) -> &ReachSetCache {
        &self.cache
    }

    fn generate_reachable_set(&self, robot_state: &RobotState, _options: &GenerationOptions) -> RtdResult<ProblemSets> {
        if robot_state.num_joints() != self.arm_info.num_joints() {
            return Err(RtdError::dimension("joint limits", robot_state.num_joints(), self.arm_info.num_joints()));
        }
        let jrs_sets = self.jrs.get_reachable_set(robot_state, false, &GenerationOptions::new())?;
        info!("Generating joint limit set!");

        let mut out = ProblemSets::new();
        for (&problem_id, instance) in &jrs_sets {
            let jrs = as_jrs(instance.as_ref())?;
            let sets = jrs.joint_sets();
            let mut bounds = Vec::new();
            for (step, (positions, velocities)) in sets.q.iter().zip(sets.dq.iter()).enumerate() {
                for joint in 0..jrs.num_joints() {
                    bounds.extend(self.joint_bounds(step, joint, LimitKind::Position, &positions[joint])?);
                    bounds.extend(self.joint_bounds(step, joint, LimitKind::Velocity, &velocities[joint])?);
                }
            }
            out.insert(problem_id, Arc::new(JlsInstance::new(bounds, jrs.input_range().clone())));
        }
        Ok(out)
    }
}
