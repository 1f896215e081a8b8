//! Joint reachable set (JRS) family
//!
//! The JRS is the foundation of the other families: for one trajectory type
//! it bounds the joint positions, velocities and accelerations over the
//! horizon as functions of `k ∈ [-1, 1]^n`. It adds no constraints itself.

use std::any::Any;
use std::f64::consts::PI;
use std::sync::Arc;

use log::{debug, info};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::backend::{HorizonSpec, JointReachability, JointReachableSet, UltimateBound};
use super::generator::{cache_key, GenerationOptions, ProblemSets, ReachSetCache, ReachSetGenerator};
use crate::common::{
    ConstraintEval, NlConstraint, ParamBounds, ReachSetInstance, RobotState, RtdError, RtdResult, WorldState,
};
use crate::trajectory::TrajectoryType;
use crate::trajopt::TrajOptProps;

pub const JRS_FAMILY: &str = "jrs";

/// How the optimization parameter maps onto each joint's actual parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParameterRange {
    /// Acceleration range `0 ± clamp(|q̇₀|/3, π/24, π/3)` as used by ArmTD
    Armtd,
    /// End-position offset `0 ± π/36`
    Offset,
    /// The same `center ± half_width` for every joint
    Fixed { center: f64, half_width: f64 },
}

impl ParameterRange {
    /// Default range of a trajectory type
    pub fn default_for(traj_type: TrajectoryType) -> Self {
        match traj_type {
            TrajectoryType::Bernstein => ParameterRange::Offset,
            _ => ParameterRange::Armtd,
        }
    }

    /// Per-joint output range for the given start state
    pub fn output_range(&self, robot_state: &RobotState) -> RtdResult<ParamBounds> {
        let n = robot_state.num_joints();
        let (center, half_width) = match *self {
            ParameterRange::Armtd => (
                DVector::zeros(n),
                robot_state.velocity().map(|v| (v.abs() / 3.0).clamp(PI / 24.0, PI / 3.0)),
            ),
            ParameterRange::Offset => (DVector::zeros(n), DVector::from_element(n, PI / 36.0)),
            ParameterRange::Fixed { center, half_width } => {
                (DVector::from_element(n, center), DVector::from_element(n, half_width))
            }
        };
        ParamBounds::symmetric(&center, &half_width)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JrsOptions {
    /// One problem per entry, numbered from 1 in this order
    pub trajectory_types: Vec<TrajectoryType>,
    /// Overrides the per-type default range
    pub range: Option<ParameterRange>,
    pub time_step: f64,
    pub ultimate_bound: Option<UltimateBound>,
}

impl Default for JrsOptions {
    fn default() -> Self {
        JrsOptions {
            trajectory_types: vec![TrajectoryType::Piecewise],
            range: None,
            time_step: 0.01,
            ultimate_bound: None,
        }
    }
}

/// One joint reachable set for one trajectory type and start state
#[derive(Debug, Clone)]
pub struct JrsInstance {
    trajectory_type: TrajectoryType,
    start_state: RobotState,
    input_range: ParamBounds,
    output_range: ParamBounds,
    sets: JointReachableSet,
}

impl JrsInstance {
    pub fn new(
        trajectory_type: TrajectoryType,
        start_state: RobotState,
        output_range: ParamBounds,
        sets: JointReachableSet,
    ) -> RtdResult<Self> {
        let n = start_state.num_joints();
        if output_range.len() != n {
            return Err(RtdError::dimension("JRS output range", n, output_range.len()));
        }
        if sets.num_steps() > 0 && sets.num_joints() != n {
            return Err(RtdError::dimension("JRS joint sets", n, sets.num_joints()));
        }
        Ok(JrsInstance {
            trajectory_type,
            start_state,
            input_range: ParamBounds::uniform(n, -1.0, 1.0)?,
            output_range,
            sets,
        })
    }

    pub fn trajectory_type(&self) -> TrajectoryType {
        self.trajectory_type
    }

    pub fn start_state(&self) -> &RobotState {
        &self.start_state
    }

    pub fn output_range(&self) -> &ParamBounds {
        &self.output_range
    }

    pub fn joint_sets(&self) -> &JointReachableSet {
        &self.sets
    }

    pub fn num_joints(&self) -> usize {
        self.start_state.num_joints()
    }

    pub fn num_steps(&self) -> usize {
        self.sets.num_steps()
    }
}

impl ReachSetInstance for JrsInstance {
    fn input_range(&self) -> &ParamBounds {
        &self.input_range
    }

    fn num_parameters(&self) -> usize {
        self.input_range.len()
    }

    fn gen_nl_constraint(&self, _world_state: &WorldState) -> RtdResult<Box<dyn NlConstraint>> {
        let n = self.num_parameters();
        Ok(Box::new(move |_k: &DVector<f64>| -> RtdResult<ConstraintEval> { Ok(ConstraintEval::empty(n)) }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Borrow a generic instance as a JRS instance
pub fn as_jrs(instance: &dyn ReachSetInstance) -> RtdResult<&JrsInstance> {
    instance
        .as_any()
        .downcast_ref::<JrsInstance>()
        .ok_or_else(|| RtdError::config("expected a JRS instance"))
}

pub struct JrsGenerator {
    traj_opt_props: TrajOptProps,
    options: JrsOptions,
    backend: Arc<dyn JointReachability>,
    cache: ReachSetCache,
}

impl JrsGenerator {
    pub fn new(traj_opt_props: TrajOptProps, options: JrsOptions, backend: Arc<dyn JointReachability>) -> RtdResult<Self> {
        if options.trajectory_types.is_empty() {
            return Err(RtdError::config("the JRS needs at least one trajectory type"));
        }
        if let Some(t) = options.trajectory_types.iter().find(|t| !t.needs_jrs()) {
            return Err(RtdError::config(format!("the JRS cannot be generated for {} trajectories", t)));
        }
        if !(options.time_step.is_finite() && options.time_step > 0.0) {
            return Err(RtdError::config(format!("invalid JRS time step {}", options.time_step)));
        }
        if let Some(ParameterRange::Fixed { half_width, center }) = options.range {
            if !(half_width.is_finite() && center.is_finite()) {
                return Err(RtdError::config("fixed parameter range must be finite"));
            }
        }
        Ok(JrsGenerator {
            traj_opt_props,
            options,
            backend,
            cache: ReachSetCache::new(1),
        })
    }

    pub fn options(&self) -> &JrsOptions {
        &self.options
    }

    fn horizon_for(&self, traj_type: TrajectoryType, robot_state: &RobotState) -> RtdResult<HorizonSpec> {
        let range = self
            .options
            .range
            .unwrap_or_else(|| ParameterRange::default_for(traj_type));
        Ok(HorizonSpec {
            trajectory_type: traj_type,
            plan_time: self.traj_opt_props.plan_time(),
            horizon_time: self.traj_opt_props.horizon_time(),
            time_step: self.options.time_step,
            output_range: range.output_range(robot_state)?,
            ultimate_bound: self.options.ultimate_bound,
        })
    }
}

impl ReachSetGenerator for JrsGenerator {
    fn family(&self) -> &str {
        JRS_FAMILY
    }

    fn cache(&self) -> &ReachSetCache {
        &self.cache
    }

    /// The JRS depends on the state only, so every caller shares one entry
    fn generation_key(&self, robot_state: &RobotState, _options: &GenerationOptions) -> String {
        cache_key(robot_state, &GenerationOptions::new())
    }

    fn generate_reachable_set(&self, robot_state: &RobotState, _options: &GenerationOptions) -> RtdResult<ProblemSets> {
        info!("Generating joint reachable set!");
        let mut out = ProblemSets::new();
        for (idx, &traj_type) in self.options.trajectory_types.iter().enumerate() {
            let horizon = self.horizon_for(traj_type, robot_state)?;
            let sets = self.backend.propagate(robot_state, &horizon)?;
            debug!(
                "JRS for {} trajectories: {} steps, output range {:?}",
                traj_type,
                sets.num_steps(),
                horizon.output_range.as_pairs()
            );
            let instance = JrsInstance::new(traj_type, robot_state.clone(), horizon.output_range, sets)?;
            let problem_id = idx as u32 + 1;
            out.insert(problem_id, Arc::new(instance));
        }
        Ok(out)
    }
}
