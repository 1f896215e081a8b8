//! ARMOUR arm planner
//!
//! Wires the joint reachable set, forward occupancy and (optionally) the
//! joint-limit and input families to one trajectory optimizer. Each
//! configured trajectory type becomes its own problem.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::common::{
    ArmInfo, OptimizationEngine, RobotState, RtdError, RtdPlanner, RtdResult, Trajectory, WorldState,
};
use crate::reachsets::{
    AnalyticJointReachability, FoGenerator, FoOptions, GenerationOptions, IrsGenerator, IrsOptions, JlsGenerator,
    JlsOptions, JointReachability, JrsGenerator, JrsOptions, OccupancyModel, TorqueModel,
};
use crate::trajectory::{ArmTrajectoryFactory, TrajectoryType};
use crate::trajopt::{
    AugmentedLagrangianEngine, CancellationToken, GenericArmObjective, RtdTrajOpt, TrajOptInfo, TrajOptProps,
    DEFAULT_CONSTRAINT_BUFFER_SIZE,
};

/// Planner options, fixed at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmourPlannerOptions {
    /// One problem per type; the first one is also the factory default
    pub trajectory_types: Vec<TrajectoryType>,
    /// Add joint-limit and torque constraints
    pub input_constraints: bool,
    pub jrs: JrsOptions,
    pub fo: FoOptions,
    pub jls: JlsOptions,
    pub irs: IrsOptions,
    pub constraint_buffer_size: usize,
    pub parallel_problems: bool,
}

impl Default for ArmourPlannerOptions {
    fn default() -> Self {
        ArmourPlannerOptions {
            trajectory_types: vec![TrajectoryType::Piecewise],
            input_constraints: false,
            jrs: JrsOptions::default(),
            fo: FoOptions::default(),
            jls: JlsOptions::default(),
            irs: IrsOptions::default(),
            constraint_buffer_size: DEFAULT_CONSTRAINT_BUFFER_SIZE,
            parallel_problems: false,
        }
    }
}

/// Everything needed to build an [`ArmourPlanner`] apart from its models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmourPlannerConfig {
    #[serde(default)]
    pub traj_opt_props: TrajOptProps,
    pub arm_info: ArmInfo,
    #[serde(default)]
    pub options: ArmourPlannerOptions,
}

impl ArmourPlannerConfig {
    pub fn new(traj_opt_props: TrajOptProps, arm_info: ArmInfo, options: ArmourPlannerOptions) -> Self {
        ArmourPlannerConfig {
            traj_opt_props,
            arm_info,
            options,
        }
    }

    pub fn from_json(json: &str) -> RtdResult<Self> {
        let config: ArmourPlannerConfig = serde_json::from_str(json)?;
        config.arm_info.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> RtdResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct ArmourPlannerBuilder {
    config: ArmourPlannerConfig,
    joint_reachability: Arc<dyn JointReachability>,
    occupancy: Option<Arc<dyn OccupancyModel>>,
    dynamics: Option<Arc<dyn TorqueModel>>,
    engine: Option<Arc<dyn OptimizationEngine>>,
    cancellation: CancellationToken,
}

impl ArmourPlannerBuilder {
    pub fn new(config: ArmourPlannerConfig) -> Self {
        ArmourPlannerBuilder {
            config,
            joint_reachability: Arc::new(AnalyticJointReachability),
            occupancy: None,
            dynamics: None,
            engine: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn joint_reachability(mut self, backend: Arc<dyn JointReachability>) -> Self {
        self.joint_reachability = backend;
        self
    }

    pub fn occupancy(mut self, occupancy: Arc<dyn OccupancyModel>) -> Self {
        self.occupancy = Some(occupancy);
        self
    }

    /// Required when input constraints are enabled
    pub fn dynamics(mut self, dynamics: Arc<dyn TorqueModel>) -> Self {
        self.dynamics = Some(dynamics);
        self
    }

    /// Token the built planner hands out and resets before each plan.
    /// A custom engine only honours it if built with this token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Replaces the default augmented Lagrangian engine
    pub fn optimization_engine(mut self, engine: Arc<dyn OptimizationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> RtdResult<ArmourPlanner> {
        let ArmourPlannerConfig {
            traj_opt_props: props,
            arm_info,
            options,
        } = &self.config;
        arm_info.validate()?;
        let default_type = *options
            .trajectory_types
            .first()
            .ok_or_else(|| RtdError::config("at least one trajectory type is required"))?;

        let occupancy = self
            .occupancy
            .ok_or_else(|| RtdError::config("the ARMOUR planner needs an occupancy model"))?;

        let jrs_options = JrsOptions {
            trajectory_types: options.trajectory_types.clone(),
            ..options.jrs.clone()
        };
        let jrs = Arc::new(JrsGenerator::new(*props, jrs_options, self.joint_reachability)?);
        let fo = FoGenerator::new(jrs.clone(), occupancy, options.fo)?;

        let factory = Arc::new(ArmTrajectoryFactory::new(*props, default_type));
        let objective = Arc::new(GenericArmObjective::new(props, factory.clone()));
        let engine: Arc<dyn OptimizationEngine> = match self.engine {
            Some(engine) => {
                warn!("Custom optimization engine only cancels through the builder's token");
                engine
            }
            None => Arc::new(AugmentedLagrangianEngine::new(*props).with_cancellation(self.cancellation.clone())),
        };

        let mut builder = RtdTrajOpt::builder(*props)
            .reachable_set(jrs.clone())
            .reachable_set(Arc::new(fo))
            .objective(objective)
            .optimization_engine(engine)
            .trajectory_factory(factory)
            .constraint_buffer_size(options.constraint_buffer_size)
            .parallel_problems(options.parallel_problems);

        if options.input_constraints {
            let dynamics = self
                .dynamics
                .ok_or_else(|| RtdError::config("input constraints need a dynamics model"))?;
            let irs = IrsGenerator::new(jrs.clone(), dynamics, arm_info.torque_limits.clone(), options.irs)?;
            let jls = JlsGenerator::new(jrs, arm_info.clone(), options.jls)?;
            builder = builder.reachable_set(Arc::new(irs)).reachable_set(Arc::new(jls));
        }

        let trajopt = builder.build()?;
        info!(
            "ARMOUR planner with families {:?} and trajectory types {:?}",
            trajopt.families().collect::<Vec<_>>(),
            options.trajectory_types
        );

        Ok(ArmourPlanner {
            config: self.config,
            trajopt,
            cancellation: self.cancellation,
            last_parameters: None,
            rs_additional_args: BTreeMap::new(),
        })
    }
}

/// Reachability-based planner for serial arms
pub struct ArmourPlanner {
    config: ArmourPlannerConfig,
    trajopt: RtdTrajOpt,
    cancellation: CancellationToken,
    last_parameters: Option<DVector<f64>>,
    rs_additional_args: BTreeMap<String, GenerationOptions>,
}

impl ArmourPlanner {
    pub fn builder(config: ArmourPlannerConfig) -> ArmourPlannerBuilder {
        ArmourPlannerBuilder::new(config)
    }

    pub fn config(&self) -> &ArmourPlannerConfig {
        &self.config
    }

    pub fn families(&self) -> Vec<&str> {
        self.trajopt.families().collect()
    }

    /// Token of the default engine; cancelling it aborts the running plan
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Parameters of the last successful plan, used as the next initial guess
    pub fn last_parameters(&self) -> Option<&DVector<f64>> {
        self.last_parameters.as_ref()
    }

    pub fn reset(&mut self) {
        self.last_parameters = None;
        self.cancellation.reset();
    }

    /// Extra generation arguments for one family, used on every plan
    pub fn set_generation_options(&mut self, family: impl Into<String>, options: GenerationOptions) {
        self.rs_additional_args.insert(family.into(), options);
    }
}

impl RtdPlanner for ArmourPlanner {
    fn plan_trajectory(
        &mut self,
        robot_state: &RobotState,
        world_state: &WorldState,
        waypoint: &DVector<f64>,
    ) -> RtdResult<(Option<Box<dyn Trajectory>>, TrajOptInfo)> {
        let n = self.config.arm_info.num_joints();
        if robot_state.num_joints() != n {
            return Err(RtdError::dimension("robot state", n, robot_state.num_joints()));
        }

        let (trajectory, info) = self.trajopt.solve_traj_opt(
            robot_state,
            world_state,
            waypoint,
            self.last_parameters.as_ref(),
            &self.rs_additional_args,
        )?;
        if let Some(params) = trajectory.as_ref().and_then(|t| t.trajectory_params()) {
            debug!("Keeping parameters {:?} as the next initial guess", params.as_slice());
            self.last_parameters = Some(params.clone());
        }
        Ok((trajectory, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::JointLimit;
    use crate::reachsets::{DecoupledJointDynamics, ParameterRange, PlanarArmOccupancy};

    fn config(input_constraints: bool) -> ArmourPlannerConfig {
        let arm_info = ArmInfo::new(vec![JointLimit::symmetric(3.0)], vec![JointLimit::symmetric(10.0)])
            .unwrap()
            .with_torque_limits(vec![JointLimit::symmetric(50.0)])
            .unwrap();
        let options = ArmourPlannerOptions {
            input_constraints,
            jrs: JrsOptions {
                range: Some(ParameterRange::Fixed {
                    center: 0.0,
                    half_width: 5.0,
                }),
                ..JrsOptions::default()
            },
            ..ArmourPlannerOptions::default()
        };
        ArmourPlannerConfig::new(TrajOptProps::default(), arm_info, options)
    }

    fn occupancy() -> Arc<dyn OccupancyModel> {
        Arc::new(PlanarArmOccupancy::new(vec![1.0], 0.05).unwrap())
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "traj_opt_props": { "planTime": 0.25, "horizonTime": 0.75 },
            "arm_info": {
                "position_limits": [{ "lower": -1.0, "upper": 1.0 }, {}],
                "velocity_limits": [{ "lower": -2.0, "upper": 2.0 }, { "upper": 2.0 }]
            },
            "options": { "trajectory_types": ["piecewise", "bernstein"], "parallel_problems": true }
        }"#;
        let config = ArmourPlannerConfig::from_json(json).unwrap();
        assert_eq!(config.traj_opt_props.plan_time(), 0.25);
        assert_eq!(config.traj_opt_props.time_for_cost(), 1.0);
        assert_eq!(config.arm_info.num_joints(), 2);
        assert_eq!(config.arm_info.position_limits[1], JointLimit::unbounded());
        assert_eq!(
            config.options.trajectory_types,
            vec![TrajectoryType::Piecewise, TrajectoryType::Bernstein]
        );
        assert!(!config.options.input_constraints);
    }

    #[test]
    fn test_invalid_props_rejected_from_json() {
        let json = r#"{
            "traj_opt_props": { "planTime": 2.0, "horizonTime": 1.0 },
            "arm_info": { "position_limits": [], "velocity_limits": [] }
        }"#;
        assert!(ArmourPlannerConfig::from_json(json).is_err());
    }

    #[test]
    fn test_families_follow_input_constraints() {
        let planner = ArmourPlanner::builder(config(false)).occupancy(occupancy()).build().unwrap();
        assert_eq!(planner.families(), vec!["fo", "jrs"]);

        let planner = ArmourPlanner::builder(config(true))
            .occupancy(occupancy())
            .dynamics(Arc::new(DecoupledJointDynamics::new(vec![1.0], vec![0.0], vec![0.0]).unwrap()))
            .build()
            .unwrap();
        assert_eq!(planner.families(), vec!["fo", "irs", "jls", "jrs"]);
    }

    #[test]
    fn test_missing_models_are_configuration_errors() {
        let err = ArmourPlanner::builder(config(false)).build().err().unwrap();
        assert!(err.is_configuration());
        let err = ArmourPlanner::builder(config(true)).occupancy(occupancy()).build().err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_custom_engine_shares_builder_token() {
        let builder = ArmourPlanner::builder(config(false)).occupancy(occupancy());
        let engine = AugmentedLagrangianEngine::new(TrajOptProps::default())
            .with_cancellation(builder.cancellation_token().clone());
        let engine_token = engine.cancellation_token().clone();
        let planner = builder.optimization_engine(Arc::new(engine)).build().unwrap();

        planner.cancellation_token().cancel();
        assert!(engine_token.is_cancelled());
    }

    #[test]
    fn test_state_dimension_checked() {
        let mut planner = ArmourPlanner::builder(config(false)).occupancy(occupancy()).build().unwrap();
        let state = RobotState::at_rest(0.0, DVector::zeros(2)).unwrap();
        let result = planner.plan_trajectory(&state, &WorldState::new(), &DVector::zeros(2));
        assert!(result.err().unwrap().is_configuration());
    }

    #[test]
    fn test_successful_plan_is_remembered() {
        let mut planner = ArmourPlanner::builder(config(false)).occupancy(occupancy()).build().unwrap();
        let state = RobotState::at_rest(0.0, DVector::zeros(1)).unwrap();
        let (trajectory, info) = planner
            .plan_trajectory(&state, &WorldState::new(), &DVector::from_element(1, 0.5))
            .unwrap();
        assert_eq!(trajectory.is_some(), info.solution_id.is_some());
        assert_eq!(trajectory.is_some(), planner.last_parameters().is_some());

        planner.reset();
        assert!(planner.last_parameters().is_none());
    }
}
