use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};

use rtd_planner::common::{
    ArmInfo, ConstraintEval, NlConstraint, ParamBounds, ReachSetInstance, RobotState, RtdPlanner, RtdResult,
    WorldState,
};
use rtd_planner::planner::{ArmourPlanner, ArmourPlannerConfig, ArmourPlannerOptions};
use rtd_planner::reachsets::{
    AnalyticJointReachability, GenerationOptions, JrsGenerator, JrsOptions, ParameterRange, PlanarArmOccupancy,
    ProblemSets, ReachSetCache, ReachSetGenerator,
};
use rtd_planner::sets::Zonotope;
use rtd_planner::trajectory::{ArmTrajectoryFactory, TrajectoryType};
use rtd_planner::trajopt::{AugmentedLagrangianEngine, GenericArmObjective, PlanningPhase, RtdTrajOpt, TrajOptProps};

fn wide_jrs_options() -> JrsOptions {
    JrsOptions {
        range: Some(ParameterRange::Fixed {
            center: 0.0,
            half_width: 5.0,
        }),
        ..JrsOptions::default()
    }
}

fn single_joint_planner(trajectory_types: Vec<TrajectoryType>, parallel: bool) -> ArmourPlanner {
    let props = TrajOptProps::new(1.0, 0.5, 1.0).unwrap();
    let options = ArmourPlannerOptions {
        trajectory_types,
        jrs: wide_jrs_options(),
        parallel_problems: parallel,
        ..ArmourPlannerOptions::default()
    };
    ArmourPlanner::builder(ArmourPlannerConfig::new(props, ArmInfo::unlimited(1), options))
        .occupancy(Arc::new(PlanarArmOccupancy::new(vec![1.0], 0.05).unwrap()))
        .build()
        .unwrap()
}

#[test]
fn test_reaches_waypoint_without_obstacles() {
    let mut planner = single_joint_planner(vec![TrajectoryType::Piecewise], false);
    let start = RobotState::at_rest(0.0, DVector::zeros(1)).unwrap();
    let waypoint = DVector::from_element(1, 1.0);

    let (trajectory, info) = planner.plan_trajectory(&start, &WorldState::new(), &waypoint).unwrap();
    let trajectory = trajectory.expect("a feasible trajectory");
    assert_eq!(info.phase, PlanningPhase::Success);
    assert_eq!(info.solution_id, Some(1));

    let end = trajectory.get_command(1.0).unwrap();
    assert_relative_eq!(end.position()[0], 1.0, epsilon = 1e-3);
    assert_relative_eq!(end.velocity()[0], 0.0, epsilon = 1e-9);
}

#[test]
fn test_parallel_problems_all_solved() {
    let mut planner = single_joint_planner(vec![TrajectoryType::Piecewise, TrajectoryType::Bernstein], true);
    let start = RobotState::at_rest(0.0, DVector::zeros(1)).unwrap();
    let waypoint = DVector::from_element(1, 0.5);

    let (trajectory, info) = planner.plan_trajectory(&start, &WorldState::new(), &waypoint).unwrap();
    assert!(trajectory.is_some());
    assert_eq!(info.problems.len(), 2);
    assert_eq!(info.num_feasible(), 2);
    let ids: Vec<u32> = info.problems.iter().map(|p| p.problem_id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn test_obstacle_on_start_blocks_planning() {
    let mut planner = single_joint_planner(vec![TrajectoryType::Piecewise], false);
    let start = RobotState::at_rest(0.0, DVector::zeros(1)).unwrap();
    let obstacle = Zonotope::from_box(DVector::from_vec(vec![0.3, 0.0]), &DVector::from_vec(vec![0.25, 0.25])).unwrap();
    let world = WorldState::from_obstacles(vec![obstacle]);

    let (trajectory, info) = planner.plan_trajectory(&start, &world, &DVector::from_element(1, 1.0)).unwrap();
    assert!(trajectory.is_none());
    assert_eq!(info.num_feasible(), 0);
    assert!(planner.last_parameters().is_none());
}

#[derive(Debug)]
struct BlockedInstance {
    input_range: ParamBounds,
}

impl ReachSetInstance for BlockedInstance {
    fn input_range(&self) -> &ParamBounds {
        &self.input_range
    }

    fn num_parameters(&self) -> usize {
        self.input_range.len()
    }

    fn gen_nl_constraint(&self, _world_state: &WorldState) -> RtdResult<Box<dyn NlConstraint>> {
        let n = self.input_range.len();
        Ok(Box::new(move |_: &DVector<f64>| -> RtdResult<ConstraintEval> {
            Ok(ConstraintEval::inequality(DVector::from_element(1, 1.0), DMatrix::zeros(1, n)))
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Obstacle family whose constraint is violated for every `k`
struct BlockedFamily {
    cache: ReachSetCache,
}

impl ReachSetGenerator for BlockedFamily {
    fn family(&self) -> &str {
        "fo"
    }

    fn cache(&self) -> &ReachSetCache {
        &self.cache
    }

    fn generate_reachable_set(&self, robot_state: &RobotState, _: &GenerationOptions) -> RtdResult<ProblemSets> {
        let instance = BlockedInstance {
            input_range: ParamBounds::uniform(robot_state.num_joints(), -1.0, 1.0)?,
        };
        let mut sets = ProblemSets::new();
        sets.insert(1, Arc::new(instance) as Arc<dyn ReachSetInstance>);
        Ok(sets)
    }
}

#[test]
fn test_always_violated_family_yields_no_trajectory() {
    let props = TrajOptProps::new(1.0, 0.5, 1.0).unwrap();
    let jrs = JrsGenerator::new(props, wide_jrs_options(), Arc::new(AnalyticJointReachability)).unwrap();
    let factory = Arc::new(ArmTrajectoryFactory::new(props, TrajectoryType::Piecewise));
    let trajopt = RtdTrajOpt::builder(props)
        .reachable_set(Arc::new(jrs))
        .reachable_set(Arc::new(BlockedFamily {
            cache: ReachSetCache::new(0),
        }))
        .objective(Arc::new(GenericArmObjective::new(&props, factory.clone())))
        .optimization_engine(Arc::new(AugmentedLagrangianEngine::new(props)))
        .trajectory_factory(factory)
        .build()
        .unwrap();

    let start = RobotState::at_rest(0.0, DVector::zeros(1)).unwrap();
    let (trajectory, info) = trajopt
        .solve_traj_opt(
            &start,
            &WorldState::new(),
            &DVector::from_element(1, 1.0),
            None,
            &BTreeMap::new(),
        )
        .unwrap();
    assert!(trajectory.is_none());
    assert_eq!(info.num_feasible(), 0);
    assert_eq!(info.phase, PlanningPhase::NoFeasibleSolution);
    assert_eq!(info.problems.len(), 1);
    assert!(!info.problems[0].success);
}
