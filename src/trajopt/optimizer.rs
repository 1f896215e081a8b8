//! Trajectory optimization orchestrator
//!
//! One planning call runs through
//!
//! ```text
//! Idle -> GeneratingReachSets -> BuildingConstraints -> Optimizing
//!      -> SelectingBest -> Success | NoFeasibleSolution
//! ```
//!
//! Reachable sets of all families are grouped by problem id, every problem
//! is optimized independently and the feasible result with the lowest cost
//! wins. Failures of one problem never affect its siblings; only
//! configuration errors abort the whole call.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use nalgebra::DVector;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::common::{
    NlConstraint, Objective, OptimizationEngine, ParamBounds, ProblemId, ProblemInstances, RobotState, RtdError,
    RtdResult, SolverStatus, Trajectory, TrajectoryFactory, WorldState,
};
use crate::reachsets::{check_cache_contract, GenerationOptions, ReachSetGenerator};
use crate::trajopt::{ConstraintMerger, RingBufferCache, TrajOptProps, DEFAULT_CONSTRAINT_BUFFER_SIZE};

/// Stage of a planning call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanningPhase {
    Idle,
    GeneratingReachSets,
    BuildingConstraints,
    Optimizing,
    SelectingBest,
    Success,
    NoFeasibleSolution,
}

impl fmt::Display for PlanningPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanningPhase::Idle => "idle",
            PlanningPhase::GeneratingReachSets => "generating reachable sets",
            PlanningPhase::BuildingConstraints => "building constraints",
            PlanningPhase::Optimizing => "optimizing",
            PlanningPhase::SelectingBest => "selecting best solution",
            PlanningPhase::Success => "success",
            PlanningPhase::NoFeasibleSolution => "no feasible solution",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one optimization problem
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProblemReport {
    pub problem_id: ProblemId,
    /// Families that contributed an instance
    pub families: Vec<String>,
    pub num_parameters: Option<usize>,
    pub bounds: Option<Vec<(f64, f64)>>,
    /// Inequality and equality constraints at the returned parameters
    pub num_constraints: Option<(usize, usize)>,
    pub initial_guess: Vec<f64>,
    pub success: bool,
    pub cost: Option<f64>,
    pub parameters: Option<Vec<f64>>,
    pub status: Option<SolverStatus>,
    pub error: Option<String>,
}

impl ProblemReport {
    fn new(problem_id: ProblemId, instances: &ProblemInstances) -> Self {
        ProblemReport {
            problem_id,
            families: instances.keys().cloned().collect(),
            ..ProblemReport::default()
        }
    }

    fn fail(&mut self, error: &RtdError) {
        warn!("Problem {} failed: {}", self.problem_id, error);
        self.success = false;
        self.error = Some(error.to_string());
    }
}

/// Diagnostics of one planning call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajOptInfo {
    pub phase: PlanningPhase,
    /// Reports in problem-id order
    pub problems: Vec<ProblemReport>,
    pub solution_id: Option<ProblemId>,
    pub cost: Option<f64>,
    pub parameters: Option<Vec<f64>>,
    /// Families whose generation failed, with the error message
    pub family_errors: BTreeMap<String, String>,
}

impl Default for TrajOptInfo {
    fn default() -> Self {
        TrajOptInfo {
            phase: PlanningPhase::Idle,
            problems: Vec::new(),
            solution_id: None,
            cost: None,
            parameters: None,
            family_errors: BTreeMap::new(),
        }
    }
}

impl TrajOptInfo {
    fn enter(&mut self, phase: PlanningPhase) {
        debug!("Planning phase: {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    pub fn num_feasible(&self) -> usize {
        self.problems.iter().filter(|p| p.success).count()
    }

    pub fn successes(&self) -> BTreeMap<ProblemId, bool> {
        self.problems.iter().map(|p| (p.problem_id, p.success)).collect()
    }

    pub fn problem(&self, problem_id: ProblemId) -> Option<&ProblemReport> {
        self.problems.iter().find(|p| p.problem_id == problem_id)
    }

    pub fn to_json(&self) -> RtdResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Core trajectory optimization routine
///
/// Calls the reachable set generators, combines their nonlinear constraints
/// per problem and hands each problem to the optimization engine.
pub struct RtdTrajOpt {
    traj_opt_props: TrajOptProps,
    reachable_sets: BTreeMap<String, Arc<dyn ReachSetGenerator>>,
    objective: Arc<dyn Objective>,
    optimization_engine: Arc<dyn OptimizationEngine>,
    trajectory_factory: Arc<dyn TrajectoryFactory>,
    constraint_buffer_size: usize,
    parallel_problems: bool,
}

/// Builder for [`RtdTrajOpt`]
pub struct RtdTrajOptBuilder {
    traj_opt_props: TrajOptProps,
    reachable_sets: Vec<Arc<dyn ReachSetGenerator>>,
    objective: Option<Arc<dyn Objective>>,
    optimization_engine: Option<Arc<dyn OptimizationEngine>>,
    trajectory_factory: Option<Arc<dyn TrajectoryFactory>>,
    constraint_buffer_size: usize,
    parallel_problems: bool,
}

impl RtdTrajOptBuilder {
    pub fn new(traj_opt_props: TrajOptProps) -> Self {
        RtdTrajOptBuilder {
            traj_opt_props,
            reachable_sets: Vec::new(),
            objective: None,
            optimization_engine: None,
            trajectory_factory: None,
            constraint_buffer_size: DEFAULT_CONSTRAINT_BUFFER_SIZE,
            parallel_problems: false,
        }
    }

    /// Add a family, keyed by its family name
    pub fn reachable_set(mut self, generator: Arc<dyn ReachSetGenerator>) -> Self {
        self.reachable_sets.push(generator);
        self
    }

    pub fn objective(mut self, objective: Arc<dyn Objective>) -> Self {
        self.objective = Some(objective);
        self
    }

    pub fn optimization_engine(mut self, engine: Arc<dyn OptimizationEngine>) -> Self {
        self.optimization_engine = Some(engine);
        self
    }

    pub fn trajectory_factory(mut self, factory: Arc<dyn TrajectoryFactory>) -> Self {
        self.trajectory_factory = Some(factory);
        self
    }

    pub fn constraint_buffer_size(mut self, size: usize) -> Self {
        self.constraint_buffer_size = size;
        self
    }

    pub fn parallel_problems(mut self, parallel: bool) -> Self {
        self.parallel_problems = parallel;
        self
    }

    pub fn build(self) -> RtdResult<RtdTrajOpt> {
        let objective = self.objective.ok_or_else(|| RtdError::config("trajectory optimization needs an objective"))?;
        let optimization_engine = self
            .optimization_engine
            .ok_or_else(|| RtdError::config("trajectory optimization needs an optimization engine"))?;
        let trajectory_factory = self
            .trajectory_factory
            .ok_or_else(|| RtdError::config("trajectory optimization needs a trajectory factory"))?;
        if self.reachable_sets.is_empty() {
            return Err(RtdError::config("trajectory optimization needs at least one reachable set"));
        }

        let mut reachable_sets = BTreeMap::new();
        for generator in self.reachable_sets {
            check_cache_contract(generator.as_ref())?;
            let name = generator.family().to_string();
            if reachable_sets.insert(name.clone(), generator).is_some() {
                return Err(RtdError::config(format!("reachable set family '{}' added twice", name)));
            }
        }

        Ok(RtdTrajOpt {
            traj_opt_props: self.traj_opt_props,
            reachable_sets,
            objective,
            optimization_engine,
            trajectory_factory,
            constraint_buffer_size: self.constraint_buffer_size,
            parallel_problems: self.parallel_problems,
        })
    }
}

impl RtdTrajOpt {
    pub fn builder(traj_opt_props: TrajOptProps) -> RtdTrajOptBuilder {
        RtdTrajOptBuilder::new(traj_opt_props)
    }

    pub fn traj_opt_props(&self) -> &TrajOptProps {
        &self.traj_opt_props
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.reachable_sets.keys().map(|s| s.as_str())
    }

    /// Solve all problems and build the trajectory of the best one
    ///
    /// `Ok((None, info))` means no problem was feasible. `initial_guess` is
    /// only used by problems it fits; `rs_additional_args` are passed to the
    /// family of the same name.
    pub fn solve_traj_opt(
        &self,
        robot_state: &RobotState,
        world_state: &WorldState,
        waypoint: &DVector<f64>,
        initial_guess: Option<&DVector<f64>>,
        rs_additional_args: &BTreeMap<String, GenerationOptions>,
    ) -> RtdResult<(Option<Box<dyn Trajectory>>, TrajOptInfo)> {
        if waypoint.len() != robot_state.num_joints() {
            return Err(RtdError::dimension("waypoint", robot_state.num_joints(), waypoint.len()));
        }
        let mut info = TrajOptInfo::default();

        info.enter(PlanningPhase::GeneratingReachSets);
        info!("Generating reachable sets and nonlinear constraints");
        let problems = self.generate_problems(robot_state, rs_additional_args, &mut info)?;

        info.enter(PlanningPhase::Optimizing);
        let solved = if self.parallel_problems && problems.len() > 1 {
            self.solve_parallel(robot_state, world_state, waypoint, initial_guess, &problems)?
        } else {
            problems
                .iter()
                .map(|(&id, instances)| self.solve_problem(id, instances, robot_state, world_state, waypoint, initial_guess))
                .collect::<RtdResult<Vec<_>>>()?
        };
        info.problems.extend(solved);
        info.problems.sort_by_key(|p| p.problem_id);

        info.enter(PlanningPhase::SelectingBest);
        let best = info
            .problems
            .iter()
            .filter(|p| p.success)
            .filter_map(|p| Some((p.problem_id, p.cost?, p.parameters.clone()?)))
            .min_by_key(|(_, cost, _)| OrderedFloat(*cost));

        let Some((solution_id, cost, parameters)) = best else {
            info!("No feasible solution found in {} problem(s)", info.problems.len());
            info.enter(PlanningPhase::NoFeasibleSolution);
            return Ok((None, info));
        };

        info!("Optimal solution found in problem {}", solution_id);
        let instances = problems
            .get(&solution_id)
            .ok_or_else(|| RtdError::config(format!("missing instances of problem {}", solution_id)))?;
        let params = DVector::from_vec(parameters.clone());
        let trajectory = self
            .trajectory_factory
            .create_trajectory(robot_state, Some(instances), Some(&params))?;

        info.enter(PlanningPhase::Success);
        info.solution_id = Some(solution_id);
        info.cost = Some(cost);
        info.parameters = Some(parameters);
        Ok((Some(trajectory), info))
    }

    /// Instances of every family, grouped by problem id
    ///
    /// Problems that some family did not contribute to are dropped and
    /// reported as failed.
    fn generate_problems(
        &self,
        robot_state: &RobotState,
        rs_additional_args: &BTreeMap<String, GenerationOptions>,
        info: &mut TrajOptInfo,
    ) -> RtdResult<BTreeMap<ProblemId, ProblemInstances>> {
        let default_args = GenerationOptions::new();
        let mut grouped: BTreeMap<ProblemId, ProblemInstances> = BTreeMap::new();

        for (name, generator) in &self.reachable_sets {
            debug!("Generating {}", name);
            let args = match rs_additional_args.get(name) {
                Some(args) => {
                    debug!("Passing additional arguments to generate {}", name);
                    args
                }
                None => &default_args,
            };
            match generator.get_reachable_set(robot_state, false, args) {
                Ok(sets) => {
                    for (id, instance) in sets {
                        grouped.entry(id).or_default().insert(name.clone(), instance);
                    }
                }
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    warn!("Reachable set {} failed: {}", name, e);
                    info.family_errors.insert(name.clone(), e.to_string());
                }
            }
        }

        let all_families: BTreeSet<&String> = self.reachable_sets.keys().collect();
        let mut complete = BTreeMap::new();
        for (id, instances) in grouped {
            let missing: Vec<&str> = all_families
                .iter()
                .filter(|name| !instances.contains_key(name.as_str()))
                .map(|name| name.as_str())
                .collect();
            if missing.is_empty() {
                complete.insert(id, instances);
            } else {
                let mut report = ProblemReport::new(id, &instances);
                report.fail(&RtdError::reach_set(missing.join(", "), format!("no instance for problem {}", id)));
                info.problems.push(report);
            }
        }
        Ok(complete)
    }

    fn solve_parallel(
        &self,
        robot_state: &RobotState,
        world_state: &WorldState,
        waypoint: &DVector<f64>,
        initial_guess: Option<&DVector<f64>>,
        problems: &BTreeMap<ProblemId, ProblemInstances>,
    ) -> RtdResult<Vec<ProblemReport>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = problems
                .iter()
                .map(|(&id, instances)| {
                    let handle = scope.spawn(move || {
                        self.solve_problem(id, instances, robot_state, world_state, waypoint, initial_guess)
                    });
                    (id, instances, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(id, instances, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        let mut report = ProblemReport::new(id, instances);
                        report.fail(&RtdError::Numerical(format!("solver thread of problem {} panicked", id)));
                        Ok(report)
                    })
                })
                .collect()
        })
    }

    /// Optimize one problem; only configuration errors are returned as `Err`
    fn solve_problem(
        &self,
        problem_id: ProblemId,
        instances: &ProblemInstances,
        robot_state: &RobotState,
        world_state: &WorldState,
        waypoint: &DVector<f64>,
        initial_guess: Option<&DVector<f64>>,
    ) -> RtdResult<ProblemReport> {
        info!("Solving problem {}", problem_id);
        let mut report = ProblemReport::new(problem_id, instances);
        match self.optimize(&mut report, instances, robot_state, world_state, waypoint, initial_guess) {
            Ok(()) => Ok(report),
            Err(e) if e.is_configuration() => Err(e),
            Err(e) => {
                report.fail(&e);
                Ok(report)
            }
        }
    }

    fn optimize(
        &self,
        report: &mut ProblemReport,
        instances: &ProblemInstances,
        robot_state: &RobotState,
        world_state: &WorldState,
        waypoint: &DVector<f64>,
        initial_guess: Option<&DVector<f64>>,
    ) -> RtdResult<()> {
        debug!("Validating sizes");
        let sizes: BTreeSet<usize> = instances.values().map(|rs| rs.num_parameters()).collect();
        let num_parameters = match sizes.iter().copied().collect::<Vec<_>>().as_slice() {
            [n] => *n,
            [] => return Err(RtdError::config(format!("problem {} has no reachable sets", report.problem_id))),
            _ => return Err(RtdError::config("Reachable set parameter sizes don't match!")),
        };
        report.num_parameters = Some(num_parameters);

        debug!("Computing bounds");
        let mut bounds = ParamBounds::unbounded(num_parameters);
        for rs in instances.values() {
            bounds = bounds.intersect(rs.input_range())?;
        }
        report.bounds = Some(bounds.as_pairs());

        debug!("Problem {}: {}", report.problem_id, PlanningPhase::BuildingConstraints);
        let mut constraints: BTreeMap<String, Box<dyn NlConstraint>> = BTreeMap::new();
        for (name, rs) in instances {
            let constraint = rs.gen_nl_constraint(world_state).map_err(|e| {
                if e.is_configuration() {
                    e
                } else {
                    RtdError::reach_set(name.as_str(), e.to_string())
                }
            })?;
            constraints.insert(name.clone(), constraint);
        }
        let mut merger = ConstraintMerger::with_buffer(
            num_parameters,
            constraints,
            RingBufferCache::new(self.constraint_buffer_size),
        );

        let mut objective = self.objective.gen_objective(robot_state, waypoint, instances)?;

        let guess: Vec<f64> = match initial_guess {
            Some(g) if g.len() <= num_parameters => g.iter().copied().collect(),
            _ => Vec::new(),
        };
        report.initial_guess = guess.clone();

        debug!("Problem {}: {}", report.problem_id, PlanningPhase::Optimizing);
        let result = self.optimization_engine.perform_optimization(
            &guess,
            &mut |k: &DVector<f64>| objective(k),
            &mut |k: &DVector<f64>| merger.evaluate(k),
            &bounds,
        )?;
        debug!(
            "Problem {} finished with {:?} after {} iterations (cost {:.6e})",
            report.problem_id, result.status, result.iterations, result.cost
        );

        report.num_constraints = merger.count(&result.parameters).ok();
        report.success = result.success && result.cost.is_finite();
        report.cost = Some(result.cost);
        report.parameters = Some(result.parameters.iter().copied().collect());
        report.status = Some(result.status);
        Ok(())
    }
}
