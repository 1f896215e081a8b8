//! Common traits defining the seams of the planner
//!
//! Reachable set instances, trajectories, objectives and optimization engines
//! are all swappable behind these interfaces; the orchestrator in
//! [`crate::trajopt`] only talks to them through the contracts below.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::common::error::RtdResult;
use crate::common::types::*;
use crate::trajopt::{TrajOptInfo, TrajOptProps};

/// Identifier of one trajectory optimization problem
pub type ProblemId = u32;

/// Reachable set instances of one problem, keyed by family name
pub type ProblemInstances = BTreeMap<String, Arc<dyn ReachSetInstance>>;

/// Constraint values `h ≤ 0`, `heq = 0` and their Jacobians at one `k`
///
/// Jacobians have one row per constraint and one column per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintEval {
    pub h: DVector<f64>,
    pub heq: Option<DVector<f64>>,
    pub grad_h: DMatrix<f64>,
    pub grad_heq: Option<DMatrix<f64>>,
}

impl ConstraintEval {
    /// No constraints over `n_params` parameters
    pub fn empty(n_params: usize) -> Self {
        Self {
            h: DVector::zeros(0),
            heq: None,
            grad_h: DMatrix::zeros(0, n_params),
            grad_heq: None,
        }
    }

    /// Inequality-only result
    pub fn inequality(h: DVector<f64>, grad_h: DMatrix<f64>) -> Self {
        Self {
            h,
            heq: None,
            grad_h,
            grad_heq: None,
        }
    }

    pub fn num_inequality(&self) -> usize {
        self.h.len()
    }

    pub fn num_equality(&self) -> usize {
        self.heq.as_ref().map_or(0, |v| v.len())
    }

    /// Largest violation of `h ≤ 0` or `|heq| = 0`, zero when satisfied
    pub fn max_violation(&self) -> f64 {
        let ineq = self.h.iter().fold(0.0_f64, |acc, v| acc.max(*v));
        let eq = self
            .heq
            .iter()
            .flat_map(|v| v.iter())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        ineq.max(eq)
    }
}

/// Nonlinear constraint callback produced by a reachable set instance
pub trait NlConstraint: Send + Sync {
    fn evaluate(&self, k: &DVector<f64>) -> RtdResult<ConstraintEval>;
}

impl<F> NlConstraint for F
where
    F: Fn(&DVector<f64>) -> RtdResult<ConstraintEval> + Send + Sync,
{
    fn evaluate(&self, k: &DVector<f64>) -> RtdResult<ConstraintEval> {
        self(k)
    }
}

/// A single reachable set generated for some robot state
///
/// If building the constraint ever changed the instance, the generator that
/// produced it would have to run without a cache. Implementations in this
/// crate build constraints from copies and leave the instance untouched.
pub trait ReachSetInstance: Send + Sync + Debug {
    /// Per-parameter input range, one row per trajectory parameter
    fn input_range(&self) -> &ParamBounds;

    fn num_parameters(&self) -> usize;

    /// Build the nonlinear constraint for the observed world
    fn gen_nl_constraint(&self, world_state: &WorldState) -> RtdResult<Box<dyn NlConstraint>>;

    fn as_any(&self) -> &dyn Any;
}

/// Parameterized trajectory converting a parameter vector into commands
pub trait Trajectory: Send + Sync + Debug {
    fn traj_opt_props(&self) -> &TrajOptProps;

    fn trajectory_params(&self) -> Option<&DVector<f64>>;

    fn start_state(&self) -> &RobotState;

    /// Whether [`get_commands`](Self::get_commands) is supported natively
    fn vectorized(&self) -> bool {
        true
    }

    /// Ok if the start state and parameters are present and consistent
    fn validate(&self) -> RtdResult<()>;

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    fn set_parameters(&mut self, trajectory_params: &DVector<f64>) -> RtdResult<()>;

    /// Desired state at an absolute time
    fn get_command(&self, time: f64) -> RtdResult<RobotState>;

    fn get_commands(&self, times: &[f64]) -> RtdResult<Vec<RobotState>> {
        times.iter().map(|&t| self.get_command(t)).collect()
    }

    fn start_time(&self) -> f64 {
        self.start_state().time()
    }
}

/// Creates trajectories, optionally parameterized by reachable sets
pub trait TrajectoryFactory: Send + Sync {
    fn create_trajectory(
        &self,
        robot_state: &RobotState,
        rs_instances: Option<&ProblemInstances>,
        trajectory_params: Option<&DVector<f64>>,
    ) -> RtdResult<Box<dyn Trajectory>>;
}

/// Cost and (optionally) its gradient at one `k`
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveEval {
    pub cost: f64,
    pub gradient: Option<DVector<f64>>,
}

/// Objective callback handed to an optimization engine
pub type ObjectiveFn = Box<dyn FnMut(&DVector<f64>) -> RtdResult<ObjectiveEval> + Send>;

/// Generates the objective to optimize for a trajectory optimization problem
pub trait Objective: Send + Sync {
    fn gen_objective(
        &self,
        robot_state: &RobotState,
        waypoint: &DVector<f64>,
        rs_instances: &ProblemInstances,
    ) -> RtdResult<ObjectiveFn>;
}

/// Why an optimization run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStatus {
    Converged,
    MaxIterations,
    Infeasible,
    Timeout,
    Cancelled,
    NumericalFailure,
}

/// Output of an optimization engine
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub success: bool,
    pub parameters: DVector<f64>,
    pub cost: f64,
    pub status: SolverStatus,
    pub iterations: usize,
}

/// Black-box bounded nonlinear solver
pub trait OptimizationEngine: Send + Sync {
    /// Minimize the objective subject to `h ≤ 0`, `heq = 0` within `bounds`
    ///
    /// `initial_guess` may be shorter than `bounds`; missing entries are
    /// filled by the engine.
    fn perform_optimization(
        &self,
        initial_guess: &[f64],
        objective: &mut dyn FnMut(&DVector<f64>) -> RtdResult<ObjectiveEval>,
        constraints: &mut dyn FnMut(&DVector<f64>) -> RtdResult<ConstraintEval>,
        bounds: &ParamBounds,
    ) -> RtdResult<OptimizationResult>;
}

/// Top-level planner producing one certified trajectory per call
pub trait RtdPlanner {
    /// `Ok((None, info))` means no certified trajectory was found and the
    /// caller must keep its previous trajectory running.
    fn plan_trajectory(
        &mut self,
        robot_state: &RobotState,
        world_state: &WorldState,
        waypoint: &DVector<f64>,
    ) -> RtdResult<(Option<Box<dyn Trajectory>>, TrajOptInfo)>;
}
