//! rtd_planner - Reachability-based trajectory design for robot arms
//!
//! This crate plans arm trajectories that are certified safe over a finite
//! horizon: reachable sets of the arm are turned into constraints on the
//! trajectory parameters, a constrained optimization picks the parameters,
//! and the caller keeps its previous trajectory whenever nothing certified
//! is found.

// Core modules
pub mod common;
pub mod sets;

// Planning modules
pub mod reachsets;
pub mod trajectory;
pub mod trajopt;
pub mod planner;

// Re-export common types for convenience
pub use common::{ArmInfo, JointLimit, ParamBounds, RobotState, WorldState};
pub use common::{Objective, OptimizationEngine, ReachSetInstance, RtdPlanner, Trajectory, TrajectoryFactory};
pub use common::{RtdError, RtdResult};
pub use planner::{ArmourPlanner, ArmourPlannerConfig, ArmourPlannerOptions};
pub use trajopt::{RtdTrajOpt, TrajOptInfo, TrajOptProps};
