//! Top-level planners
//!
//! A planner owns the reachable set families, the trajectory factory, the
//! objective and the optimization engine, and turns one observation into at
//! most one certified trajectory.

pub mod armour;

pub use armour::*;
