//! Common types, traits, and error definitions for rtd_planner
//!
//! This module provides the foundational building blocks shared by the
//! reachable set families, trajectories and the trajectory optimizer.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
