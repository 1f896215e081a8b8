//! Reachability-constrained trajectory optimization
//!
//! Combines the constraints of every reachable set family per problem,
//! optimizes the problems and picks the cheapest certified solution.

pub mod props;
pub mod constraints;
pub mod objective;
pub mod engine;
pub mod optimizer;

pub use props::*;
pub use constraints::*;
pub use objective::*;
pub use engine::*;
pub use optimizer::*;
