//! Reachable set families and their generators
//!
//! The joint reachable set (JRS) is generated first; forward occupancy (FO),
//! joint limit (JLS) and input (IRS) sets are derived from it and share its
//! problem ids.

pub mod backend;
pub mod bounds;
pub mod fo;
pub mod generator;
pub mod irs;
pub mod jls;
pub mod jrs;

pub use backend::*;
pub use bounds::*;
pub use fo::*;
pub use generator::*;
pub use irs::*;
pub use jls::*;
pub use jrs::*;
