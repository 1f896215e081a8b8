//! Error types for rtd_planner

use thiserror::Error;

/// Main error type for the reachability-based planner
///
/// Infeasibility and solver timeouts are not errors: they surface as a
/// failed optimization result and a missing trajectory.
#[derive(Debug, Error)]
pub enum RtdError {
    /// Inconsistent or invalid configuration (fatal, never isolated)
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A trajectory was used before being fully parameterized, or out of its time range
    #[error("Invalid trajectory: {0}")]
    InvalidTrajectory(String),
    /// A reachable set family failed to generate or to build its constraints
    #[error("Reachable set '{family}' failed: {message}")]
    ReachableSet { family: String, message: String },
    /// Vector or matrix sizes that do not agree
    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        got: usize,
    },
    /// Non-finite values or a failed numerical routine
    #[error("Numerical error: {0}")]
    Numerical(String),
    /// Config or diagnostics (de)serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RtdError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        RtdError::Configuration(msg.into())
    }

    /// Shorthand for an invalid trajectory error
    pub fn invalid_trajectory(msg: impl Into<String>) -> Self {
        RtdError::InvalidTrajectory(msg.into())
    }

    /// Shorthand for a reachable set family error
    pub fn reach_set(family: impl Into<String>, msg: impl Into<String>) -> Self {
        RtdError::ReachableSet {
            family: family.into(),
            message: msg.into(),
        }
    }

    /// Shorthand for a dimension mismatch
    pub fn dimension(what: impl Into<String>, expected: usize, got: usize) -> Self {
        RtdError::DimensionMismatch {
            what: what.into(),
            expected,
            got,
        }
    }

    /// Whether this error must cross the per-problem isolation boundary
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RtdError::Configuration(_) | RtdError::DimensionMismatch { .. }
        )
    }
}

/// Result type alias for planner operations
pub type RtdResult<T> = Result<T, RtdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RtdError::config("Reachable set parameter sizes don't match!");
        assert_eq!(
            format!("{}", err),
            "Configuration error: Reachable set parameter sizes don't match!"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(RtdError::config("x").is_configuration());
        assert!(RtdError::dimension("waypoint", 2, 3).is_configuration());
        assert!(!RtdError::invalid_trajectory("x").is_configuration());
        assert!(!RtdError::reach_set("fo", "x").is_configuration());
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<f64>("not json").unwrap_err();
        let err: RtdError = json_err.into();
        assert!(matches!(err, RtdError::Serialization(_)));
    }
}
