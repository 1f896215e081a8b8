//! Properties shared by the trajectory optimization and its trajectories

use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::common::error::{RtdError, RtdResult};

/// Raw, unvalidated trajectory optimization properties
///
/// This is the deserialization form; convert it with
/// `TrajOptProps::try_from` to get a validated value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrajOptPropsConfig {
    /// Time after the start state at which the cost is evaluated [s]
    pub time_for_cost: f64,
    /// Duration of the committed (accelerating) part of the plan [s]
    pub plan_time: f64,
    /// Duration of the whole trajectory until stop [s]; equal to
    /// `plan_time` leaves piecewise trajectories no time to brake
    pub horizon_time: f64,
    /// Whether the optimization is cut off after `timeout_time`
    pub do_timeout: bool,
    /// Optimization budget when `do_timeout` is set [s]
    pub timeout_time: f64,
    /// Fill missing initial-guess entries randomly instead of with zeros
    pub random_init: bool,
}

impl Default for TrajOptPropsConfig {
    fn default() -> Self {
        Self {
            time_for_cost: 1.0,
            plan_time: 0.5,
            horizon_time: 1.0,
            do_timeout: false,
            timeout_time: 0.5,
            random_init: false,
        }
    }
}

/// Validated, immutable trajectory optimization properties
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrajOptPropsConfig", into = "TrajOptPropsConfig")]
pub struct TrajOptProps {
    config: TrajOptPropsConfig,
}

impl TrajOptProps {
    /// Properties with the given timing and no timeout
    pub fn new(time_for_cost: f64, plan_time: f64, horizon_time: f64) -> RtdResult<Self> {
        Self::try_from(TrajOptPropsConfig {
            time_for_cost,
            plan_time,
            horizon_time,
            ..TrajOptPropsConfig::default()
        })
    }

    /// Copy of these properties with a solver timeout enabled
    pub fn with_timeout(&self, timeout_time: f64) -> RtdResult<Self> {
        Self::try_from(TrajOptPropsConfig {
            do_timeout: true,
            timeout_time,
            ..self.config
        })
    }

    pub fn with_random_init(&self, random_init: bool) -> Self {
        Self {
            config: TrajOptPropsConfig {
                random_init,
                ..self.config
            },
        }
    }

    pub fn time_for_cost(&self) -> f64 {
        self.config.time_for_cost
    }

    pub fn plan_time(&self) -> f64 {
        self.config.plan_time
    }

    pub fn horizon_time(&self) -> f64 {
        self.config.horizon_time
    }

    pub fn do_timeout(&self) -> bool {
        self.config.do_timeout
    }

    pub fn timeout_time(&self) -> f64 {
        self.config.timeout_time
    }

    pub fn random_init(&self) -> bool {
        self.config.random_init
    }
}

impl Default for TrajOptProps {
    fn default() -> Self {
        Self {
            config: TrajOptPropsConfig::default(),
        }
    }
}

impl TryFrom<TrajOptPropsConfig> for TrajOptProps {
    type Error = RtdError;

    fn try_from(config: TrajOptPropsConfig) -> RtdResult<Self> {
        let positive = [
            ("timeForCost", config.time_for_cost),
            ("planTime", config.plan_time),
            ("horizonTime", config.horizon_time),
            ("timeoutTime", config.timeout_time),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(RtdError::config(format!("{} must be finite and positive, got {}", name, value)));
            }
        }
        if config.horizon_time < config.plan_time {
            return Err(RtdError::config(format!(
                "horizonTime ({}) must not be shorter than planTime ({})",
                config.horizon_time, config.plan_time
            )));
        }
        Ok(Self { config })
    }
}

impl From<TrajOptProps> for TrajOptPropsConfig {
    fn from(props: TrajOptProps) -> Self {
        props.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let props = TrajOptProps::default();
        assert_eq!(props.time_for_cost(), 1.0);
        assert_eq!(props.plan_time(), 0.5);
        assert_eq!(props.horizon_time(), 1.0);
        assert!(!props.do_timeout());
        assert!(!props.random_init());
    }

    #[test]
    fn test_horizon_shorter_than_plan_is_rejected() {
        assert!(matches!(TrajOptProps::new(1.0, 1.0, 0.5), Err(RtdError::Configuration(_))));
        assert!(TrajOptProps::new(1.0, 0.5, 0.5).is_ok());
    }

    #[test]
    fn test_non_positive_times_are_rejected() {
        assert!(TrajOptProps::new(0.0, 0.5, 1.0).is_err());
        assert!(TrajOptProps::new(1.0, f64::NAN, 1.0).is_err());
        assert!(TrajOptProps::default().with_timeout(-1.0).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let props: TrajOptProps = serde_json::from_str(r#"{"planTime": 0.25, "doTimeout": true}"#).unwrap();
        assert_eq!(props.plan_time(), 0.25);
        assert!(props.do_timeout());
        assert_eq!(props.horizon_time(), 1.0);

        let bad = serde_json::from_str::<TrajOptProps>(r#"{"planTime": 2.0}"#);
        assert!(bad.is_err());
    }
}
