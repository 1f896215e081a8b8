//! Common types used throughout rtd_planner

use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::common::error::{RtdError, RtdResult};
use crate::sets::Zonotope;

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a produced robot state, used as a reachable set cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(u64);

impl StateId {
    fn next() -> Self {
        StateId(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Time-stamped joint position, velocity and acceleration of an arm
///
/// Immutable once produced. Every constructor call hands out a fresh
/// [`StateId`]; clones share it, since they describe the same state.
#[derive(Debug, Clone)]
pub struct RobotState {
    id: StateId,
    time: f64,
    position: DVector<f64>,
    velocity: DVector<f64>,
    acceleration: DVector<f64>,
}

impl RobotState {
    pub fn new(
        time: f64,
        position: DVector<f64>,
        velocity: DVector<f64>,
        acceleration: DVector<f64>,
    ) -> RtdResult<Self> {
        let n = position.len();
        if velocity.len() != n {
            return Err(RtdError::dimension("robot state velocity", n, velocity.len()));
        }
        if acceleration.len() != n {
            return Err(RtdError::dimension("robot state acceleration", n, acceleration.len()));
        }
        if !time.is_finite() {
            return Err(RtdError::config("robot state time must be finite"));
        }
        Ok(Self {
            id: StateId::next(),
            time,
            position,
            velocity,
            acceleration,
        })
    }

    /// State with zero velocity and acceleration
    pub fn at_rest(time: f64, position: DVector<f64>) -> RtdResult<Self> {
        let n = position.len();
        Self::new(time, position, DVector::zeros(n), DVector::zeros(n))
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn position(&self) -> &DVector<f64> {
        &self.position
    }

    pub fn velocity(&self) -> &DVector<f64> {
        &self.velocity
    }

    pub fn acceleration(&self) -> &DVector<f64> {
        &self.acceleration
    }

    pub fn num_joints(&self) -> usize {
        self.position.len()
    }
}

/// Observed obstacles for one planning call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldState {
    pub obstacles: Vec<Zonotope>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_obstacles(obstacles: Vec<Zonotope>) -> Self {
        Self { obstacles }
    }

    pub fn push(&mut self, obstacle: Zonotope) {
        self.obstacles.push(obstacle);
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }
}

/// Per-parameter `[lower, upper]` box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl ParamBounds {
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> RtdResult<Self> {
        if lower.len() != upper.len() {
            return Err(RtdError::dimension("parameter bounds", lower.len(), upper.len()));
        }
        if let Some(i) = (0..lower.len()).find(|&i| !(lower[i] <= upper[i])) {
            return Err(RtdError::config(format!(
                "parameter {} has an empty range [{}, {}]",
                i, lower[i], upper[i]
            )));
        }
        Ok(Self { lower, upper })
    }

    /// The same `[lower, upper]` for each of `n` parameters
    pub fn uniform(n: usize, lower: f64, upper: f64) -> RtdResult<Self> {
        Self::new(DVector::from_element(n, lower), DVector::from_element(n, upper))
    }

    /// `center ± half_width` per parameter
    pub fn symmetric(center: &DVector<f64>, half_width: &DVector<f64>) -> RtdResult<Self> {
        let half = half_width.abs();
        Self::new(center - &half, center + &half)
    }

    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: DVector::from_element(n, f64::NEG_INFINITY),
            upper: DVector::from_element(n, f64::INFINITY),
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    /// Elementwise intersection (max of lower bounds, min of upper bounds)
    ///
    /// An empty intersection on any parameter is a configuration error.
    pub fn intersect(&self, other: &ParamBounds) -> RtdResult<ParamBounds> {
        if other.len() != self.len() {
            return Err(RtdError::dimension("bounds intersection", self.len(), other.len()));
        }
        let lower = self.lower.zip_map(&other.lower, f64::max);
        let upper = self.upper.zip_map(&other.upper, f64::min);
        ParamBounds::new(lower, upper).map_err(|_| {
            RtdError::config(format!(
                "parameter bounds do not intersect: {:?} and {:?}",
                self.as_pairs(),
                other.as_pairs()
            ))
        })
    }

    pub fn contains(&self, k: &DVector<f64>) -> bool {
        k.len() == self.len() && (0..k.len()).all(|i| self.lower[i] <= k[i] && k[i] <= self.upper[i])
    }

    /// Projection of `k` onto the box
    pub fn clamp(&self, k: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(k.len(), |i, _| k[i].clamp(self.lower[i], self.upper[i]))
    }

    /// Affine map of `k` from this box onto `output`
    pub fn map_to(&self, output: &ParamBounds, k: &DVector<f64>) -> RtdResult<DVector<f64>> {
        if output.len() != self.len() {
            return Err(RtdError::dimension("output range", self.len(), output.len()));
        }
        if k.len() != self.len() {
            return Err(RtdError::dimension("parameter vector", self.len(), k.len()));
        }
        Ok(DVector::from_fn(k.len(), |i, _| {
            let width = self.upper[i] - self.lower[i];
            let out_width = output.upper[i] - output.lower[i];
            if width > 0.0 {
                output.lower[i] + (k[i] - self.lower[i]) / width * out_width
            } else {
                output.lower[i] + 0.5 * out_width
            }
        }))
    }

    pub fn as_pairs(&self) -> Vec<(f64, f64)> {
        self.lower.iter().zip(self.upper.iter()).map(|(l, u)| (*l, *u)).collect()
    }
}

fn neg_inf() -> f64 {
    f64::NEG_INFINITY
}

fn pos_inf() -> f64 {
    f64::INFINITY
}

fn is_infinite(v: &f64) -> bool {
    v.is_infinite()
}

/// Lower/upper limit of one joint quantity; a missing side is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    #[serde(default = "neg_inf", skip_serializing_if = "is_infinite")]
    pub lower: f64,
    #[serde(default = "pos_inf", skip_serializing_if = "is_infinite")]
    pub upper: f64,
}

impl JointLimit {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn symmetric(limit: f64) -> Self {
        Self::new(-limit.abs(), limit.abs())
    }

    pub fn unbounded() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Replace infinite sides with `±replacement`
    pub fn finite_or(&self, replacement: f64) -> (f64, f64) {
        let lower = if self.lower.is_infinite() { -replacement } else { self.lower };
        let upper = if self.upper.is_infinite() { replacement } else { self.upper };
        (lower, upper)
    }
}

/// Joint limits of the arm being planned for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmInfo {
    pub position_limits: Vec<JointLimit>,
    pub velocity_limits: Vec<JointLimit>,
    #[serde(default)]
    pub torque_limits: Option<Vec<JointLimit>>,
}

impl ArmInfo {
    pub fn new(position_limits: Vec<JointLimit>, velocity_limits: Vec<JointLimit>) -> RtdResult<Self> {
        let info = Self {
            position_limits,
            velocity_limits,
            torque_limits: None,
        };
        info.validate()?;
        Ok(info)
    }

    /// Arm with `n` joints and no limits at all
    pub fn unlimited(n: usize) -> Self {
        Self {
            position_limits: vec![JointLimit::unbounded(); n],
            velocity_limits: vec![JointLimit::unbounded(); n],
            torque_limits: None,
        }
    }

    pub fn with_torque_limits(mut self, torque_limits: Vec<JointLimit>) -> RtdResult<Self> {
        self.torque_limits = Some(torque_limits);
        self.validate()?;
        Ok(self)
    }

    pub fn num_joints(&self) -> usize {
        self.position_limits.len()
    }

    pub fn validate(&self) -> RtdResult<()> {
        let n = self.num_joints();
        if self.velocity_limits.len() != n {
            return Err(RtdError::dimension("velocity limits", n, self.velocity_limits.len()));
        }
        if let Some(torque) = &self.torque_limits {
            if torque.len() != n {
                return Err(RtdError::dimension("torque limits", n, torque.len()));
            }
        }
        let all = self
            .position_limits
            .iter()
            .chain(self.velocity_limits.iter())
            .chain(self.torque_limits.iter().flatten());
        for limit in all {
            if limit.lower.is_nan() || limit.upper.is_nan() || limit.lower > limit.upper {
                return Err(RtdError::config(format!(
                    "invalid joint limit [{}, {}]",
                    limit.lower, limit.upper
                )));
            }
        }
        Ok(())
    }
}
