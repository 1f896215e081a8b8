//! Set-propagation capabilities consumed by the reachable set families
//!
//! The families only depend on the traits in this file. Each comes with a
//! reference implementation that is sound for the trajectory families of
//! this crate:
//!
//! - [`AnalyticJointReachability`]: joint position, velocity and
//!   acceleration sets, exact in `k` and bounded in time per step
//! - [`PlanarArmOccupancy`]: link occupancy of a planar revolute chain
//! - [`DecoupledJointDynamics`]: per-joint `τ = I q̈ + b q̇ + g`

use std::fmt::Debug;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::jrs::JrsInstance;
use crate::common::{ParamBounds, RobotState, RtdError, RtdResult};
use crate::sets::ParamZonotope;
use crate::trajectory::{AffineProfile, TrajectoryType};

/// Worst-case tracking error of the low-level controller
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UltimateBound {
    pub position: f64,
    pub velocity: f64,
}

/// What to propagate and over which horizon
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonSpec {
    pub trajectory_type: TrajectoryType,
    pub plan_time: f64,
    pub horizon_time: f64,
    pub time_step: f64,
    /// Actual per-joint parameter range; the optimization parameter spans
    /// `[-1, 1]` and maps affinely onto it
    pub output_range: ParamBounds,
    pub ultimate_bound: Option<UltimateBound>,
}

impl HorizonSpec {
    pub fn num_steps(&self) -> usize {
        ((self.horizon_time / self.time_step) - 1e-9).ceil().max(1.0) as usize
    }

    /// Time interval `[t_i, t_{i+1}]` of step `i`, relative to the start state
    pub fn interval(&self, step: usize) -> (f64, f64) {
        let from = step as f64 * self.time_step;
        let to = ((step + 1) as f64 * self.time_step).min(self.horizon_time);
        (from, to)
    }
}

/// Joint sets indexed `[time step][joint]`, each a 1-D set in `k`
#[derive(Debug, Clone)]
pub struct JointReachableSet {
    pub intervals: Vec<(f64, f64)>,
    /// Desired position
    pub q_des: Vec<Vec<ParamZonotope>>,
    /// Desired velocity
    pub dq_des: Vec<Vec<ParamZonotope>>,
    /// Desired acceleration
    pub ddq_des: Vec<Vec<ParamZonotope>>,
    /// Actual position, desired buffered by the ultimate bound
    pub q: Vec<Vec<ParamZonotope>>,
    /// Actual velocity, desired buffered by the ultimate bound
    pub dq: Vec<Vec<ParamZonotope>>,
}

impl JointReachableSet {
    pub fn num_steps(&self) -> usize {
        self.intervals.len()
    }

    pub fn num_joints(&self) -> usize {
        self.q.first().map_or(0, |row| row.len())
    }
}

/// Joint reachable set propagation
pub trait JointReachability: Send + Sync + Debug {
    fn propagate(&self, robot_state: &RobotState, horizon: &HorizonSpec) -> RtdResult<JointReachableSet>;
}

/// Link occupancy propagation, indexed `[time step][link]`
pub trait OccupancyModel: Send + Sync + Debug {
    fn workspace_dim(&self) -> usize;

    fn link_occupancy(&self, jrs: &JrsInstance) -> RtdResult<Vec<Vec<ParamZonotope>>>;
}

/// Joint torque propagation, indexed `[time step][joint]`
pub trait TorqueModel: Send + Sync + Debug {
    fn torque_sets(&self, jrs: &JrsInstance) -> RtdResult<Vec<Vec<ParamZonotope>>>;
}

/// Joint sets computed from the closed-form trajectory profiles
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticJointReachability;

impl AnalyticJointReachability {
    fn profile(robot_state: &RobotState, joint: usize, horizon: &HorizonSpec) -> RtdResult<AffineProfile> {
        let q0 = robot_state.position()[joint];
        let qd0 = robot_state.velocity()[joint];
        let qdd0 = robot_state.acceleration()[joint];
        match horizon.trajectory_type {
            TrajectoryType::Piecewise => Ok(AffineProfile::piecewise(q0, qd0, horizon.plan_time, horizon.horizon_time)),
            TrajectoryType::Bernstein => Ok(AffineProfile::bernstein(q0, qd0, qdd0, horizon.horizon_time)),
            TrajectoryType::ZeroHold => Err(RtdError::config(
                "zero-hold trajectories have no joint reachable set",
            )),
        }
    }
}

impl JointReachability for AnalyticJointReachability {
    fn propagate(&self, robot_state: &RobotState, horizon: &HorizonSpec) -> RtdResult<JointReachableSet> {
        let n = robot_state.num_joints();
        if horizon.output_range.len() != n {
            return Err(RtdError::dimension("JRS output range", n, horizon.output_range.len()));
        }
        if !(horizon.time_step.is_finite() && horizon.time_step > 0.0) {
            return Err(RtdError::config(format!("invalid JRS time step {}", horizon.time_step)));
        }

        let mut profiles = Vec::with_capacity(n);
        for j in 0..n {
            let pos = Self::profile(robot_state, j, horizon)?;
            let vel = pos.derivative();
            let acc = vel.derivative();
            let lo = horizon.output_range.lower()[j];
            let hi = horizon.output_range.upper()[j];
            profiles.push(([pos, vel, acc], 0.5 * (lo + hi), 0.5 * (hi - lo)));
        }

        let bound = horizon.ultimate_bound.unwrap_or_default();
        let n_steps = horizon.num_steps();
        let mut out = JointReachableSet {
            intervals: Vec::with_capacity(n_steps),
            q_des: Vec::with_capacity(n_steps),
            dq_des: Vec::with_capacity(n_steps),
            ddq_des: Vec::with_capacity(n_steps),
            q: Vec::with_capacity(n_steps),
            dq: Vec::with_capacity(n_steps),
        };

        for step in 0..n_steps {
            let (from, to) = horizon.interval(step);
            let mut sets: [Vec<ParamZonotope>; 3] = [Vec::with_capacity(n), Vec::with_capacity(n), Vec::with_capacity(n)];
            for (j, (derivs, center, half_width)) in profiles.iter().enumerate() {
                for (order, profile) in derivs.iter().enumerate() {
                    // K = center + half_width · k
                    let e = profile.enclose(from, to);
                    let radius = e.radius(center.abs() + half_width.abs());
                    sets[order].push(ParamZonotope::scalar(
                        e.nominal + center * e.unit,
                        &[(j, half_width * e.unit)],
                        radius,
                    ));
                }
            }
            let [q_des, dq_des, ddq_des] = sets;
            let q = buffer_each(&q_des, bound.position)?;
            let dq = buffer_each(&dq_des, bound.velocity)?;

            out.intervals.push((from, to));
            out.q_des.push(q_des);
            out.dq_des.push(dq_des);
            out.ddq_des.push(ddq_des);
            out.q.push(q);
            out.dq.push(dq);
        }
        Ok(out)
    }
}

fn buffer_each(sets: &[ParamZonotope], radius: f64) -> RtdResult<Vec<ParamZonotope>> {
    if radius <= 0.0 {
        return Ok(sets.to_vec());
    }
    sets.iter()
        .map(|s| s.buffered(&DMatrix::from_element(1, 1, radius)))
        .collect()
}

/// Planar serial arm of revolute joints about the z axis
///
/// Link `l` spans from joint `l` to joint `l + 1` and is a capsule of
/// `link_radius` around that segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanarArmOccupancy {
    pub link_lengths: Vec<f64>,
    pub link_radius: f64,
    #[serde(default)]
    pub base: [f64; 2],
}

/// Angle set `θ = θ̄ + Σ g_i k[id_i] ± r` of one link
struct AngleSet {
    nominal: f64,
    dependent: Vec<(usize, f64)>,
    radius: f64,
}

impl AngleSet {
    /// Largest possible `|θ - θ̄|`
    fn spread(&self) -> f64 {
        self.dependent.iter().map(|(_, g)| g.abs()).sum::<f64>() + self.radius
    }
}

/// Collects the terms of a 2-D parameterized set
struct PlanarSetBuilder {
    center: DVector<f64>,
    dep_cols: Vec<[f64; 2]>,
    dep_ids: Vec<usize>,
    indep_cols: Vec<[f64; 2]>,
    box_radius: f64,
}

impl PlanarSetBuilder {
    fn new(origin: [f64; 2]) -> Self {
        PlanarSetBuilder {
            center: DVector::from_vec(origin.to_vec()),
            dep_cols: Vec::new(),
            dep_ids: Vec::new(),
            indep_cols: Vec::new(),
            box_radius: 0.0,
        }
    }

    /// Add `length · (cos θ, sin θ)` linearized around `θ̄`
    ///
    /// The second-order remainder is bounded by `length · spread² / 2` per
    /// axis and goes into the box term.
    fn add_rotated(&mut self, length: f64, angle: &AngleSet) {
        let (s, c) = angle.nominal.sin_cos();
        self.center[0] += length * c;
        self.center[1] += length * s;
        let tangent = [-length * s, length * c];
        for &(id, g) in &angle.dependent {
            self.dep_cols.push([tangent[0] * g, tangent[1] * g]);
            self.dep_ids.push(id);
        }
        if angle.radius > 0.0 {
            self.indep_cols.push([tangent[0] * angle.radius, tangent[1] * angle.radius]);
        }
        let spread = angle.spread();
        self.box_radius += 0.5 * length.abs() * spread * spread;
    }

    fn build(self) -> RtdResult<ParamZonotope> {
        let dep = DMatrix::from_fn(2, self.dep_cols.len(), |r, c| self.dep_cols[c][r]);
        let mut indep = DMatrix::from_fn(2, self.indep_cols.len() + 2, |r, c| {
            self.indep_cols.get(c).map_or(0.0, |col| col[r])
        });
        let n = self.indep_cols.len();
        indep[(0, n)] = self.box_radius;
        indep[(1, n + 1)] = self.box_radius;
        ParamZonotope::new(self.center, dep, self.dep_ids, indep)
    }
}

impl PlanarArmOccupancy {
    pub fn new(link_lengths: Vec<f64>, link_radius: f64) -> RtdResult<Self> {
        if link_lengths.iter().any(|l| !(l.is_finite() && *l > 0.0)) {
            return Err(RtdError::config("link lengths must be finite and positive"));
        }
        if !(link_radius.is_finite() && link_radius >= 0.0) {
            return Err(RtdError::config("link radius must be finite and non-negative"));
        }
        Ok(PlanarArmOccupancy {
            link_lengths,
            link_radius,
            base: [0.0, 0.0],
        })
    }

    pub fn num_links(&self) -> usize {
        self.link_lengths.len()
    }

    /// Cumulative link angle sets from per-joint position sets
    fn angle_sets(joint_sets: &[ParamZonotope]) -> Vec<AngleSet> {
        let mut angles = Vec::with_capacity(joint_sets.len());
        let mut nominal = 0.0;
        let mut dependent: Vec<(usize, f64)> = Vec::new();
        let mut radius = 0.0;
        for q in joint_sets {
            nominal += q.center()[0];
            for (col, &id) in q.dep_gens().column_iter().zip(q.dep_ids().iter()) {
                dependent.push((id, col[0]));
            }
            radius += q.independent_radius()[0];
            angles.push(AngleSet {
                nominal,
                dependent: dependent.clone(),
                radius,
            });
        }
        angles
    }

    /// Occupancy of every link for one time step
    pub fn links_at(&self, joint_sets: &[ParamZonotope]) -> RtdResult<Vec<ParamZonotope>> {
        if joint_sets.len() != self.num_links() {
            return Err(RtdError::dimension("planar arm joints", self.num_links(), joint_sets.len()));
        }
        let angles = Self::angle_sets(joint_sets);
        let mut links = Vec::with_capacity(self.num_links());
        for (l, angle) in angles.iter().enumerate() {
            let mut builder = PlanarSetBuilder::new(self.base);
            for (m, prev) in angles.iter().enumerate().take(l) {
                builder.add_rotated(self.link_lengths[m], prev);
            }
            // link midpoint, then the half-link extent along the nominal axis
            let half = 0.5 * self.link_lengths[l];
            builder.add_rotated(half, angle);
            let (s, c) = angle.nominal.sin_cos();
            builder.indep_cols.push([half * c, half * s]);
            // rotation of the half extent away from the nominal axis
            builder.box_radius += half * angle.spread() + self.link_radius;
            links.push(builder.build()?);
        }
        Ok(links)
    }
}

impl OccupancyModel for PlanarArmOccupancy {
    fn workspace_dim(&self) -> usize {
        2
    }

    fn link_occupancy(&self, jrs: &JrsInstance) -> RtdResult<Vec<Vec<ParamZonotope>>> {
        jrs.joint_sets().q.iter().map(|joints| self.links_at(joints)).collect()
    }
}

/// Independent joints with inertia, viscous damping and a constant load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoupledJointDynamics {
    pub inertia: Vec<f64>,
    pub damping: Vec<f64>,
    pub gravity: Vec<f64>,
}

impl DecoupledJointDynamics {
    pub fn new(inertia: Vec<f64>, damping: Vec<f64>, gravity: Vec<f64>) -> RtdResult<Self> {
        let n = inertia.len();
        if damping.len() != n {
            return Err(RtdError::dimension("joint damping", n, damping.len()));
        }
        if gravity.len() != n {
            return Err(RtdError::dimension("joint gravity load", n, gravity.len()));
        }
        Ok(DecoupledJointDynamics {
            inertia,
            damping,
            gravity,
        })
    }

    pub fn num_joints(&self) -> usize {
        self.inertia.len()
    }
}

impl TorqueModel for DecoupledJointDynamics {
    fn torque_sets(&self, jrs: &JrsInstance) -> RtdResult<Vec<Vec<ParamZonotope>>> {
        let sets = jrs.joint_sets();
        if sets.num_joints() != self.num_joints() {
            return Err(RtdError::dimension("joint dynamics", sets.num_joints(), self.num_joints()));
        }
        sets.ddq_des
            .iter()
            .zip(sets.dq.iter())
            .map(|(acc, vel)| {
                (0..self.num_joints())
                    .map(|j| {
                        let tau = acc[j].scale(self.inertia[j]).add(&vel[j].scale(self.damping[j]))?;
                        tau.offset(&DVector::from_element(1, self.gravity[j]))
                    })
                    .collect()
            })
            .collect()
    }
}
