//! Forward occupancy (FO) family: obstacle avoidance constraints
//!
//! For every (time step, link, obstacle) triple that can possibly collide,
//! the constraint is
//!
//! ```text
//! h(k) = -max_i (A_i · FO(k) - b_i) ≤ 0
//! ```
//!
//! where `A x ≤ b` is the obstacle buffered by the non-sliceable part of the
//! link occupancy. Triples whose occupancy center lies outside the obstacle
//! buffered by the whole occupancy are pruned.

use std::any::Any;
use std::sync::Arc;

use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::backend::OccupancyModel;
use super::generator::{GenerationOptions, ProblemSets, ReachSetCache, ReachSetGenerator};
use super::jrs::{as_jrs, JrsGenerator};
use crate::common::{
    ConstraintEval, NlConstraint, ParamBounds, ReachSetInstance, RobotState, RtdError, RtdResult, WorldState,
};
use crate::sets::{Halfspaces, ParamZonotope};

pub const FO_FAMILY: &str = "fo";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoOptions {
    /// Order the occupancy is reduced to before building halfspaces
    pub reduce_order: usize,
    /// Triples whose buffered check exceeds this are pruned
    pub pruning_tolerance: f64,
}

impl Default for FoOptions {
    fn default() -> Self {
        FoOptions {
            reduce_order: 3,
            pruning_tolerance: 1e-6,
        }
    }
}

/// Link occupancy over the horizon for one problem
#[derive(Debug, Clone)]
pub struct FoInstance {
    /// `[time step][link]`
    occupancy: Vec<Vec<ParamZonotope>>,
    input_range: ParamBounds,
    options: FoOptions,
}

/// Constraint of one surviving (time step, link, obstacle) triple
struct ObstacleConstraint {
    halfspaces: Halfspaces,
    /// Occupancy without its independent generators
    tight: ParamZonotope,
    /// `A · ∂FO/∂k`, constant since the occupancy is affine in `k`
    directional_jacobian: DMatrix<f64>,
}

impl ObstacleConstraint {
    fn evaluate(&self, k: &DVector<f64>) -> RtdResult<(f64, DVector<f64>)> {
        let p = self.tight.slice(k)?;
        let (max, row) = self.halfspaces.max_violation(&p);
        let grad = -self.directional_jacobian.row(row).transpose();
        Ok((-max, grad))
    }
}

/// All obstacle constraints of one FO instance
pub struct ObstacleConstraints {
    num_params: usize,
    constraints: Vec<ObstacleConstraint>,
}

impl ObstacleConstraints {
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

impl NlConstraint for ObstacleConstraints {
    fn evaluate(&self, k: &DVector<f64>) -> RtdResult<ConstraintEval> {
        if k.len() != self.num_params {
            return Err(RtdError::dimension("constraint parameters", self.num_params, k.len()));
        }
        let n = self.constraints.len();
        let mut h = DVector::zeros(n);
        let mut grad_h = DMatrix::zeros(n, self.num_params);
        for (i, c) in self.constraints.iter().enumerate() {
            let (value, grad) = c.evaluate(k)?;
            h[i] = value;
            grad_h.row_mut(i).copy_from(&grad.transpose());
        }
        Ok(ConstraintEval::inequality(h, grad_h))
    }
}

impl FoInstance {
    pub fn new(occupancy: Vec<Vec<ParamZonotope>>, input_range: ParamBounds, options: FoOptions) -> Self {
        FoInstance {
            occupancy,
            input_range,
            options,
        }
    }

    pub fn occupancy(&self) -> &[Vec<ParamZonotope>] {
        &self.occupancy
    }

    /// Build the obstacle constraints for `world_state`
    pub fn obstacle_constraints(&self, world_state: &WorldState) -> RtdResult<ObstacleConstraints> {
        let num_params = self.input_range.len();
        let mut constraints = Vec::new();
        let mut considered = 0usize;

        for links in &self.occupancy {
            for link in links {
                for obstacle in &world_state.obstacles {
                    if obstacle.dim() != link.dim() {
                        return Err(RtdError::dimension("obstacle", link.dim(), obstacle.dim()));
                    }
                    considered += 1;

                    // can this link reach the obstacle at all?
                    let whole = obstacle.buffered(&link.all_generators())?.halfspaces();
                    let (outside, _) = whole.max_violation(link.center());
                    if outside >= self.options.pruning_tolerance {
                        continue;
                    }

                    let reduced = link.reduce_independent(self.options.reduce_order);
                    let halfspaces = obstacle.buffered(reduced.indep_gens())?.halfspaces();
                    let tight = reduced.sliceable_part();
                    let directional_jacobian = &halfspaces.a * tight.slice_jacobian(num_params)?;
                    constraints.push(ObstacleConstraint {
                        halfspaces,
                        tight,
                        directional_jacobian,
                    });
                }
            }
        }

        debug!(
            "FO kept {} of {} obstacle constraints",
            constraints.len(),
            considered
        );
        Ok(ObstacleConstraints {
            num_params,
            constraints,
        })
    }
}

impl ReachSetInstance for FoInstance {
    fn input_range(&self) -> &ParamBounds {
        &self.input_range
    }

    fn num_parameters(&self) -> usize {
        self.input_range.len()
    }

    fn gen_nl_constraint(&self, world_state: &WorldState) -> RtdResult<Box<dyn NlConstraint>> {
        Ok(Box::new(self.obstacle_constraints(world_state)?))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Generator of forward occupancy instances
///
/// Never caches its instances: a fresh occupancy is built for every call.
pub struct FoGenerator {
    jrs: Arc<JrsGenerator>,
    occupancy: Arc<dyn OccupancyModel>,
    options: FoOptions,
    cache: ReachSetCache,
}

impl FoGenerator {
    pub fn new(jrs: Arc<JrsGenerator>, occupancy: Arc<dyn OccupancyModel>, options: FoOptions) -> RtdResult<Self> {
        if options.reduce_order < 1 {
            return Err(RtdError::config("FO reduce order must be at least 1"));
        }
        Ok(FoGenerator {
            jrs,
            occupancy,
            options,
            cache: ReachSetCache::new(0),
        })
    }
}

impl ReachSetGenerator for FoGenerator {
    fn family(&self) -> &str {
        FO_FAMILY
    }

    fn cache(&self) -> &ReachSetCache {
        &self.cache
    }

    fn generate_reachable_set(&self, robot_state: &RobotState, _options: &GenerationOptions) -> RtdResult<ProblemSets> {
        let jrs_sets = self.jrs.get_reachable_set(robot_state, false, &GenerationOptions::new())?;
        info!("Generating forward occupancy!");
        let mut out = ProblemSets::new();
        for (&problem_id, instance) in &jrs_sets {
            let jrs = as_jrs(instance.as_ref())?;
            let occupancy = self.occupancy.link_occupancy(jrs)?;
            let fo = FoInstance::new(occupancy, jrs.input_range().clone(), self.options);
            out.insert(problem_id, Arc::new(fo));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reachsets::{AnalyticJointReachability, JrsOptions, ParameterRange, PlanarArmOccupancy};
    use crate::sets::Zonotope;
    use crate::trajopt::TrajOptProps;
    use approx::assert_relative_eq;

    fn single_link_instance(center: [f64; 2], dep: [f64; 2], indep: f64) -> FoInstance {
        let link = ParamZonotope::new(
            DVector::from_vec(center.to_vec()),
            DMatrix::from_column_slice(2, 1, &dep),
            vec![0],
            DMatrix::from_diagonal_element(2, 2, indep),
        )
        .unwrap();
        FoInstance::new(vec![vec![link]], ParamBounds::uniform(1, -1.0, 1.0).unwrap(), FoOptions::default())
    }

    fn box_obstacle(center: [f64; 2], half: f64) -> Zonotope {
        Zonotope::from_box(DVector::from_vec(center.to_vec()), &DVector::from_element(2, half)).unwrap()
    }

    #[test]
    fn test_far_obstacle_is_pruned() {
        let fo = single_link_instance([0.0, 0.0], [1.0, 0.0], 0.1);
        let world = WorldState::from_obstacles(vec![box_obstacle([5.0, 0.0], 0.5)]);
        let cons = fo.obstacle_constraints(&world).unwrap();
        assert!(cons.is_empty());
        let eval = cons.evaluate(&DVector::zeros(1)).unwrap();
        assert_eq!(eval.num_inequality(), 0);
    }

    #[test]
    fn test_reachable_obstacle_constraint_sign_and_gradient() {
        // link point at x = k, obstacle box [1.5, 2.5] x [-0.5, 0.5]
        let fo = single_link_instance([0.0, 0.0], [2.0, 0.0], 0.1);
        let world = WorldState::from_obstacles(vec![box_obstacle([2.0, 0.0], 0.5)]);
        let cons = fo.obstacle_constraints(&world).unwrap();
        assert_eq!(cons.len(), 1);

        // k = 0: point at 0, outside by 1.5 - 0.1
        let safe = cons.evaluate(&DVector::zeros(1)).unwrap();
        assert_relative_eq!(safe.h[0], -1.4, epsilon = 1e-9);
        assert_relative_eq!(safe.grad_h[(0, 0)], 2.0, epsilon = 1e-9);

        // k = 1: point at 2, inside the obstacle
        let unsafe_eval = cons.evaluate(&DVector::from_element(1, 1.0)).unwrap();
        assert!(unsafe_eval.h[0] > 0.0);
    }

    #[test]
    fn test_constraint_generation_leaves_instance_untouched() {
        let indep = DMatrix::from_fn(2, 12, |r, c| 0.01 * (r + c + 1) as f64);
        let link = ParamZonotope::new(DVector::zeros(2), DMatrix::zeros(2, 0), vec![], indep).unwrap();
        let fo = FoInstance::new(vec![vec![link]], ParamBounds::uniform(1, -1.0, 1.0).unwrap(), FoOptions::default());
        let world = WorldState::from_obstacles(vec![box_obstacle([0.2, 0.0], 0.3)]);
        fo.obstacle_constraints(&world).unwrap();
        assert_eq!(fo.occupancy()[0][0].indep_gens().ncols(), 12);
    }

    #[test]
    fn test_obstacle_dimension_mismatch() {
        let fo = single_link_instance([0.0, 0.0], [1.0, 0.0], 0.1);
        let obstacle = Zonotope::from_box(DVector::zeros(3), &DVector::from_element(3, 1.0)).unwrap();
        let world = WorldState::from_obstacles(vec![obstacle]);
        assert!(fo.gen_nl_constraint(&world).is_err());
    }

    #[test]
    fn test_generator_never_caches() {
        let props = TrajOptProps::default();
        let jrs = Arc::new(
            JrsGenerator::new(
                props,
                JrsOptions {
                    range: Some(ParameterRange::Fixed {
                        center: 0.0,
                        half_width: 0.5,
                    }),
                    ..JrsOptions::default()
                },
                Arc::new(AnalyticJointReachability),
            )
            .unwrap(),
        );
        let arm: Arc<dyn OccupancyModel> = Arc::new(PlanarArmOccupancy::new(vec![1.0, 1.0], 0.05).unwrap());
        let fo = FoGenerator::new(jrs.clone(), arm, FoOptions::default()).unwrap();
        let state = RobotState::at_rest(0.0, DVector::zeros(2)).unwrap();
        let opts = GenerationOptions::new();
        let a = fo.get_reachable_set(&state, false, &opts).unwrap();
        let b = fo.get_reachable_set(&state, false, &opts).unwrap();
        assert!(!Arc::ptr_eq(&a[&1], &b[&1]));
        // the underlying JRS is shared through its own cache
        assert_eq!(jrs.cache().len(), 1);
        assert_eq!(a[&1].num_parameters(), 2);
    }
}
