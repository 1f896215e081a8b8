//! Bound-constrained augmented Lagrangian optimization engine
//!
//! Inequalities arrive as `h(k) ≤ 0` and are handled internally as
//! `g(k) = -h(k) ≥ 0`. The inner solver is a projected gradient descent with
//! Armijo backtracking on the augmented Lagrangian; the outer loop updates
//! the multipliers and grows the penalty when the violation stalls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use nalgebra::DVector;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::common::{
    ConstraintEval, ObjectiveEval, OptimizationEngine, OptimizationResult, ParamBounds, RtdError, RtdResult,
    SolverStatus,
};
use crate::trajopt::TrajOptProps;

/// Largest step the line search starts from
const MAX_STEP: f64 = 1e6;
/// Backtracking halvings before a step is given up
const MAX_BACKTRACKS: usize = 60;

/// Shared flag to abandon a running optimization from another thread
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentedLagrangianOptions {
    pub max_outer_iterations: usize,
    pub max_inner_iterations: usize,
    /// Largest constraint violation still counted as feasible
    pub feasibility_tolerance: f64,
    /// Projected-gradient norm at which the inner solve stops
    pub optimality_tolerance: f64,
    pub initial_penalty: f64,
    pub penalty_growth: f64,
    pub max_penalty: f64,
    /// The penalty grows unless the violation drops below this fraction
    pub sufficient_reduction: f64,
    /// Armijo constant
    pub armijo: f64,
    /// Relative step of the central-difference objective gradient
    pub finite_difference_step: f64,
}

impl Default for AugmentedLagrangianOptions {
    fn default() -> Self {
        AugmentedLagrangianOptions {
            max_outer_iterations: 30,
            max_inner_iterations: 200,
            feasibility_tolerance: 1e-6,
            optimality_tolerance: 1e-8,
            initial_penalty: 10.0,
            penalty_growth: 10.0,
            max_penalty: 1e9,
            sufficient_reduction: 0.25,
            armijo: 1e-4,
            finite_difference_step: 1e-7,
        }
    }
}

/// Everything known about one evaluated point
#[derive(Debug, Clone)]
struct Point {
    k: DVector<f64>,
    cost: f64,
    grad_f: DVector<f64>,
    cons: ConstraintEval,
}

impl Point {
    fn is_finite(&self) -> bool {
        self.cost.is_finite()
            && self.grad_f.iter().all(|v| v.is_finite())
            && self.cons.h.iter().all(|v| v.is_finite())
            && self.cons.heq.iter().flat_map(|v| v.iter()).all(|v| v.is_finite())
    }

    fn violation(&self) -> f64 {
        self.cons.max_violation()
    }
}

/// Multipliers and penalty of the augmented Lagrangian
#[derive(Debug, Clone)]
struct Multipliers {
    ineq: DVector<f64>,
    eq: DVector<f64>,
    rho: f64,
}

impl Multipliers {
    fn fit(&mut self, cons: &ConstraintEval) {
        if self.ineq.len() != cons.num_inequality() {
            self.ineq = DVector::zeros(cons.num_inequality());
        }
        if self.eq.len() != cons.num_equality() {
            self.eq = DVector::zeros(cons.num_equality());
        }
    }

    /// `max(0, μ - ρ g)` with `g = -h`
    fn shifted(&self, cons: &ConstraintEval) -> DVector<f64> {
        DVector::from_fn(cons.num_inequality(), |i, _| (self.ineq[i] + self.rho * cons.h[i]).max(0.0))
    }

    fn merit(&self, p: &Point) -> f64 {
        let psi = self.shifted(&p.cons);
        let mut value = p.cost + (psi.norm_squared() - self.ineq.norm_squared()) / (2.0 * self.rho);
        if let Some(heq) = &p.cons.heq {
            value += self.eq.dot(heq) + 0.5 * self.rho * heq.norm_squared();
        }
        value
    }

    fn gradient(&self, p: &Point) -> DVector<f64> {
        let psi = self.shifted(&p.cons);
        let mut grad = p.grad_f.clone();
        if !psi.is_empty() {
            grad += p.cons.grad_h.tr_mul(&psi);
        }
        if let (Some(heq), Some(grad_heq)) = (&p.cons.heq, &p.cons.grad_heq) {
            let weights = &self.eq + heq * self.rho;
            grad += grad_heq.tr_mul(&weights);
        }
        grad
    }

    fn update(&mut self, p: &Point) {
        self.ineq = self.shifted(&p.cons);
        if let Some(heq) = &p.cons.heq {
            self.eq += heq * self.rho;
        }
    }
}

/// Why the inner loop stopped early
enum Interrupt {
    Timeout,
    Cancelled,
}

struct Problem<'a> {
    objective: &'a mut dyn FnMut(&DVector<f64>) -> RtdResult<ObjectiveEval>,
    constraints: &'a mut dyn FnMut(&DVector<f64>) -> RtdResult<ConstraintEval>,
    bounds: &'a ParamBounds,
    fd_step: f64,
    deadline: Option<Instant>,
    cancellation: &'a CancellationToken,
}

impl<'a> Problem<'a> {
    fn interrupted(&self) -> Option<Interrupt> {
        if self.cancellation.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupt::Timeout),
            _ => None,
        }
    }

    fn evaluate(&mut self, k: DVector<f64>) -> RtdResult<Point> {
        let ObjectiveEval { cost, gradient } = (self.objective)(&k)?;
        let grad_f = match gradient {
            Some(g) if g.len() == k.len() => g,
            Some(g) => return Err(RtdError::dimension("objective gradient", k.len(), g.len())),
            None => self.central_difference(&k)?,
        };
        let cons = (self.constraints)(&k)?;
        Ok(Point { k, cost, grad_f, cons })
    }

    fn central_difference(&mut self, k: &DVector<f64>) -> RtdResult<DVector<f64>> {
        let mut grad = DVector::zeros(k.len());
        for i in 0..k.len() {
            let delta = self.fd_step * k[i].abs().max(1.0);
            let mut plus = k.clone();
            let mut minus = k.clone();
            plus[i] += delta;
            minus[i] -= delta;
            let cost_plus = (self.objective)(&plus)?.cost;
            let cost_minus = (self.objective)(&minus)?.cost;
            grad[i] = (cost_plus - cost_minus) / (2.0 * delta);
        }
        Ok(grad)
    }

    /// Projected gradient descent on the augmented Lagrangian
    ///
    /// Returns whether the point is stationary, and the inner iterations
    /// spent.
    fn minimize(
        &mut self,
        point: &mut Point,
        multipliers: &Multipliers,
        options: &AugmentedLagrangianOptions,
    ) -> RtdResult<Result<(bool, usize), Interrupt>> {
        let mut alpha: f64 = 1.0;
        for iteration in 0..options.max_inner_iterations {
            if let Some(interrupt) = self.interrupted() {
                return Ok(Err(interrupt));
            }
            let grad = multipliers.gradient(point);
            let projected = self.bounds.clamp(&(&point.k - &grad)) - &point.k;
            if projected.amax() <= options.optimality_tolerance {
                return Ok(Ok((true, iteration)));
            }

            let base = multipliers.merit(point);
            alpha = (2.0 * alpha).min(MAX_STEP);
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let trial = self.bounds.clamp(&(&point.k - &grad * alpha));
                let step = &trial - &point.k;
                if step.amax() == 0.0 {
                    break;
                }
                let candidate = self.evaluate(trial)?;
                let value = multipliers.merit(&candidate);
                if candidate.is_finite() && value <= base + options.armijo * grad.dot(&step) {
                    accepted = Some(candidate);
                    break;
                }
                alpha *= 0.5;
            }
            match accepted {
                Some(candidate) => *point = candidate,
                // no decrease left along the projected gradient
                None => return Ok(Ok((true, iteration + 1))),
            }
        }
        Ok(Ok((false, options.max_inner_iterations)))
    }
}

/// Default optimization engine
#[derive(Debug, Clone)]
pub struct AugmentedLagrangianEngine {
    traj_opt_props: TrajOptProps,
    options: AugmentedLagrangianOptions,
    cancellation: CancellationToken,
}

impl AugmentedLagrangianEngine {
    pub fn new(traj_opt_props: TrajOptProps) -> Self {
        Self::with_options(traj_opt_props, AugmentedLagrangianOptions::default())
    }

    pub fn with_options(traj_opt_props: TrajOptProps, options: AugmentedLagrangianOptions) -> Self {
        AugmentedLagrangianEngine {
            traj_opt_props,
            options,
            cancellation: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation flag
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn options(&self) -> &AugmentedLagrangianOptions {
        &self.options
    }

    /// Fill the guess up to the number of parameters and move it into bounds
    fn initial_point(&self, initial_guess: &[f64], bounds: &ParamBounds) -> RtdResult<DVector<f64>> {
        let n = bounds.len();
        if initial_guess.len() > n {
            return Err(RtdError::dimension("initial guess", n, initial_guess.len()));
        }
        let mut rng = rand::thread_rng();
        let k = DVector::from_fn(n, |i, _| {
            if let Some(&v) = initial_guess.get(i) {
                return v;
            }
            let (lo, hi) = (bounds.lower()[i], bounds.upper()[i]);
            if self.traj_opt_props.random_init() && lo.is_finite() && hi.is_finite() {
                Uniform::new_inclusive(lo, hi).sample(&mut rng)
            } else {
                0.0
            }
        });
        Ok(bounds.clamp(&k))
    }
}

impl OptimizationEngine for AugmentedLagrangianEngine {
    fn perform_optimization(
        &self,
        initial_guess: &[f64],
        objective: &mut dyn FnMut(&DVector<f64>) -> RtdResult<ObjectiveEval>,
        constraints: &mut dyn FnMut(&DVector<f64>) -> RtdResult<ConstraintEval>,
        bounds: &ParamBounds,
    ) -> RtdResult<OptimizationResult> {
        let options = &self.options;
        let deadline = self
            .traj_opt_props
            .do_timeout()
            .then(|| Instant::now() + Duration::from_secs_f64(self.traj_opt_props.timeout_time()));
        let start = self.initial_point(initial_guess, bounds)?;
        let mut problem = Problem {
            objective,
            constraints,
            bounds,
            fd_step: options.finite_difference_step,
            deadline,
            cancellation: &self.cancellation,
        };

        let mut point = problem.evaluate(start)?;
        if !point.is_finite() {
            debug!("Non-finite objective or constraints at the initial guess");
            return Ok(OptimizationResult {
                success: false,
                cost: point.cost,
                parameters: point.k,
                status: SolverStatus::NumericalFailure,
                iterations: 0,
            });
        }

        let mut multipliers = Multipliers {
            ineq: DVector::zeros(0),
            eq: DVector::zeros(0),
            rho: options.initial_penalty,
        };
        let mut best_feasible: Option<Point> = None;
        let mut previous_violation = f64::INFINITY;
        let mut iterations = 0;
        let mut status = SolverStatus::MaxIterations;

        for outer in 0..options.max_outer_iterations {
            multipliers.fit(&point.cons);
            let (stationary, spent) = match problem.minimize(&mut point, &multipliers, options)? {
                Ok(done) => done,
                Err(Interrupt::Timeout) => {
                    status = SolverStatus::Timeout;
                    break;
                }
                Err(Interrupt::Cancelled) => {
                    status = SolverStatus::Cancelled;
                    break;
                }
            };
            iterations += spent;

            let violation = point.violation();
            if violation <= options.feasibility_tolerance
                && best_feasible.as_ref().map_or(true, |best| point.cost < best.cost)
            {
                best_feasible = Some(point.clone());
            }
            debug!(
                "Outer iteration {}: cost {:.6e}, violation {:.3e}, penalty {:.1e}",
                outer, point.cost, violation, multipliers.rho
            );
            if stationary && violation <= options.feasibility_tolerance {
                status = SolverStatus::Converged;
                break;
            }

            multipliers.update(&point);
            if violation > options.sufficient_reduction * previous_violation {
                multipliers.rho = (multipliers.rho * options.penalty_growth).min(options.max_penalty);
            }
            previous_violation = violation;
        }

        let feasible_end = point.violation() <= options.feasibility_tolerance;
        let result = match (feasible_end, best_feasible) {
            (true, _) => point,
            (false, Some(best)) => best,
            (false, None) => {
                if status == SolverStatus::MaxIterations {
                    status = SolverStatus::Infeasible;
                }
                point
            }
        };
        let success = result.violation() <= options.feasibility_tolerance
            && !matches!(status, SolverStatus::Timeout | SolverStatus::Cancelled);

        Ok(OptimizationResult {
            success,
            cost: result.cost,
            parameters: result.k,
            status,
            iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn quadratic(target: Vec<f64>) -> impl FnMut(&DVector<f64>) -> RtdResult<ObjectiveEval> {
        let target = DVector::from_vec(target);
        move |k: &DVector<f64>| -> RtdResult<ObjectiveEval> {
            Ok(ObjectiveEval {
                cost: (k - &target).norm_squared(),
                gradient: None,
            })
        }
    }

    fn unconstrained(k: &DVector<f64>) -> RtdResult<ConstraintEval> {
        Ok(ConstraintEval::empty(k.len()))
    }

    #[test]
    fn test_unconstrained_minimum_inside_bounds() {
        let engine = AugmentedLagrangianEngine::new(TrajOptProps::default());
        let bounds = ParamBounds::uniform(2, -1.0, 1.0).unwrap();
        let mut objective = quadratic(vec![0.3, -0.6]);
        let mut constraints = unconstrained;
        let result = engine
            .perform_optimization(&[], &mut objective, &mut constraints, &bounds)
            .unwrap();
        assert!(result.success);
        assert_eq!(result.status, SolverStatus::Converged);
        assert_relative_eq!(result.parameters[0], 0.3, epsilon = 1e-6);
        assert_relative_eq!(result.parameters[1], -0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_bounds_are_respected() {
        let engine = AugmentedLagrangianEngine::new(TrajOptProps::default());
        let bounds = ParamBounds::uniform(1, -1.0, 1.0).unwrap();
        let mut objective = quadratic(vec![3.0]);
        let mut constraints = unconstrained;
        let result = engine
            .perform_optimization(&[0.0], &mut objective, &mut constraints, &bounds)
            .unwrap();
        assert!(result.success);
        assert_relative_eq!(result.parameters[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_active_inequality() {
        // minimize (k - 1)² subject to k ≤ 0.5
        let engine = AugmentedLagrangianEngine::new(TrajOptProps::default());
        let bounds = ParamBounds::uniform(1, -1.0, 1.0).unwrap();
        let mut objective = quadratic(vec![1.0]);
        let mut constraints = |k: &DVector<f64>| -> RtdResult<ConstraintEval> {
            Ok(ConstraintEval::inequality(
                DVector::from_element(1, k[0] - 0.5),
                DMatrix::from_element(1, 1, 1.0),
            ))
        };
        let result = engine
            .perform_optimization(&[], &mut objective, &mut constraints, &bounds)
            .unwrap();
        assert!(result.success);
        assert!(result.parameters[0] <= 0.5 + 1e-6);
        assert_relative_eq!(result.parameters[0], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_equality_constraint() {
        // minimize k0² + k1² subject to k0 + k1 = 1
        let engine = AugmentedLagrangianEngine::new(TrajOptProps::default());
        let bounds = ParamBounds::uniform(2, -2.0, 2.0).unwrap();
        let mut objective = quadratic(vec![0.0, 0.0]);
        let mut constraints = |k: &DVector<f64>| -> RtdResult<ConstraintEval> {
            Ok(ConstraintEval {
                h: DVector::zeros(0),
                heq: Some(DVector::from_element(1, k[0] + k[1] - 1.0)),
                grad_h: DMatrix::zeros(0, 2),
                grad_heq: Some(DMatrix::from_element(1, 2, 1.0)),
            })
        };
        let result = engine
            .perform_optimization(&[], &mut objective, &mut constraints, &bounds)
            .unwrap();
        assert!(result.success);
        assert_relative_eq!(result.parameters[0], 0.5, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_always_violated_is_infeasible() {
        let engine = AugmentedLagrangianEngine::new(TrajOptProps::default());
        let bounds = ParamBounds::uniform(1, -1.0, 1.0).unwrap();
        let mut objective = quadratic(vec![0.2]);
        let mut constraints = |_: &DVector<f64>| -> RtdResult<ConstraintEval> {
            Ok(ConstraintEval::inequality(DVector::from_element(1, 1.0), DMatrix::zeros(1, 1)))
        };
        let result = engine
            .perform_optimization(&[], &mut objective, &mut constraints, &bounds)
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.status, SolverStatus::Infeasible);
    }

    #[test]
    fn test_cancelled_run_fails() {
        let engine = AugmentedLagrangianEngine::new(TrajOptProps::default());
        engine.cancellation_token().cancel();
        let bounds = ParamBounds::uniform(1, -1.0, 1.0).unwrap();
        let mut objective = quadratic(vec![0.2]);
        let mut constraints = unconstrained;
        let result = engine
            .perform_optimization(&[], &mut objective, &mut constraints, &bounds)
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.status, SolverStatus::Cancelled);
    }

    #[test]
    fn test_timeout_run_fails() {
        let props = TrajOptProps::default().with_timeout(1e-9).unwrap();
        let engine = AugmentedLagrangianEngine::new(props);
        let bounds = ParamBounds::uniform(1, -1.0, 1.0).unwrap();
        let mut slow = |k: &DVector<f64>| -> RtdResult<ObjectiveEval> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(ObjectiveEval {
                cost: (k[0] - 0.2).powi(2),
                gradient: None,
            })
        };
        let mut constraints = unconstrained;
        let result = engine
            .perform_optimization(&[], &mut slow, &mut constraints, &bounds)
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.status, SolverStatus::Timeout);
    }

    #[test]
    fn test_random_padding_stays_in_bounds() {
        let props = TrajOptProps::default().with_random_init(true);
        let engine = AugmentedLagrangianEngine::new(props);
        let bounds = ParamBounds::new(DVector::from_vec(vec![-1.0, 2.0, -3.0]), DVector::from_vec(vec![1.0, 4.0, 3.0]))
            .unwrap();
        let k = engine.initial_point(&[0.5], &bounds).unwrap();
        assert_eq!(k[0], 0.5);
        assert!(bounds.contains(&k));
        assert!(engine.initial_point(&[0.0; 4], &bounds).is_err());
    }
}
