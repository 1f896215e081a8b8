//! Merging of the per-family constraint callbacks of one problem

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, VecDeque};
use std::hash::{Hash, Hasher};

use log::debug;
use nalgebra::{DMatrix, DVector};
use ordered_float::OrderedFloat;

use crate::common::{ConstraintEval, NlConstraint, RtdError, RtdResult};

/// Number of recent evaluations kept by default
pub const DEFAULT_CONSTRAINT_BUFFER_SIZE: usize = 16;

/// Hash function over parameter vectors
pub type ParamHasher = Box<dyn Fn(&DVector<f64>) -> u64 + Send + Sync>;

/// Hash of the exact bit patterns of `k`
pub fn hash_params(k: &DVector<f64>) -> u64 {
    let mut hasher = DefaultHasher::new();
    k.len().hash(&mut hasher);
    for v in k.iter() {
        OrderedFloat(*v).hash(&mut hasher);
    }
    hasher.finish()
}

/// Bounded ring buffer of `(k, value)` pairs
///
/// Lookups hash `k` first and then compare it exactly, so two vectors only
/// match if every entry is equal.
pub struct RingBufferCache<V> {
    capacity: usize,
    hasher: ParamHasher,
    entries: VecDeque<(u64, DVector<f64>, V)>,
}

impl<V: Clone> RingBufferCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self::with_hasher(capacity, Box::new(hash_params))
    }

    pub fn with_hasher(capacity: usize, hasher: ParamHasher) -> Self {
        RingBufferCache {
            capacity,
            hasher,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, k: &DVector<f64>) -> Option<V> {
        let hash = (self.hasher)(k);
        self.entries
            .iter()
            .find(|(h, key, _)| *h == hash && key == k)
            .map(|(_, _, value)| value.clone())
    }

    /// Store a value, overwriting the oldest entry when full
    pub fn insert(&mut self, k: &DVector<f64>, value: V) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let hash = (self.hasher)(k);
        self.entries.push_back((hash, k.clone(), value));
    }
}

/// Evaluates every family's constraint and stacks the results
///
/// Families are visited in name order, so the rows of `h` and its Jacobian
/// always come out in the same order for the same set of families.
pub struct ConstraintMerger {
    num_params: usize,
    constraints: BTreeMap<String, Box<dyn NlConstraint>>,
    buffer: RingBufferCache<ConstraintEval>,
    evaluations: usize,
}

impl ConstraintMerger {
    pub fn new(num_params: usize, constraints: BTreeMap<String, Box<dyn NlConstraint>>) -> Self {
        Self::with_buffer(num_params, constraints, RingBufferCache::new(DEFAULT_CONSTRAINT_BUFFER_SIZE))
    }

    pub fn with_buffer(
        num_params: usize,
        constraints: BTreeMap<String, Box<dyn NlConstraint>>,
        buffer: RingBufferCache<ConstraintEval>,
    ) -> Self {
        ConstraintMerger {
            num_params,
            constraints,
            buffer,
            evaluations: 0,
        }
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.constraints.keys().map(|s| s.as_str())
    }

    /// Number of evaluations that missed the buffer
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn evaluate(&mut self, k: &DVector<f64>) -> RtdResult<ConstraintEval> {
        if k.len() != self.num_params {
            return Err(RtdError::dimension("merged constraint parameters", self.num_params, k.len()));
        }
        if let Some(eval) = self.buffer.get(k) {
            return Ok(eval);
        }
        let eval = self.evaluate_all(k)?;
        self.evaluations += 1;
        self.buffer.insert(k, eval.clone());
        Ok(eval)
    }

    fn evaluate_all(&self, k: &DVector<f64>) -> RtdResult<ConstraintEval> {
        let mut parts = Vec::with_capacity(self.constraints.len());
        for (family, constraint) in &self.constraints {
            let eval = constraint
                .evaluate(k)
                .map_err(|e| RtdError::reach_set(family.as_str(), e.to_string()))?;
            check_shape(family, &eval, self.num_params)?;
            parts.push(eval);
        }

        let n_ineq: usize = parts.iter().map(|p| p.num_inequality()).sum();
        let n_eq: usize = parts.iter().map(|p| p.num_equality()).sum();
        let mut h = DVector::zeros(n_ineq);
        let mut grad_h = DMatrix::zeros(n_ineq, self.num_params);
        let mut heq = DVector::zeros(n_eq);
        let mut grad_heq = DMatrix::zeros(n_eq, self.num_params);

        let (mut row, mut eq_row) = (0, 0);
        for part in &parts {
            let n = part.num_inequality();
            h.rows_mut(row, n).copy_from(&part.h);
            grad_h.rows_mut(row, n).copy_from(&part.grad_h);
            row += n;
            if let (Some(v), Some(g)) = (&part.heq, &part.grad_heq) {
                heq.rows_mut(eq_row, v.len()).copy_from(v);
                grad_heq.rows_mut(eq_row, v.len()).copy_from(g);
                eq_row += v.len();
            }
        }

        Ok(ConstraintEval {
            h,
            heq: (n_eq > 0).then_some(heq),
            grad_h,
            grad_heq: (n_eq > 0).then_some(grad_heq),
        })
    }

    /// Total inequality and equality counts at `k`
    pub fn count(&mut self, k: &DVector<f64>) -> RtdResult<(usize, usize)> {
        let eval = self.evaluate(k)?;
        debug!(
            "Merged {} inequality and {} equality constraints from {:?}",
            eval.num_inequality(),
            eval.num_equality(),
            self.constraints.keys().collect::<Vec<_>>()
        );
        Ok((eval.num_inequality(), eval.num_equality()))
    }
}

fn check_shape(family: &str, eval: &ConstraintEval, num_params: usize) -> RtdResult<()> {
    if eval.grad_h.shape() != (eval.h.len(), num_params) {
        return Err(RtdError::reach_set(
            family,
            format!(
                "inequality Jacobian is {:?}, expected ({}, {})",
                eval.grad_h.shape(),
                eval.h.len(),
                num_params
            ),
        ));
    }
    match (&eval.heq, &eval.grad_heq) {
        (None, None) => Ok(()),
        (Some(v), Some(g)) if g.shape() == (v.len(), num_params) => Ok(()),
        _ => Err(RtdError::reach_set(family, "equality values and Jacobian do not match")),
    }
}
