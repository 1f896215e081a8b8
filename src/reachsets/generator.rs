//! Reachable set generators and their bounded cache
//!
//! A generator wraps one reachable set family. Implementors only supply
//! [`ReachSetGenerator::generate_reachable_set`]; the provided
//! [`ReachSetGenerator::get_reachable_set`] memoizes results per robot state
//! identity and generation options in a bounded FIFO cache.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::common::{ProblemId, ReachSetInstance, RobotState, RtdError, RtdResult};

/// Instances produced by one generator, keyed by problem id
pub type ProblemSets = BTreeMap<ProblemId, Arc<dyn ReachSetInstance>>;

/// Extra, family-specific arguments of one generation call
///
/// Stored ordered so that equal options always produce the same cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions(BTreeMap<String, serde_json::Value>);

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical string form, used as part of the cache key
    pub fn canonical_string(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{{{}}}", parts.join(","))
    }
}

/// Bounded FIFO of `(key, sets)` pairs, safe to share between threads
///
/// Hits return clones of the stored `Arc`s, so callers see the exact same
/// instances that were cached.
#[derive(Debug)]
pub struct ReachSetCache {
    max_size: usize,
    entries: Mutex<VecDeque<(String, ProblemSets)>>,
}

impl ReachSetCache {
    pub fn new(max_size: usize) -> Self {
        ReachSetCache {
            max_size,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<(String, ProblemSets)>> {
        // entries are only ever pushed or popped whole, so a poisoned lock
        // still holds a consistent queue
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn get(&self, key: &str) -> Option<ProblemSets> {
        self.lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, sets)| sets.clone())
    }

    /// Append an entry, evicting the oldest ones beyond `max_size`
    pub fn insert(&self, key: String, sets: ProblemSets) {
        let mut entries = self.lock();
        entries.push_back((key, sets));
        while entries.len() > self.max_size {
            entries.pop_front();
        }
    }
}

/// Cache key of a generation call
pub fn cache_key(robot_state: &RobotState, options: &GenerationOptions) -> String {
    format!("{}{}", robot_state.id().value(), options.canonical_string())
}

/// Generator of one reachable set family
pub trait ReachSetGenerator: Send + Sync {
    /// Family name, used to key instances within a problem
    fn family(&self) -> &str;

    fn cache(&self) -> &ReachSetCache;

    /// Whether building constraints from this generator's instances changes
    /// them; such generators must not cache
    fn mutates_instances(&self) -> bool {
        false
    }

    /// Cache key of a call; families that ignore some options leave them out
    fn generation_key(&self, robot_state: &RobotState, options: &GenerationOptions) -> String {
        cache_key(robot_state, options)
    }

    /// Always builds new instances for `robot_state`
    fn generate_reachable_set(&self, robot_state: &RobotState, options: &GenerationOptions) -> RtdResult<ProblemSets>;

    /// Instances for `robot_state`, served from the cache when possible
    fn get_reachable_set(
        &self,
        robot_state: &RobotState,
        ignore_cache: bool,
        options: &GenerationOptions,
    ) -> RtdResult<ProblemSets> {
        let cache = self.cache();
        if ignore_cache || cache.max_size() < 1 {
            return self.generate_reachable_set(robot_state, options);
        }

        let key = self.generation_key(robot_state, options);
        if let Some(sets) = cache.get(&key) {
            debug!("Reachable set cache hit for {} ({})", self.family(), key);
            return Ok(sets);
        }
        debug!("Reachable set cache miss for {} ({})", self.family(), key);
        let sets = self.generate_reachable_set(robot_state, options)?;
        cache.insert(key, sets.clone());
        Ok(sets)
    }
}

/// Reject generators that mutate their instances but still cache them
pub fn check_cache_contract(generator: &dyn ReachSetGenerator) -> RtdResult<()> {
    if generator.mutates_instances() && generator.cache().max_size() >= 1 {
        return Err(RtdError::config(format!(
            "reachable set family '{}' mutates its instances and must not cache (cache size {})",
            generator.family(),
            generator.cache().max_size()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{NlConstraint, ParamBounds, WorldState};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingInstance {
        bounds: ParamBounds,
    }

    impl ReachSetInstance for CountingInstance {
        fn input_range(&self) -> &ParamBounds {
            &self.bounds
        }

        fn num_parameters(&self) -> usize {
            self.bounds.len()
        }

        fn gen_nl_constraint(&self, _world_state: &WorldState) -> RtdResult<Box<dyn NlConstraint>> {
            Err(RtdError::reach_set("counting", "not used"))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct CountingGenerator {
        cache: ReachSetCache,
        calls: AtomicUsize,
        mutates: bool,
    }

    impl CountingGenerator {
        fn new(cache_size: usize) -> Self {
            CountingGenerator {
                cache: ReachSetCache::new(cache_size),
                calls: AtomicUsize::new(0),
                mutates: false,
            }
        }
    }

    impl ReachSetGenerator for CountingGenerator {
        fn family(&self) -> &str {
            "counting"
        }

        fn cache(&self) -> &ReachSetCache {
            &self.cache
        }

        fn mutates_instances(&self) -> bool {
            self.mutates
        }

        fn generate_reachable_set(&self, _robot_state: &RobotState, _options: &GenerationOptions) -> RtdResult<ProblemSets> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut sets = ProblemSets::new();
            let instance: Arc<dyn ReachSetInstance> = Arc::new(CountingInstance {
                bounds: ParamBounds::uniform(1, -1.0, 1.0)?,
            });
            sets.insert(1, instance);
            Ok(sets)
        }
    }

    fn state() -> RobotState {
        RobotState::at_rest(0.0, nalgebra::DVector::zeros(1)).unwrap()
    }

    #[test]
    fn test_cache_hit_returns_same_instance() {
        let generator = CountingGenerator::new(1);
        let s = state();
        let opts = GenerationOptions::new();
        let a = generator.get_reachable_set(&s, false, &opts).unwrap();
        let b = generator.get_reachable_set(&s, false, &opts).unwrap();
        assert!(Arc::ptr_eq(&a[&1], &b[&1]));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_cache_never_reuses() {
        let generator = CountingGenerator::new(0);
        let s = state();
        let opts = GenerationOptions::new();
        let a = generator.get_reachable_set(&s, false, &opts).unwrap();
        let b = generator.get_reachable_set(&s, false, &opts).unwrap();
        assert!(!Arc::ptr_eq(&a[&1], &b[&1]));
        assert!(generator.cache().is_empty());
    }

    #[test]
    fn test_ignore_cache_bypasses_without_storing() {
        let generator = CountingGenerator::new(2);
        let s = state();
        let opts = GenerationOptions::new();
        generator.get_reachable_set(&s, true, &opts).unwrap();
        assert!(generator.cache().is_empty());
    }

    #[test]
    fn test_fifo_eviction() {
        let generator = CountingGenerator::new(1);
        let (s1, s2) = (state(), state());
        let opts = GenerationOptions::new();
        let first = generator.get_reachable_set(&s1, false, &opts).unwrap();
        generator.get_reachable_set(&s2, false, &opts).unwrap();
        assert_eq!(generator.cache().len(), 1);
        let again = generator.get_reachable_set(&s1, false, &opts).unwrap();
        assert!(!Arc::ptr_eq(&first[&1], &again[&1]));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_options_are_part_of_key() {
        let generator = CountingGenerator::new(4);
        let s = state();
        let a = generator.get_reachable_set(&s, false, &GenerationOptions::new().with("smooth", true)).unwrap();
        let b = generator.get_reachable_set(&s, false, &GenerationOptions::new().with("smooth", false)).unwrap();
        assert!(!Arc::ptr_eq(&a[&1], &b[&1]));
    }

    #[test]
    fn test_canonical_string_is_ordered() {
        let a = GenerationOptions::new().with("b", 1).with("a", "x");
        let b = GenerationOptions::new().with("a", "x").with("b", 1);
        assert_eq!(a.canonical_string(), b.canonical_string());
        assert_eq!(a.canonical_string(), r#"{a="x",b=1}"#);
    }

    #[test]
    fn test_mutating_generator_must_not_cache() {
        let mut generator = CountingGenerator::new(1);
        generator.mutates = true;
        assert!(check_cache_contract(&generator).unwrap_err().is_configuration());
        let mut generator = CountingGenerator::new(0);
        generator.mutates = true;
        assert!(check_cache_contract(&generator).is_ok());
    }
}
