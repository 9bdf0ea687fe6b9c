use noisy_float::prelude::*;
use std::collections::HashSet;

use crate::core::space::{ConfigSpace, ParamValue};
use crate::RNG;

/// Identifies a configuration within a [`ConfigurationManager`].
pub type ConfigId = usize;

/// How often sampling retries before duplicates are let through.
const MAX_SAMPLING_ROUNDS: usize = 100;

/// Owns all configurations of a tuning run and hands out stable ids.
///
/// Freshly sampled configurations are checked against everything seen so far
/// so that the optimizer does not waste budget re-evaluating a duplicate.
/// When the space is (nearly) exhausted the duplicate check is abandoned
/// rather than looping forever.
#[derive(Debug)]
pub struct ConfigurationManager {
    space: ConfigSpace,
    configurations: Vec<Vec<ParamValue>>,
    seen: HashSet<Vec<N64>>,
    allow_duplicates: bool,
}

impl ConfigurationManager {
    pub fn new(space: ConfigSpace) -> Self {
        ConfigurationManager {
            space,
            configurations: Vec::new(),
            seen: HashSet::new(),
            allow_duplicates: false,
        }
    }

    pub fn space(&self) -> &ConfigSpace {
        &self.space
    }

    /// The number of registered configurations.
    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    /// Look up a configuration by id. Panics if the id was not issued here.
    pub fn get(&self, id: ConfigId) -> &[ParamValue] {
        self.configurations[id].as_slice()
    }

    /// Register an externally constructed configuration, e.g. a mutation.
    pub fn insert(&mut self, config: Vec<ParamValue>) -> ConfigId {
        self.seen.insert(dedup_key(&config));
        self.configurations.push(config);
        self.configurations.len() - 1
    }

    /// Sample new distinct configurations and register them.
    ///
    /// Uses Latin Hypercube Sampling per round to cover the space evenly.
    /// Rounds that only produce already-seen configurations are discarded;
    /// after [`MAX_SAMPLING_ROUNDS`] such rounds duplicates are accepted
    /// permanently.
    pub fn sample_more(&mut self, n: usize, rng: &mut RNG) -> Vec<ConfigId> {
        let mut ids = Vec::with_capacity(n);
        let mut rounds = 0;
        while ids.len() < n {
            let round = self.space.sample_n(n - ids.len(), rng);
            for config in round {
                if self.allow_duplicates || !self.seen.contains(&dedup_key(&config)) {
                    ids.push(self.insert(config));
                }
            }
            rounds += 1;
            if rounds >= MAX_SAMPLING_ROUNDS && !self.allow_duplicates {
                self.allow_duplicates = true;
            }
        }
        ids
    }
}

fn dedup_key(config: &[ParamValue]) -> Vec<N64> {
    config.iter().map(|x| n64(x.to_f64())).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn tiny_space() -> ConfigSpace {
        let mut space = ConfigSpace::new();
        space.add_int("x", 0, 1);
        space
    }

    #[test]
    fn issues_sequential_ids() {
        let mut manager = ConfigurationManager::new(tiny_space());
        let a = manager.insert(vec![ParamValue::Int(0)]);
        let b = manager.insert(vec![ParamValue::Int(1)]);
        assert_eq!((a, b), (0, 1));
        assert_eq!(manager.get(a), &[ParamValue::Int(0)]);
        assert_eq!(manager.get(b), &[ParamValue::Int(1)]);
    }

    #[test]
    fn sampling_avoids_duplicates_while_possible() {
        let mut manager = ConfigurationManager::new(tiny_space());
        let mut rng = RNG::new_with_seed(123);
        let ids = manager.sample_more(2, &mut rng);
        assert_eq!(ids.len(), 2);
        assert_ne!(manager.get(ids[0]), manager.get(ids[1]));
    }

    #[test]
    fn sampling_falls_back_to_duplicates_when_exhausted() {
        let mut manager = ConfigurationManager::new(tiny_space());
        let mut rng = RNG::new_with_seed(123);
        // the space only holds two distinct configurations
        let ids = manager.sample_more(5, &mut rng);
        assert_eq!(ids.len(), 5);
        assert!(manager.allow_duplicates);
    }
}
