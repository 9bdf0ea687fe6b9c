use itertools::Itertools as _;
use ndarray::prelude::*;
use rand::seq::SliceRandom as _;
use std::collections::{HashMap, HashSet};

use crate::core::config_manager::{ConfigId, ConfigurationManager};
use crate::core::optimizer::{FidelityOptimizer, Suggestion};
use crate::core::space::{ConfigSpace, ParamValue};
use crate::core::trial::TrialResult;
use crate::gpr::{GprEstimator, GprSurrogate, Projection, Scalar};
use crate::{Surrogate as _, SurrogateEstimator as _};
use crate::RNG;

/// Multi-fidelity Bayesian optimizer.
///
/// A Gaussian process models the metric as a function of
/// (configuration features, normalized epoch).
/// After an initial random phase, each round advances the single candidate
/// with the highest expected improvement to its next fidelity step,
/// so that unpromising configurations are abandoned after a few epochs
/// while promising ones train to completion.
pub struct GpBanditOptimizer<A: Scalar> {
    max_epochs: u32,
    fidelity_step: u32,
    pool_size: usize,
    initial_random: usize,
    mutation_relscale: f64,
    n_initial_suggested: usize,
    // current epoch per known configuration, 0 before any evaluation
    frontier: HashMap<ConfigId, u32>,
    retired: HashSet<ConfigId>,
    x_rows: Vec<Vec<A>>,
    y_rows: Vec<A>,
    estimator: GprEstimator,
    model: Option<GprSurrogate<A>>,
    fmin: f64,
    incumbent: Option<ConfigId>,
}

impl<A: Scalar> GpBanditOptimizer<A> {
    pub fn new(space: &ConfigSpace, max_epochs: u32, fidelity_step: u32) -> Self {
        assert!(max_epochs > 0, "max_epochs must be positive");
        assert!(fidelity_step > 0, "fidelity_step must be positive");
        // one feature column per hyperparameter, plus the fidelity column
        let estimator = <GprEstimator as crate::SurrogateEstimator<A>>::new(space.len() + 1);
        GpBanditOptimizer {
            max_epochs,
            fidelity_step,
            pool_size: 10,
            initial_random: 10,
            mutation_relscale: 0.1,
            n_initial_suggested: 0,
            frontier: HashMap::new(),
            retired: HashSet::new(),
            x_rows: Vec::new(),
            y_rows: Vec::new(),
            estimator,
            model: None,
            fmin: std::f64::INFINITY,
            incumbent: None,
        }
    }

    /// How many candidate configurations are kept in play at once.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be positive");
        self.pool_size = pool_size;
        self
    }

    /// How many configurations are evaluated for one step each
    /// before the model takes over.
    pub fn with_initial_random(mut self, initial_random: usize) -> Self {
        self.initial_random = initial_random;
        self
    }

    pub fn with_metric_projection(mut self, projection: Projection) -> Self {
        self.estimator = self.estimator.metric_projection(projection);
        self
    }

    /// Normalized standard deviation for incumbent mutations
    /// when refilling the candidate pool.
    pub fn with_mutation_relscale(mut self, relscale: f64) -> Self {
        assert!(relscale > 0.0, "relscale must be positive");
        self.mutation_relscale = relscale;
        self
    }

    pub fn model(&self) -> Option<&GprSurrogate<A>> {
        self.model.as_ref()
    }

    fn active_ids(&self) -> Vec<ConfigId> {
        self.frontier
            .keys()
            .cloned()
            .filter(|id| !self.retired.contains(id))
            .sorted()
            .collect()
    }

    /// Keep the candidate pool full. Most refills are fresh random samples,
    /// occasionally the incumbent is mutated to search near the current best.
    fn ensure_pool(&mut self, manager: &mut ConfigurationManager, rng: &mut RNG) {
        while self.active_ids().len() < self.pool_size {
            let mutate = self
                .incumbent
                .filter(|_| rng.uniform(0.0..1.0) < 0.25)
                .is_some();
            let id = if mutate {
                let incumbent = self.incumbent.unwrap();
                let mut config = manager.get(incumbent).to_vec();
                let relscale = vec![self.mutation_relscale; manager.space().len()];
                manager.space().mutate_inplace(&mut config, &relscale, rng);
                manager.insert(config)
            } else {
                match manager.sample_more(1, rng).into_iter().next() {
                    Some(id) => id,
                    None => break,
                }
            };
            self.frontier.entry(id).or_insert(0);
        }
    }

    fn feature_row(&self, manager: &ConfigurationManager, id: ConfigId, epoch: u32) -> Vec<A> {
        let mut row: Vec<A> = manager.space().project_into_features(manager.get(id));
        row.push(A::from_f(f64::from(epoch) / f64::from(self.max_epochs)));
        row
    }

    fn next_epoch(&self, current: u32) -> u32 {
        (current + self.fidelity_step).min(self.max_epochs)
    }

    fn suggest_initial(&mut self, rng: &mut RNG) -> Vec<Suggestion> {
        let mut remaining = self.initial_random.saturating_sub(self.n_initial_suggested);
        // the model cannot be fitted before the first observation
        if remaining == 0 && self.x_rows.is_empty() {
            remaining = 1;
        }
        let mut fresh: Vec<ConfigId> = self
            .active_ids()
            .into_iter()
            .filter(|id| self.frontier[id] == 0)
            .take(remaining)
            .collect();
        fresh.as_mut_slice().shuffle(rng.basic_rng_mut());
        self.n_initial_suggested += fresh.len();
        fresh
            .into_iter()
            .map(|config_id| Suggestion {
                config_id,
                epoch: self.fidelity_step.min(self.max_epochs),
            })
            .collect()
    }

    fn suggest_by_model(
        &mut self,
        manager: &ConfigurationManager,
        rng: &mut RNG,
    ) -> Result<Vec<Suggestion>, failure::Error> {
        let n_features = manager.space().len() + 1;
        let x = Array2::from_shape_vec(
            (self.x_rows.len(), n_features),
            self.x_rows.iter().flatten().cloned().collect(),
        )?;
        let y = Array1::from(self.y_rows.clone());

        let model = self
            .estimator
            .estimate(x, y, self.model.as_ref(), rng)
            .map_err(|err| format_err!("surrogate model fitting failed: {}", err))?;

        let candidates: Vec<Suggestion> = self
            .active_ids()
            .into_iter()
            .map(|config_id| Suggestion {
                config_id,
                epoch: self.next_epoch(self.frontier[&config_id]),
            })
            .collect();
        ensure!(!candidates.is_empty(), "no candidate configurations left");

        let rows = candidates
            .iter()
            .map(|s| Array1::from(self.feature_row(manager, s.config_id, s.epoch)))
            .collect_vec();
        let x_candidates = ndarray::stack(
            Axis(0),
            rows.iter()
                .map(|row| row.view().insert_axis(Axis(0)))
                .collect_vec()
                .as_slice(),
        )?;

        let ei = model.predict_ei_a(x_candidates, A::from_f(self.fmin));
        self.model = Some(model);

        let best = ei
            .iter()
            .enumerate()
            .max_by_key(|(_, ei)| ei.to_n64())
            .map(|(i, _)| candidates[i])
            .expect("candidates are not empty");

        Ok(vec![best])
    }
}

impl<A: Scalar> FidelityOptimizer for GpBanditOptimizer<A> {
    fn suggest(
        &mut self,
        manager: &mut ConfigurationManager,
        rng: &mut RNG,
    ) -> Result<Vec<Suggestion>, failure::Error> {
        self.ensure_pool(manager, rng);

        if self.n_initial_suggested < self.initial_random || self.x_rows.is_empty() {
            let suggestions = self.suggest_initial(rng);
            if !suggestions.is_empty() {
                return Ok(suggestions);
            }
        }

        self.suggest_by_model(manager, rng)
    }

    fn observe(&mut self, results: &[TrialResult], manager: &ConfigurationManager) {
        for result in results {
            self.x_rows
                .push(self.feature_row(manager, result.config_id, result.epoch));
            self.y_rows.push(A::from_f(result.metric));

            let frontier = self.frontier.entry(result.config_id).or_insert(0);
            *frontier = (*frontier).max(result.epoch);
            if *frontier >= self.max_epochs {
                self.retired.insert(result.config_id);
            }

            if result.metric < self.fmin {
                self.fmin = result.metric;
                self.incumbent = Some(result.config_id);
            }
        }
    }

    fn best_prediction(&self, manager: &ConfigurationManager) -> Option<(Vec<ParamValue>, f64)> {
        let model = self.model.as_ref()?;
        let space = manager.space();

        let mut x: Vec<f64> = match self.incumbent {
            Some(id) => space
                .project_into_features::<f64>(manager.get(id)),
            None => vec![0.5; space.len()],
        };
        let bounds = vec![(0.0, 1.0); space.len()];

        // search the feature space for the lowest predicted metric at full fidelity
        let objective = |x: &[f64], _grad: Option<&mut [f64]>, _: &mut ()| -> f64 {
            let mut row: Vec<A> = x.iter().map(|&v| A::from_f(v)).collect();
            row.push(A::from_f(1.0));
            model.predict_mean(Array1::from(row)).into()
        };
        let prediction =
            crate::util::minimize_without_gradient(objective, x.as_mut_slice(), &bounds, ());

        Some((space.project_from_features(x), prediction))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn space() -> ConfigSpace {
        let mut space = ConfigSpace::new();
        space.add_real("x", 0.0, 1.0);
        space
    }

    fn evaluate(manager: &ConfigurationManager, s: Suggestion) -> TrialResult {
        // quadratic bowl with a learning curve that flattens out over epochs
        let x = manager.get(s.config_id)[0].to_f64();
        let metric = (x - 0.3).powi(2) + 1.0 / f64::from(s.epoch + 1);
        TrialResult {
            config_id: s.config_id,
            epoch: s.epoch,
            metric,
            cost: 0.1,
            configuration: manager.get(s.config_id).to_vec(),
        }
    }

    #[test]
    fn starts_with_random_one_step_suggestions() {
        let space = space();
        let mut manager = ConfigurationManager::new(space.clone());
        let mut rng = RNG::new_with_seed(11);
        let mut optimizer = GpBanditOptimizer::<f64>::new(&space, 10, 2)
            .with_initial_random(4)
            .with_pool_size(4);

        let suggestions = optimizer.suggest(&mut manager, &mut rng).unwrap();
        assert_eq!(suggestions.len(), 4);
        assert!(suggestions.iter().all(|s| s.epoch == 2));
        let distinct: std::collections::HashSet<_> =
            suggestions.iter().map(|s| s.config_id).collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn suggests_randomly_while_no_observations_exist() {
        let space = space();
        let mut manager = ConfigurationManager::new(space.clone());
        let mut rng = RNG::new_with_seed(7);
        let mut optimizer = GpBanditOptimizer::<f64>::new(&space, 10, 2)
            .with_initial_random(0)
            .with_pool_size(3);

        let suggestions = optimizer.suggest(&mut manager, &mut rng).unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].epoch, 2);
        assert!(optimizer.model().is_none());
    }

    #[test]
    fn advances_one_candidate_per_round_after_warmup() {
        let space = space();
        let mut manager = ConfigurationManager::new(space.clone());
        let mut rng = RNG::new_with_seed(93);
        let mut optimizer = GpBanditOptimizer::<f64>::new(&space, 10, 2)
            .with_initial_random(4)
            .with_pool_size(4);

        let initial = optimizer.suggest(&mut manager, &mut rng).unwrap();
        let results: Vec<_> = initial
            .iter()
            .map(|&s| evaluate(&manager, s))
            .collect();
        optimizer.observe(&results, &manager);

        let suggestions = optimizer.suggest(&mut manager, &mut rng).unwrap();
        assert_eq!(suggestions.len(), 1);
        let s = suggestions[0];
        // an already-evaluated candidate advances by one step,
        // a fresh pool entry starts at the first step
        assert!(s.epoch == 2 || s.epoch == 4, "unexpected epoch {}", s.epoch);
        assert!(optimizer.model().is_some());
    }

    #[test]
    fn retires_candidates_at_the_epoch_ceiling() {
        let space = space();
        let mut manager = ConfigurationManager::new(space.clone());
        let mut rng = RNG::new_with_seed(5);
        let mut optimizer = GpBanditOptimizer::<f64>::new(&space, 4, 2);

        let id = manager.sample_more(1, &mut rng)[0];
        let result = TrialResult {
            config_id: id,
            epoch: 4,
            metric: 0.5,
            cost: 0.1,
            configuration: manager.get(id).to_vec(),
        };
        optimizer.observe(&[result], &manager);
        assert!(optimizer.retired.contains(&id));
        assert_eq!(optimizer.incumbent, Some(id));
    }

    #[test]
    fn predicts_a_best_configuration_after_fitting() {
        let space = space();
        let mut manager = ConfigurationManager::new(space.clone());
        let mut rng = RNG::new_with_seed(4018);
        let mut optimizer = GpBanditOptimizer::<f64>::new(&space, 10, 2)
            .with_initial_random(6)
            .with_pool_size(6);

        for _ in 0..4 {
            let suggestions = optimizer.suggest(&mut manager, &mut rng).unwrap();
            let results: Vec<_> = suggestions
                .iter()
                .map(|&s| evaluate(&manager, s))
                .collect();
            optimizer.observe(&results, &manager);
        }

        let (config, prediction) = optimizer
            .best_prediction(&manager)
            .expect("model should be fitted");
        assert_eq!(config.len(), 1);
        assert!(prediction.is_finite());
    }
}
