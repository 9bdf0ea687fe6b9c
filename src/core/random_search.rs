use crate::core::config_manager::ConfigurationManager;
use crate::core::optimizer::{FidelityOptimizer, Suggestion};
use crate::core::trial::TrialResult;
use crate::RNG;

/// Baseline optimizer: each round trains one fresh random configuration
/// for the full number of epochs.
#[derive(Debug)]
pub struct RandomSearchOptimizer {
    max_epochs: u32,
}

impl RandomSearchOptimizer {
    pub fn new(max_epochs: u32) -> Self {
        assert!(max_epochs > 0, "max_epochs must be positive");
        RandomSearchOptimizer { max_epochs }
    }
}

impl FidelityOptimizer for RandomSearchOptimizer {
    fn suggest(
        &mut self,
        manager: &mut ConfigurationManager,
        rng: &mut RNG,
    ) -> Result<Vec<Suggestion>, failure::Error> {
        let ids = manager.sample_more(1, rng);
        Ok(ids
            .into_iter()
            .map(|config_id| Suggestion {
                config_id,
                epoch: self.max_epochs,
            })
            .collect())
    }

    fn observe(&mut self, _results: &[TrialResult], _manager: &ConfigurationManager) {}
}
