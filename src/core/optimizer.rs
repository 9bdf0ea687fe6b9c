use crate::core::config_manager::ConfigurationManager;
use crate::core::space::ParamValue;
use crate::core::trial::TrialResult;
use crate::RNG;

/// A request to evaluate a configuration up to a target epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Suggestion {
    pub config_id: crate::core::config_manager::ConfigId,
    pub epoch: u32,
}

/// Decides which configuration is evaluated next, and at which epoch.
///
/// The tuner alternates between `suggest` and `observe`
/// until the epoch budget is exhausted.
/// Metrics arrive in minimization orientation.
pub trait FidelityOptimizer {
    /// Propose the next evaluations.
    /// May register new configurations with the manager.
    fn suggest(
        &mut self,
        manager: &mut ConfigurationManager,
        rng: &mut RNG,
    ) -> Result<Vec<Suggestion>, failure::Error>;

    /// Take note of finished evaluations.
    fn observe(&mut self, results: &[TrialResult], manager: &ConfigurationManager);

    /// The model's guess for the best full-fidelity configuration,
    /// with its predicted metric. None if the optimizer has no model.
    fn best_prediction(
        &self,
        _manager: &ConfigurationManager,
    ) -> Option<(Vec<ParamValue>, f64)> {
        None
    }
}
