use serde::Serialize;

use crate::core::config_manager::ConfigId;
use crate::core::space::ParamValue;

/// One metric observation reported by an objective, at a specific epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetric {
    pub epoch: u32,
    pub metric: f64,
}

impl EpochMetric {
    pub fn new(epoch: u32, metric: f64) -> Self {
        EpochMetric { epoch, metric }
    }
}

/// The outcome of evaluating one configuration at one epoch.
///
/// The metric keeps its natural orientation.
/// When maximizing, the tuner negates copies of these records
/// before passing them to the optimizer.
/// The cost is the wall-clock seconds attributed to this epoch.
#[derive(Clone, PartialEq, Serialize)]
pub struct TrialResult {
    pub config_id: ConfigId,
    pub epoch: u32,
    pub metric: f64,
    pub cost: f64,
    pub configuration: Vec<ParamValue>,
}

impl std::fmt::Debug for TrialResult {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "Trial({id} @{epoch} metric {metric} cost {cost:.3}s [{config}])",
            id = self.config_id,
            epoch = self.epoch,
            metric = self.metric,
            cost = self.cost,
            config = itertools::join(&self.configuration, " "),
        )
    }
}
