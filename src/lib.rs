//! Multi-fidelity hyperparameter optimization for deep learning.
//!
//! The tuner evaluates hyperparameter configurations at increasing
//! fidelities (training epochs) through a graybox objective that can
//! resume from checkpoints. A Gaussian process surrogate over
//! (configuration features, fidelity) decides which configuration is
//! advanced to its next fidelity step.

#[macro_use]
extern crate approx;
extern crate csv;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate float_cmp;
extern crate itertools;
extern crate ndarray;
extern crate ndarray_stats;
extern crate noisy_float;
extern crate num_traits;
extern crate openblas_src;
extern crate rayon;
extern crate serde;
extern crate statrs;
#[macro_use]
extern crate structopt;

#[macro_use]
mod util;

mod core;
mod gpr;

pub use crate::core::benchfn;
pub use crate::core::config_manager::{ConfigId, ConfigurationManager};
pub use crate::core::gp_bandit::GpBanditOptimizer;
pub use crate::core::graybox::{GrayboxWrapper, ObjectiveFromFn, TrialObjective};
pub use crate::core::optimizer::{FidelityOptimizer, Suggestion};
pub use crate::core::outputs::{Output, OutputEventHandler};
pub use crate::core::random::RNG;
pub use crate::core::random_search::RandomSearchOptimizer;
pub use crate::core::space::{ConfigSpace, Hyperparameter, ParamValue};
pub use crate::core::surrogate::{Surrogate, SurrogateEstimator};
pub use crate::core::trial::{EpochMetric, TrialResult};
pub use crate::core::tuner::{Direction, OptimizerKind, Tuner, TunerArgs, TuningResult};
pub use crate::gpr::{GprEstimator, GprSurrogate, Projection, Scalar};
