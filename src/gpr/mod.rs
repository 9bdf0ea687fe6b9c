//! Gaussian process regression over (configuration features, fidelity).
//! The kernel code follows the sklearn.gaussian_process.kernels Python module.

mod fit;
mod kernel;
mod matern;
mod metricnorm;
mod model;
mod predict;
mod scalar;

pub use fit::KernelFit;
pub use kernel::{ConstantKernel, Kernel, Product};
pub use matern::Matern;
pub use metricnorm::{MetricNorm, Projection};
pub use model::{GprEstimator, GprSurrogate};
pub use predict::{expected_improvement, predict};
pub use scalar::Scalar;
