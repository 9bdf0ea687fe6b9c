use ndarray::prelude::*;

use crate::{Scalar, RNG};

/// An estimator that fits a [`Surrogate`] to observed trial data.
pub trait SurrogateEstimator<A: Scalar> {
    type Model: Surrogate<A>;
    type Error: std::fmt::Display + std::fmt::Debug;

    /// Create a default estimator for the given number of feature columns.
    fn new(n_features: usize) -> Self;

    /// Fit a new model to the given data.
    ///
    /// The feature matrix rows are configuration features
    /// with the normalized fidelity appended as the last column.
    /// A prior model can be supplied to warm-start hyperparameter search.
    fn estimate(
        &self,
        x: Array2<A>,
        y: Array1<A>,
        prior: Option<&Self::Model>,
        rng: &mut RNG,
    ) -> Result<Self::Model, Self::Error>;
}

/// A regression model over (configuration features, fidelity).
/// This is used to decide which configuration is advanced to its next epoch.
///
/// Predictions are reported in natural metric units,
/// in minimization orientation.
pub trait Surrogate<A: Scalar> {
    /// Length scales for the feature columns, estimated by the fitted model.
    ///
    /// Longer length scales indicate less relevant columns.
    /// If no length scale information is available, returns 1 for each column.
    fn length_scales(&self) -> Vec<f64>;

    fn predict_mean(&self, x: Array1<A>) -> A {
        let mean = self.predict_mean_a(x.insert_axis(Axis(0)));
        *mean.first().unwrap()
    }

    fn predict_mean_std(&self, x: Array1<A>) -> (A, A) {
        let (mean, std) = self.predict_mean_std_a(x.insert_axis(Axis(0)));
        (*mean.first().unwrap(), *std.first().unwrap())
    }

    /// Expected improvement over the incumbent metric `fmin` at a single point.
    fn predict_ei(&self, x: Array1<A>, fmin: A) -> A {
        let ei = self.predict_ei_a(x.insert_axis(Axis(0)), fmin);
        *ei.first().unwrap()
    }

    fn predict_mean_a(&self, x: Array2<A>) -> Array1<A>;
    fn predict_mean_std_a(&self, x: Array2<A>) -> (Array1<A>, Array1<A>);
    fn predict_ei_a(&self, x: Array2<A>, fmin: A) -> Array1<A>;
}
