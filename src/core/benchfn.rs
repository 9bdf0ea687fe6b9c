//! Benchmark functions for exercising the tuner without training real models.
//!
//! Combined with [`learning_curve`], these simulate a training run:
//! the function value is the asymptote the curve converges to.

use ndarray::prelude::*;
use ndarray::Data;
use num_traits::{Float, FloatConst};

/// Sphere function: N-dimensional, symmetric.
///
/// Bounds: unbounded, but -2 <= xi <= 2 is sensible.
///
/// Optimum: f(0, ..., 0) = 0
///
/// ```
/// # #[macro_use] extern crate ndarray;
/// # use hpo4dl::benchfn::*;
/// assert_eq!(sphere(array![0.0]), 0.0);
/// assert_eq!(sphere(array![0.0, 0.0]), 0.0);
/// assert_eq!(sphere(array![1.0, 2.0]), 5.0);
/// ```
pub fn sphere<A, S>(xs: ArrayBase<S, Ix1>) -> A
where
    S: Data<Elem = A>,
    A: Clone + Float,
{
    assert!(!xs.is_empty(), "at least one dimension required");
    xs.mapv(|x| x.powi(2)).sum()
}

/// Rastrigin function: N-dimensional with many local minima.
///
/// Bounds: -5.12 <= xi <= 5.12
///
/// Optimum: f(0, ..., 0) = 0
///
/// ```
/// # #[macro_use] extern crate ndarray;
/// # use hpo4dl::benchfn::*;
/// assert_eq!(rastrigin(array![0.0, 0.0], 10.0), 0.0);
/// assert!(rastrigin(array![1.3, -2.1], 10.0) > 0.0);
/// ```
///
/// Definition taken from:
/// https://en.wikipedia.org/wiki/Test_functions_for_optimization
pub fn rastrigin<A, S>(xs: ArrayBase<S, Ix1>, amplitude: A) -> A
where
    S: Data<Elem = A>,
    A: Float + FloatConst,
{
    assert!(!xs.is_empty(), "at least one dimension required");
    let n = A::from(xs.len()).unwrap();
    let two_pi = A::PI() + A::PI();
    amplitude * n
        + xs.mapv(|x| x.powi(2) - amplitude * (two_pi * x).cos())
            .sum()
}

/// Rosenbrock function: N-dimensional with a curved valley.
///
/// Bounds: unbounded, but -5 <= xi <= 10 is sensible.
///
/// Optimum: f(1, ..., 1) = 0
///
/// ```
/// # #[macro_use] extern crate ndarray;
/// # use hpo4dl::benchfn::*;
/// assert_eq!(rosenbrock(array![1.0, 1.0]), 0.0);
/// assert_eq!(rosenbrock(array![1.0, 1.0, 1.0]), 0.0);
/// assert!(rosenbrock(array![0.0, 0.0]) > 0.0);
/// ```
pub fn rosenbrock<A, S>(xs: ArrayBase<S, Ix1>) -> A
where
    S: Data<Elem = A>,
    A: Float,
    u16: Into<A>,
{
    assert!(xs.len() >= 2, "at least two dimensions required");
    let mut total = A::zero();
    for i in 0..xs.len() - 1 {
        let a: A = 100u16.into();
        total = total
            + a * (xs[i + 1] - xs[i].powi(2)).powi(2)
            + (xs[i] - A::one()).powi(2);
    }
    total
}

/// A power-law learning curve that converges towards `asymptote` over epochs.
/// At epoch 0 the value is `asymptote + gap`.
///
/// ```
/// # use hpo4dl::benchfn::learning_curve;
/// # #[macro_use] extern crate float_cmp;
/// # fn main() {
/// assert_eq!(learning_curve(0.1, 1.0, 1.0, 0), 1.1);
/// let early = learning_curve(0.1, 1.0, 0.7, 1);
/// let late = learning_curve(0.1, 1.0, 0.7, 50);
/// assert!(late < early);
/// assert!(approx_eq!(f64, learning_curve(0.1, 1.0, 1.0, 1000), 0.1, epsilon = 1e-2));
/// # }
/// ```
pub fn learning_curve(asymptote: f64, gap: f64, rate: f64, epoch: u32) -> f64 {
    assert!(gap >= 0.0, "gap must be non-negative");
    assert!(rate > 0.0, "rate must be positive");
    asymptote + gap * f64::from(epoch + 1).powf(-rate)
}
