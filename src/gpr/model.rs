//! The Gaussian process surrogate that drives multi-fidelity suggestions.
//!
//! This follows GPs as described in Rasmussen & Williams 2006,
//! in particular equations 2.33 and 2.24, and the algorithm 2.1.
//! Large parts of this code are based on skopt.learning.GaussianProcessRegressor
//! from skopt (scikit-optimize)
//! at https://github.com/scikit-optimize/scikit-optimize

use ndarray::prelude::*;
use ndarray_stats as ndstats;

use crate::gpr::{
    expected_improvement, predict, ConstantKernel, Kernel as _, KernelFit, Matern, MetricNorm,
    Product, Projection, Scalar,
};
use crate::util::{BoundedValue, BoundsError};
use crate::{Surrogate, SurrogateEstimator, RNG};

type ConcreteKernel = Product<ConstantKernel, Matern>;

/// A fitted Gaussian process over (configuration features, fidelity).
#[derive(Debug, Clone)]
pub struct GprSurrogate<A: Scalar> {
    kernel: ConcreteKernel,
    noise: BoundedValue<f64>,
    x_train: Array2<A>,
    y_train: Array1<A>,
    alpha: Array1<A>,
    k_inv: Array2<A>,
    y_norm: MetricNorm<A>,
    lml: f64,
}

impl<A: Scalar> GprSurrogate<A> {
    pub fn kernel(&self) -> &ConcreteKernel {
        &self.kernel
    }

    /// Log-marginal likelihood of the fitted kernel parameters.
    pub fn lml(&self) -> f64 {
        self.lml
    }
}

impl<A: Scalar> Surrogate<A> for GprSurrogate<A> {
    fn length_scales(&self) -> Vec<f64> {
        self.kernel
            .k2()
            .length_scale()
            .iter()
            .map(BoundedValue::value)
            .collect()
    }

    fn predict_mean_a(&self, x: Array2<A>) -> Array1<A> {
        let y = predict(
            &self.kernel,
            self.alpha.view(),
            x.view(),
            self.x_train.view(),
            self.k_inv.view(),
            None,
        );

        self.y_norm.project_location_from_normalized(y)
    }

    fn predict_mean_std_a(&self, x: Array2<A>) -> (Array1<A>, Array1<A>) {
        let mut y_var = Array1::zeros(x.nrows());
        let y = predict(
            &self.kernel,
            self.alpha.view(),
            x.view(),
            self.x_train.view(),
            self.k_inv.view(),
            Some(y_var.view_mut()),
        );

        let std = self.y_norm.project_std_from_normalized(y.view(), y_var);
        let mean = self.y_norm.project_location_from_normalized(y);
        (mean, std)
    }

    fn predict_ei_a(&self, x: Array2<A>, fmin: A) -> Array1<A> {
        let mut y_var = Array1::zeros(x.nrows());
        let y = predict(
            &self.kernel,
            self.alpha.view(),
            x.view(),
            self.x_train.view(),
            self.k_inv.view(),
            Some(y_var.view_mut()),
        );

        // EI is calculated in the normalized space,
        // which is fine for comparing candidates against each other.
        let fmin = *self
            .y_norm
            .project_into_normalized(array![fmin])
            .first()
            .unwrap();

        let mut ei: Array1<A> = Array1::zeros(x.nrows());
        ndarray::Zip::from(&mut ei)
            .and(&y)
            .and(&y_var)
            .apply(|ei, &y, &var| {
                *ei = A::from_f(expected_improvement(
                    y.into(),
                    var.sqrt().into(),
                    fmin.into(),
                ))
            });
        ei
    }
}

/// Configuration for fitting a [`GprSurrogate`].
#[derive(Debug)]
pub struct GprEstimator {
    noise_bounds: (f64, f64),
    length_scale_bounds: Vec<(f64, f64)>,
    n_restarts_optimizer: usize,
    matern_nu: f64,
    amplitude_bounds: Option<(f64, f64)>,
    metric_projection: Projection,
}

impl GprEstimator {
    pub fn noise_bounds(self, lo: f64, hi: f64) -> Self {
        GprEstimator {
            noise_bounds: (lo, hi),
            ..self
        }
    }

    pub fn length_scale_bounds(self, bounds: Vec<(f64, f64)>) -> Self {
        GprEstimator {
            length_scale_bounds: bounds,
            ..self
        }
    }

    pub fn n_restarts_optimizer(self, n: usize) -> Self {
        GprEstimator {
            n_restarts_optimizer: n,
            ..self
        }
    }

    pub fn matern_nu(self, nu: f64) -> Self {
        GprEstimator {
            matern_nu: nu,
            ..self
        }
    }

    pub fn amplitude_bounds(self, bounds: Option<(f64, f64)>) -> Self {
        GprEstimator {
            amplitude_bounds: bounds,
            ..self
        }
    }

    pub fn metric_projection(self, metric_projection: Projection) -> Self {
        Self {
            metric_projection,
            ..self
        }
    }
}

impl<A: Scalar> SurrogateEstimator<A> for GprEstimator {
    type Model = GprSurrogate<A>;
    type Error = Error;

    fn new(n_features: usize) -> Self {
        let noise_bounds = (1e-5, 1e5);
        let length_scale_bounds = std::iter::repeat((1e-3, 1e3)).take(n_features).collect();
        let n_restarts_optimizer = 2;
        let matern_nu = 5. / 2.;
        let amplitude_bounds = None;
        let metric_projection = Projection::Linear;
        GprEstimator {
            noise_bounds,
            length_scale_bounds,
            n_restarts_optimizer,
            matern_nu,
            amplitude_bounds,
            metric_projection,
        }
    }

    fn estimate(
        &self,
        x: Array2<A>,
        y: Array1<A>,
        prior: Option<&Self::Model>,
        rng: &mut RNG,
    ) -> Result<Self::Model, Self::Error> {
        let (n_observations, _n_features) = x.dim();
        assert!(
            y.len() == n_observations,
            "expected y values for {} observations: {}",
            n_observations,
            y,
        );

        let (y_train, y_norm) = MetricNorm::new_project_into_normalized(y, self.metric_projection);
        let x_train = x;

        let amplitude = estimate_amplitude(y_train.view(), self.amplitude_bounds);

        let (kernel, noise) = get_kernel_or_default(prior, amplitude, self)?;

        let KernelFit {
            kernel,
            noise,
            alpha,
            k_inv,
            lml,
        } = KernelFit::new(
            kernel,
            x_train.clone(),
            y_train.clone(),
            &mut rng.fork_random_state(),
            self.n_restarts_optimizer,
            noise,
        );

        Ok(GprSurrogate {
            kernel,
            noise,
            x_train,
            y_train,
            alpha,
            k_inv,
            y_norm,
            lml,
        })
    }
}

fn get_kernel_or_default<A: Scalar>(
    prior: Option<&GprSurrogate<A>>,
    amplitude: BoundedValue<f64>,
    config: &GprEstimator,
) -> Result<(ConcreteKernel, BoundedValue<f64>), Error> {
    if let Some(prior) = prior {
        return Ok((prior.kernel.clone(), prior.noise.clone()));
    }

    let noise = BoundedValue::new(1.0, config.noise_bounds.0, config.noise_bounds.1)
        .map_err(Error::NoiseBounds)?;

    let length_scale = config
        .length_scale_bounds
        .iter()
        .map(|&(lo, hi)| BoundedValue::new(((lo.ln() + hi.ln()) / 2.).exp(), lo, hi))
        .collect::<Result<_, _>>()
        .map_err(Error::LengthScaleBounds)?;

    let amplitude = ConstantKernel::new(amplitude);
    let main_kernel = Matern::new(config.matern_nu, length_scale);
    let kernel = Product::of(amplitude, main_kernel);

    Ok((kernel, noise))
}

fn estimate_amplitude<A: Scalar>(
    y: ArrayView1<A>,
    bounds: Option<(f64, f64)>,
) -> BoundedValue<f64> {
    use ndstats::Quantile1dExt as _;
    use noisy_float::types::N64;
    let (lo, hi) = bounds.unwrap_or_else(|| {
        let hi = y.mapv(|x| x.powi(2)).sum().into();
        let lo = y
            .mapv(|x| N64::from_f64(x.into()))
            .quantile_mut(N64::from_f64(0.1), &ndstats::interpolate::Lower)
            .unwrap()
            .raw()
            .powi(2)
            * y.len() as f64;
        assert!(lo >= 0.0);
        let lo = if lo > 2e-5 { lo } else { 2e-5 };
        (lo / 2.0, hi * 2.0)
    });
    let start = f64::exp((lo.ln() + hi.ln()) / 2.0);
    BoundedValue::new(start, lo, hi).unwrap()
}

#[derive(Debug)]
pub enum Error {
    NoiseBounds(BoundsError<f64>),
    LengthScaleBounds(BoundsError<f64>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Error::NoiseBounds(BoundsError { value, min, max }) => write!(
                f,
                "noise level {} violated bounds [{}, {}] during model fitting",
                value, min, max,
            ),
            Error::LengthScaleBounds(BoundsError { value, min, max }) => write!(
                f,
                "length scale {} violated bounds [{}, {}] during model fitting",
                value, min, max,
            ),
        }
    }
}
