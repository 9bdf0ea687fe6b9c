use ndarray::prelude::*;
use ndarray_linalg::CholeskyFactorized;
use num_traits::Float;

use crate::gpr::{Kernel, Scalar};
use crate::util::BoundedValue;
use crate::RNG;

/// A kernel with fitted parameters,
/// along with the precomputed matrices needed for prediction.
pub struct KernelFit<K, A> {
    pub kernel: K,
    pub noise: BoundedValue<f64>,
    pub alpha: Array1<A>,
    pub k_inv: Array2<A>,
    pub lml: f64,
}

impl<K, A> KernelFit<K, A> {
    /// Assign kernel parameters with maximal log-marginal likelihood.
    ///
    /// The current kernel parameters (theta) are used as an optimization starting point,
    /// which is how a previously fitted model warm-starts the next fit.
    pub fn new(
        kernel: K,
        x_train: Array2<A>,
        y_train: Array1<A>,
        rng: &mut RNG,
        n_restarts_optimizer: usize,
        noise: BoundedValue<f64>,
    ) -> Self
    where
        A: Scalar,
        K: Kernel,
    {
        fit_kernel(kernel, x_train, y_train, rng, n_restarts_optimizer, noise)
    }
}

fn fit_kernel<K: Kernel, A: Scalar>(
    mut kernel: K,
    x_train: Array2<A>,
    y_train: Array1<A>,
    rng: &mut RNG,
    n_restarts_optimizer: usize,
    noise: BoundedValue<f64>,
) -> KernelFit<K, A> {
    let n_observations = x_train.nrows();
    assert!(y_train.dim() == n_observations);

    struct Capture<A: Scalar> {
        lml: f64,
        theta: Vec<f64>,
        noise: f64,
        factorization: CholeskyFactorized<ndarray::OwnedRepr<A>>,
        alpha: Array1<A>,
    }

    // The objective calculates the negative log-marginal likelihood
    // of a theta vector (noise first, then kernel parameters) and its gradient.
    // The best intermediate result is captured
    // so that its matrices do not have to be recomputed afterwards.
    let capture: std::cell::RefCell<Option<Capture<A>>> = None.into();
    let obj_func = |theta: &[f64], want_gradient: Option<&mut [f64]>, _: &mut ()| -> f64 {
        let (noise_theta, kernel_theta) = theta.split_first().unwrap();
        let kernel = kernel.clone().with_clamped_theta(kernel_theta);
        let noise: A = A::from_f(noise_theta.exp());

        let Lml {
            lml,
            lml_gradient,
            alpha,
            factorization,
        } = match Lml::of(kernel, noise, x_train.view(), y_train.view()) {
            Some(result) => result,
            None => {
                // not invertible at this theta
                if let Some(grad) = want_gradient {
                    for g in grad {
                        *g = 0.0;
                    }
                }
                return std::f64::INFINITY;
            }
        };

        let best_lml = capture.borrow().as_ref().map(|cap| cap.lml);
        if best_lml.map(|best| lml > best).unwrap_or(true) {
            capture.replace(Some(Capture {
                lml,
                theta: kernel_theta.to_vec(),
                noise: noise.into(),
                factorization,
                alpha,
            }));
        }

        // negate the lml for minimization
        if let Some(gradient) = want_gradient {
            for (out, lg) in gradient.iter_mut().zip(lml_gradient) {
                *out = -lg;
            }
        }
        -lml
    };

    let mut bounds = vec![(noise.min().ln(), noise.max().ln())];
    bounds.extend(kernel.bounds());

    let mut initial_theta = vec![noise.value().ln()];
    initial_theta.extend(kernel.theta());

    crate::util::minimize_by_gradient_with_restarts(
        &obj_func,
        initial_theta.as_mut_slice(),
        bounds.as_slice(),
        (),
        n_restarts_optimizer,
        rng,
    );

    let Capture {
        theta,
        noise: captured_noise,
        factorization,
        alpha,
        lml,
    } = capture.replace(None).unwrap();

    kernel = kernel.clone().with_clamped_theta(theta.as_slice());
    let noise = noise.with_clamped_value(captured_noise);

    // precompute arrays needed at prediction
    use ndarray_linalg::cholesky::*;
    let k_inv = factorization.invc_into().unwrap();
    KernelFit {
        kernel,
        noise,
        alpha,
        k_inv,
        lml,
    }
}

/// The log-marginal likelihood of a kernel/noise configuration,
/// with its gradient with respect to the log-transformed parameters.
pub struct Lml<A> {
    pub lml: f64,
    pub lml_gradient: Vec<f64>,
    pub alpha: Array1<A>,
    pub factorization: CholeskyFactorized<ndarray::OwnedRepr<A>>,
}

impl<A: Scalar> Lml<A> {
    /// Returns None if the kernel matrix cannot be Cholesky-factorized.
    pub fn of(
        kernel: impl Kernel,
        noise: A,
        x_train: ArrayView2<A>,
        y_train: ArrayView1<A>,
    ) -> Option<Self> {
        use ndarray_linalg::cholesky::*;

        // The combined gradient stacks the noise gradient
        // before the kernel gradient, matching the theta layout.
        // Actually performing the stacking is unnecessary.
        let (mut kernel_matrix, kernel_gradient) = kernel.theta_grad(x_train);
        let noise_gradient = Array2::eye(x_train.nrows()) * noise;

        kernel_matrix.diag_mut().map_inplace(|x| *x = *x + noise);

        let factorization = match kernel_matrix.factorizec(UPLO::Lower) {
            Ok(lower) => lower,
            Err(_) => return None,
        };

        // solve "K alpha = y" for alpha based on the Cholesky factorization
        let alpha = factorization.solvec(&y_train).unwrap();
        assert!(alpha.dim() == y_train.len());

        let lml = -0.5 * y_train.dot(&alpha).into()
            - factorization.factor.diag().mapv(Float::ln).sum().into()
            - y_train.len() as f64 / 2.0 * (2.0 * std::f64::consts::PI).ln();

        let lml_gradient = {
            let tmp = outer(alpha.view(), alpha.view()) - &factorization.invc().unwrap();
            // Compute "0.5 * trace(tmp dot gradient)"
            // without constructing the full matrix
            // as only the diagonal is required.
            std::iter::once(noise_gradient.view())
                .chain(kernel_gradient.axis_iter(Axis(2)))
                .map(|grad| 0.5 * (&tmp * &grad).sum().into())
                .collect()
        };

        Some(Lml {
            lml,
            lml_gradient,
            alpha,
            factorization,
        })
    }
}

fn outer<A: Scalar>(a: ArrayView1<A>, b: ArrayView1<A>) -> Array2<A> {
    let mut out = b
        .insert_axis(Axis(0))
        .broadcast((a.len(), b.len()))
        .expect("the b array can be broadcast")
        .to_owned();
    out *= &a.insert_axis(Axis(1));
    out
}
