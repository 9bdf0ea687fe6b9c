use ndarray::prelude::*;
use ndarray::stack;

use crate::gpr::Scalar;
use crate::util::{BoundedValue, BoundsError};

/// A tunable covariance function for a Gaussian process.
pub trait Kernel: Clone + std::fmt::Debug {
    /// Evaluate the kernel function.
    /// Input arrays have shape (n_samples, n_features).
    fn kernel<A: Scalar>(&self, x1: ArrayView2<A>, x2: ArrayView2<A>) -> Array2<A>;

    /// The kernel matrix for x with itself,
    /// along with its gradient with respect to the log-transformed parameters theta.
    fn theta_grad<A: Scalar>(&self, x: ArrayView2<A>) -> (Array2<A>, Array3<A>);

    /// The diagonal of `kernel(x, x)`, computed without the full matrix.
    fn diag<A: Scalar>(&self, x: ArrayView2<A>) -> Array1<A>;

    /// Number of tunable parameters.
    fn n_params(&self) -> usize;

    /// The log-transformed parameters, as tuned during fitting.
    fn theta(&self) -> Vec<f64>;

    /// Update the kernel parameters with a theta vector.
    /// Fails if a parameter would violate its bounds.
    /// Panics if the theta has wrong length, must equal n_params().
    fn with_theta(self, theta: &[f64]) -> Result<Self, BoundsError<f64>>
    where
        Self: Sized;

    /// Update the kernel parameters with a theta vector.
    /// Parameters that would violate bounds are clamped to the bound instead.
    /// Panics if the theta has wrong length, must equal n_params().
    fn with_clamped_theta(self, theta: &[f64]) -> Self
    where
        Self: Sized;

    /// The theta bounds for tuning (log-transformed).
    fn bounds(&self) -> Vec<(f64, f64)>;
}

/// A constant kernel, used to scale the amplitude of another kernel.
#[derive(Clone, Debug)]
pub struct ConstantKernel {
    constant: BoundedValue<f64>,
}

impl ConstantKernel {
    pub fn new(constant: BoundedValue<f64>) -> Self {
        ConstantKernel { constant }
    }

    pub fn constant(&self) -> BoundedValue<f64> {
        self.constant.clone()
    }
}

impl Kernel for ConstantKernel {
    fn kernel<A: Scalar>(&self, x1: ArrayView2<A>, x2: ArrayView2<A>) -> Array2<A> {
        Array::from_elem((x1.nrows(), x2.nrows()), A::from_f(self.constant.value()))
    }

    fn theta_grad<A: Scalar>(&self, x: ArrayView2<A>) -> (Array2<A>, Array3<A>) {
        let kernel = self.kernel(x, x);
        let gradient =
            Array::from_elem((x.nrows(), x.nrows(), 1), A::from_f(self.constant.value()));
        (kernel, gradient)
    }

    fn diag<A: Scalar>(&self, x: ArrayView2<A>) -> Array1<A> {
        Array::from_elem(x.nrows(), A::from_f(self.constant.value()))
    }

    fn n_params(&self) -> usize {
        1
    }

    fn theta(&self) -> Vec<f64> {
        vec![self.constant.value().ln()]
    }

    fn with_theta(self, theta: &[f64]) -> Result<Self, BoundsError<f64>> {
        let constant = single_theta(theta);
        Ok(Self::new(self.constant.with_value(constant.exp())?))
    }

    fn with_clamped_theta(self, theta: &[f64]) -> Self {
        let constant = single_theta(theta);
        Self::new(self.constant.with_clamped_value(constant.exp()))
    }

    fn bounds(&self) -> Vec<(f64, f64)> {
        vec![(self.constant.min().ln(), self.constant.max().ln())]
    }
}

fn single_theta(theta: &[f64]) -> f64 {
    match *theta {
        [value] => value,
        _ => panic!("theta slice must contain exactly one value"),
    }
}

/// A product of two kernels `k1 * k2`.
#[derive(Clone)]
pub struct Product<K1, K2>
where
    K1: Kernel,
    K2: Kernel,
{
    k1: K1,
    k2: K2,
}

impl<K1: Kernel, K2: Kernel> Product<K1, K2> {
    pub fn of(k1: K1, k2: K2) -> Self {
        Product { k1, k2 }
    }

    pub fn k1(&self) -> &K1 {
        &self.k1
    }

    pub fn k2(&self) -> &K2 {
        &self.k2
    }
}

impl<K1, K2> Kernel for Product<K1, K2>
where
    K1: Kernel,
    K2: Kernel,
{
    fn kernel<A: Scalar>(&self, xa: ArrayView2<A>, xb: ArrayView2<A>) -> Array2<A> {
        self.k1.kernel(xa, xb) * self.k2.kernel(xa, xb)
    }

    fn theta_grad<A: Scalar>(&self, x: ArrayView2<A>) -> (Array2<A>, Array3<A>) {
        let (kernel1, gradient1) = self.k1.theta_grad(x);
        let (kernel2, gradient2) = self.k2.theta_grad(x);
        let kernel = &kernel1 * &kernel2;
        let gradient = stack!(
            Axis(2),
            gradient1 * kernel2.insert_axis(Axis(2)),
            gradient2 * kernel1.insert_axis(Axis(2))
        );
        (kernel, gradient)
    }

    fn diag<A: Scalar>(&self, x: ArrayView2<A>) -> Array1<A> {
        self.k1.diag(x) * self.k2.diag(x)
    }

    fn n_params(&self) -> usize {
        self.k1.n_params() + self.k2.n_params()
    }

    fn theta(&self) -> Vec<f64> {
        let mut theta = self.k1.theta();
        theta.extend(self.k2.theta());
        theta
    }

    fn with_theta(self, theta: &[f64]) -> Result<Self, BoundsError<f64>> {
        assert_eq!(theta.len(), self.n_params());
        let (theta1, theta2) = theta.split_at(self.k1.n_params());
        Ok(Self::of(
            self.k1.with_theta(theta1)?,
            self.k2.with_theta(theta2)?,
        ))
    }

    fn with_clamped_theta(self, theta: &[f64]) -> Self {
        assert_eq!(theta.len(), self.n_params());
        let (theta1, theta2) = theta.split_at(self.k1.n_params());
        Self::of(
            self.k1.with_clamped_theta(theta1),
            self.k2.with_clamped_theta(theta2),
        )
    }

    fn bounds(&self) -> Vec<(f64, f64)> {
        let mut bounds = self.k1.bounds();
        bounds.extend(self.k2.bounds());
        bounds
    }
}

impl<K1: Kernel, K2: Kernel> std::fmt::Debug for Product<K1, K2> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Product")
            .field(&self.k1)
            .field(&self.k2)
            .finish()
    }
}
