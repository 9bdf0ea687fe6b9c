use itertools::Itertools as _;
use ndarray::prelude::*;
use std::iter::FromIterator;

use crate::gpr::{Kernel, Scalar};

pub fn predict<A>(
    kernel: &impl Kernel,
    alpha: ArrayView1<A>,
    x: ArrayView2<A>,
    x_train: ArrayView2<A>,
    k_inv: ArrayView2<A>,
    want_variance: Option<ArrayViewMut1<A>>,
) -> Array1<A>
where
    A: Scalar,
{
    let k_trans: Array2<A> = kernel.kernel(x.view(), x_train);
    let y = k_trans.dot(&alpha);

    if let Some(mut variance_out) = want_variance {
        // Compute variance of predictive distribution.
        // The "min_noise" term is added to avoid negative variances
        // (could occur due to numeric issues).
        let min_noise = A::from_f(1e-5);
        // y_var[k] = diag(kernel(X))[k] + min_noise - sum(for<i> dot(k_trans, k_inv)[i] * k_trans[i])
        let mut y_var = kernel.diag(x.view()) + min_noise
            - Array::from_iter(
                k_trans
                    .dot(&k_inv)
                    .outer_iter()
                    .zip(k_trans.outer_iter())
                    .map(|(a, b)| a.dot(&b)),
            );

        if let Some(elements_below_threshold) =
            clamp_negative_variance(y_var.view_mut(), -min_noise.sqrt())
        {
            eprintln!(
                "Variances below 0 were predicted and will be corrected: {:.2e}",
                elements_below_threshold.into_iter().format(", "),
            );
        }

        variance_out.assign(&y_var);
    }

    y
}

/// Check if any of the variances is negative because of numerical issues.
/// If yes: set the variance to 0.
/// But only warn on largeish differences.
fn clamp_negative_variance<A: Scalar>(
    mut variances: ArrayViewMut1<A>,
    warning_level: A,
) -> Option<Vec<A>> {
    let elements_below_threshold: Vec<_> = variances
        .iter()
        .cloned()
        .filter(|x| *x < warning_level)
        .collect();

    let zero = A::zero();

    variances.map_inplace(|x| {
        if *x < zero {
            *x = zero;
        }
    });

    if elements_below_threshold.is_empty() {
        None
    } else {
        Some(elements_below_threshold)
    }
}

/// Expected improvement of a Gaussian belief over the incumbent value `fmin`,
/// for minimization.
pub fn expected_improvement(mean: f64, std: f64, fmin: f64) -> f64 {
    assert!(mean.is_finite(), "mean must be finite: {}", mean);
    assert!(std.is_finite(), "std must be finite: {}", std);
    assert!(fmin.is_finite(), "fmin must be finite: {}", fmin);

    // trivial case: if std is zero, the EI depends purely on the position of the mean.
    // That way, we don't have to calculate z-scores which could become NaN.
    if std <= 0.0 || ulps_eq!(std, 0.0) {
        if mean < fmin {
            // improvement by the difference is guaranteed
            return fmin - mean;
        } else {
            // guaranteed that no improvement is possible
            return 0.0;
        }
    }

    use statrs::distribution::{Continuous, Univariate};
    let norm = statrs::distribution::Normal::new(0.0, 1.0).unwrap();
    let z = -(mean - fmin) / std;
    let ei = -(mean - fmin) * norm.cdf(z) + std * norm.pdf(z);

    assert!(ei.is_finite(), "EI must be finite: {}", ei);
    assert!(
        ei >= 0.0 || ulps_eq!(ei, 0.0),
        "EI must not be negative: {}",
        ei
    );
    ei.max(0.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gpr::{ConstantKernel, KernelFit, Matern, Product};
    use crate::util::BoundedValue;

    #[test]
    fn prediction_works_on_a_simple_case() {
        // problem definition
        let xs = array![[0.0], [0.5], [0.5], [1.0]];
        let ys = array![0.0, 0.8, 1.2, 2.0];
        let kernel = Product::of(
            ConstantKernel::new(BoundedValue::new(3.0, 0.1, 4.0).unwrap()),
            Matern::new(2.5, vec![BoundedValue::new(1.5, 0.1, 2.0).unwrap()]),
        );
        const SEED: usize = 938274;
        const N_RESTARTS_OPTIMIZER: usize = 4;
        let mut rng = crate::RNG::new_with_seed(SEED);

        // precompute stuff
        let KernelFit {
            kernel,
            alpha,
            k_inv,
            ..
        } = KernelFit::new(
            kernel,
            xs.clone(),
            ys.clone(),
            &mut rng,
            N_RESTARTS_OPTIMIZER,
            BoundedValue::new(1.0, 0.001, 1.0).unwrap(),
        );

        // perform prediction
        let predict_xs = array![[0.0], [0.25], [0.5], [0.75], [1.0]];
        let mut variances = Array1::zeros(5);
        let prediction = predict(
            &kernel,
            alpha.view(),
            predict_xs.view(),
            xs.view(),
            k_inv.view(),
            Some(variances.view_mut()),
        );

        assert_all_close!(prediction, array![0.0, 0.5, 1.0, 1.5, 2.0], 0.1);
        assert_all_close!(variances, Array1::from_elem(5, 0.03), 0.03);
    }

    #[test]
    fn clamping_returns_elements_with_very_negative_variances() {
        let mut variances = array![1., -2., -0.5];
        assert_eq!(
            clamp_negative_variance(variances.view_mut(), -1.),
            Some(vec![-2.])
        );
        assert_eq!(variances, array![1., 0., 0.]);
    }

    #[test]
    fn clamping_ignores_mild_negative_variances() {
        let mut variances = array![1., 2., -0.5];
        assert_eq!(clamp_negative_variance(variances.view_mut(), -1.), None);
        assert_eq!(variances, array![1., 2., 0.]);
    }

    #[test]
    fn ei_is_zero_without_possible_improvement() {
        assert_eq!(expected_improvement(2.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn ei_equals_the_gap_when_certain() {
        assert_eq!(expected_improvement(0.25, 0.0, 1.0), 0.75);
    }

    #[test]
    fn ei_grows_with_uncertainty() {
        let low_std = expected_improvement(1.0, 0.1, 1.0);
        let high_std = expected_improvement(1.0, 1.0, 1.0);
        assert!(
            low_std < high_std,
            "EI should grow with std: {} < {}",
            low_std,
            high_std
        );
    }

    #[test]
    fn ei_prefers_lower_means() {
        let worse = expected_improvement(1.5, 0.3, 1.0);
        let better = expected_improvement(0.5, 0.3, 1.0);
        assert!(
            worse < better,
            "EI should prefer lower means: {} < {}",
            worse,
            better
        );
    }
}
