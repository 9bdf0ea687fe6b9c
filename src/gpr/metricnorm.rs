use ndarray::prelude::*;
use ndarray_stats::QuantileExt as _;
use num_traits::Float;

use crate::gpr::Scalar;

/// Keeps the normalized metrics away from exactly zero.
const FUDGE_MIN: f64 = 0.05;

/// Normalization of the observed metric values before model fitting.
///
/// The GP prior assumes zero-mean data of unit amplitude,
/// but validation losses can live on any scale.
/// The normalization is estimated from the observed data
/// and can project predictions back into natural units.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricNorm<A> {
    amplitude: A,
    expected: A,
    projection: Projection,
}

/// How the metric is warped before normalization.
/// Logarithmic warping suits metrics that improve by orders of magnitude,
/// such as training losses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Logarithmic,
    Linear,
}

mod logwarp {
    use crate::Scalar;
    use ndarray::prelude::*;
    use num_traits::Float;

    pub fn project_into<A: Float>(y: Array1<A>) -> Array1<A> {
        y.mapv(Float::ln)
    }

    pub fn project_location_from<A: Float>(y: Array1<A>) -> Array1<A> {
        y.mapv(Float::exp)
    }

    /// variance for a lognormal distribution is `(exp(s^2) - 1) * exp(2 mu + s^2)`
    pub fn project_variance_from<A: Scalar>(mean: Array1<A>, variance: Array1<A>) -> Array1<A> {
        (mean * A::from_i(2) + &variance).mapv(Float::exp)
            * (variance.mapv(Float::exp) - A::from_i(1))
    }

    #[test]
    fn variance_matches_closed_form() {
        let logmean = array![0.0];
        let logvar = array![1.0];
        let actual = *project_variance_from(logmean, logvar).first().unwrap();
        let expected = (f64::exp(1.0) - 1.0) * f64::exp(1.0);
        assert!(
            approx_eq!(f64, actual, expected, epsilon = 1e-9),
            "expected {} but got {}",
            expected,
            actual
        );
    }
}

impl<A> MetricNorm<A>
where
    A: Scalar,
{
    /// Estimate a normalization from observed data and apply it.
    pub fn new_project_into_normalized(y: Array1<A>, projection: Projection) -> (Array1<A>, Self) {
        match projection {
            Projection::Linear => {
                let expected = guess_min(y.view(), A::from_i(0));
                let y = y - expected;
                let amplitude = guess_amplitude(y.view());
                let y = y / amplitude + A::from_f(FUDGE_MIN);

                let cfg = MetricNorm {
                    amplitude,
                    expected,
                    projection,
                };
                (y, cfg)
            }
            Projection::Logarithmic => {
                let expected = guess_min(y.view(), A::from_f(1.0));
                let y = logwarp::project_into(y - expected);
                let amplitude = guess_amplitude(y.view());
                let y = y / amplitude;

                let cfg = MetricNorm {
                    amplitude,
                    expected,
                    projection,
                };
                (y, cfg)
            }
        }
    }

    pub fn project_into_normalized(&self, y: Array1<A>) -> Array1<A> {
        let Self {
            amplitude,
            expected,
            projection,
        } = *self;
        match projection {
            Projection::Linear => (y - expected) / amplitude + A::from_f(FUDGE_MIN),
            Projection::Logarithmic => logwarp::project_into(y - expected) / amplitude,
        }
    }

    /// Project a value back from the normalized range to the natural range.
    /// Using this function is OK for observations or quantiles.
    /// It is not OK for mean, variance, etc.
    pub fn project_location_from_normalized(&self, y: Array1<A>) -> Array1<A> {
        let Self {
            amplitude,
            expected,
            projection,
        } = *self;
        match projection {
            Projection::Linear => (y - A::from_f(FUDGE_MIN)) * amplitude + expected,
            Projection::Logarithmic => logwarp::project_location_from(y * amplitude) + expected,
        }
    }

    pub fn project_std_from_normalized(
        &self,
        mean: ArrayView1<A>,
        variance: Array1<A>,
    ) -> Array1<A> {
        let Self {
            amplitude,
            expected: _,
            projection,
        } = *self;
        match projection {
            Projection::Linear => variance.mapv(Float::sqrt) * amplitude,
            Projection::Logarithmic => {
                let mu = mean.to_owned() * amplitude;
                let sigma2 = variance * amplitude * amplitude;
                logwarp::project_variance_from(mu, sigma2).mapv(Float::sqrt)
            }
        }
    }
}

/// select a value so that all ys can be made non-negative
fn guess_min<A: Scalar>(y: ArrayView1<A>, minimum: A) -> A {
    *y.min().unwrap() - minimum
}

/// select a value so that the mean can be normalized to 1, as long as any deviation exists
fn guess_amplitude<A: Scalar>(y: ArrayView1<A>) -> A {
    let amplitude = y.sum() / A::from_f(y.len() as f64);
    if amplitude > A::from_f(0.0) {
        amplitude
    } else {
        A::from_f(1.0)
    }
}

impl std::str::FromStr for Projection {
    type Err = failure::Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(match input {
            "lin" | "linear" => Projection::Linear,
            "log" | "ln" | "logarithmic" => Projection::Logarithmic,
            _ => {
                return Err(format_err!(
                    "unknown name for Projection, must be {{lin, linear, log, ln, logarithmic}}"
                ))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::AbsDiffEq as _;

    fn test_inverse(input: impl Into<Array1<f64>>, projection: Projection) {
        let input = input.into();
        let (y, norm) = MetricNorm::new_project_into_normalized(input.clone(), projection);
        let rey = norm.project_into_normalized(input.clone());
        let result = norm.project_location_from_normalized(y.clone());
        assert!(
            input.abs_diff_eq(&result, 1e-4),
            "result should be close to input\n\
             input : {}\n\
             result: {}",
            input,
            result
        );
        assert!(
            y.abs_diff_eq(&rey, 1e-4),
            "project_into variants should produce same result\n\
             new_project_into_normalized : {}\n\
             norm.project_into_normalized: {}",
            y,
            rey
        );
    }

    #[test]
    fn linear_has_an_inverse_operation() {
        test_inverse(vec![1., 2., 3., 4.], Projection::Linear);
    }

    #[test]
    fn logarithmic_has_an_inverse_operation() {
        test_inverse(vec![1., 2., 3., 4.], Projection::Logarithmic);
    }

    #[test]
    fn linear_also_works_with_negative_numbers() {
        test_inverse(vec![-5., 3., 8., -2.], Projection::Linear);
    }

    #[test]
    fn linear_can_handle_variance() {
        let norm = MetricNorm {
            expected: 1234.0,
            amplitude: 3.0,
            projection: Projection::Linear,
        };
        let std = norm.project_std_from_normalized(Array1::zeros(3).view(), array![0.0, 1.0, 4.0]);
        let expected = array![0.0, 3.0, 6.0];
        assert!(
            std.abs_diff_eq(&expected, 1e-4),
            "expected: {} but got: {}",
            expected,
            std
        );
    }

    #[test]
    fn logarithmic_std_matches_sampled_data() {
        use float_cmp::ApproxEqRatio as _;
        use statrs::statistics::Statistics as _;

        let mut rng = crate::RNG::new_with_seed(903282318);
        let data: Array1<f64> = std::iter::repeat_with(|| rng.normal(3.0, 1.0).exp())
            .take(500)
            .collect();
        let expected_std = data.iter().cloned().population_std_dev();

        let (transformed, norm) =
            MetricNorm::new_project_into_normalized(data.clone(), Projection::Logarithmic);
        let transformed_mean = transformed.iter().cloned().mean();
        let transformed_variance = transformed.iter().cloned().population_variance();

        let actual_std = *norm
            .project_std_from_normalized(
                array![transformed_mean].view(),
                array![transformed_variance],
            )
            .first()
            .unwrap();

        // because we use noisy data, the comparison must be very rough
        assert!(
            actual_std.approx_eq_ratio(&expected_std, 0.15),
            "std got: {} expected: {}",
            actual_std,
            expected_std
        );
    }

    #[test]
    fn parses_projection_names() {
        assert_eq!("lin".parse::<Projection>().unwrap(), Projection::Linear);
        assert_eq!(
            "log".parse::<Projection>().unwrap(),
            Projection::Logarithmic
        );
        assert!("wat".parse::<Projection>().is_err());
    }
}
