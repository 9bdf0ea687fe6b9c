use itertools::Itertools as _;
use ndarray::prelude::*;
use rand::seq::SliceRandom as _;
use serde::Serialize;

use crate::{Scalar, RNG};

/// The hyperparameter configuration space.
/// Configurations are handled in their natural units.
/// For the surrogate model, configurations are projected into a feature
/// space of reals in the range 0 to 1 inclusive,
/// with the columns reordered so that log-scaled hyperparameters come first,
/// then linearly scaled ones, then categorical ones.
#[derive(Debug, Clone, Default)]
pub struct ConfigSpace {
    params: Vec<Hyperparameter>,
}

impl ConfigSpace {
    /// Create a new empty configuration space.
    pub fn new() -> Self {
        ConfigSpace::default()
    }

    /// The number of hyperparameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// The space is empty if no hyperparameters were provided.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// The hyperparameters, in declaration order.
    pub fn params(&self) -> &[Hyperparameter] {
        self.params.as_slice()
    }

    /// Add a real-valued hyperparameter.
    /// The bounds `lo`, `hi` are inclusive.
    /// Panics if the range has zero size.
    pub fn add_real(&mut self, name: impl Into<String>, lo: f64, hi: f64) {
        self.add_parameter(Hyperparameter::Real {
            name: name.into(),
            lo,
            hi,
            log: false,
        });
    }

    /// Add a real-valued hyperparameter that is sampled and modeled on a log scale,
    /// e.g. a learning rate. Panics unless `0 < lo < hi`.
    pub fn add_log_real(&mut self, name: impl Into<String>, lo: f64, hi: f64) {
        self.add_parameter(Hyperparameter::Real {
            name: name.into(),
            lo,
            hi,
            log: true,
        });
    }

    /// Add an integer-valued hyperparameter.
    /// The bounds `lo`, `hi` are inclusive.
    pub fn add_int(&mut self, name: impl Into<String>, lo: i64, hi: i64) {
        self.add_parameter(Hyperparameter::Int {
            name: name.into(),
            lo,
            hi,
            log: false,
        });
    }

    /// Add an integer-valued hyperparameter on a log scale, e.g. a batch size.
    pub fn add_log_int(&mut self, name: impl Into<String>, lo: i64, hi: i64) {
        self.add_parameter(Hyperparameter::Int {
            name: name.into(),
            lo,
            hi,
            log: true,
        });
    }

    /// Add a categorical hyperparameter with the given choices.
    pub fn add_categorical(
        &mut self,
        name: impl Into<String>,
        choices: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.add_parameter(Hyperparameter::Categorical {
            name: name.into(),
            choices: choices.into_iter().map(Into::into).collect(),
        });
    }

    pub fn add_parameter(&mut self, param: Hyperparameter) {
        param.validate();
        self.params.push(param);
    }

    /// Hyperparameter indices in feature-column order:
    /// log-scaled columns first, then linear columns, then categorical columns.
    /// This ordering keeps surrogate preprocessing free of column shuffling.
    pub fn feature_order(&self) -> Vec<usize> {
        let log = (0..self.len()).filter(|&i| self.params[i].is_log());
        let linear = (0..self.len())
            .filter(|&i| !self.params[i].is_log() && !self.params[i].is_categorical());
        let categorical = (0..self.len()).filter(|&i| self.params[i].is_categorical());
        log.chain(linear).chain(categorical).collect()
    }

    /// For each feature column, whether it stems from a log-scaled hyperparameter.
    pub fn log_indicator(&self) -> Vec<bool> {
        self.feature_order()
            .into_iter()
            .map(|i| self.params[i].is_log())
            .collect()
    }

    /// For each feature column, whether it stems from a categorical hyperparameter.
    pub fn categorical_indicator(&self) -> Vec<bool> {
        self.feature_order()
            .into_iter()
            .map(|i| self.params[i].is_categorical())
            .collect()
    }

    /// Project a configuration into the feature space.
    ///
    /// ```
    /// # use hpo4dl::ConfigSpace;
    /// let mut space = ConfigSpace::new();
    /// space.add_real("a", -2.0, 2.0);
    /// space.add_real("b", 0.0, 10.0);
    /// let config = [(-1.0).into(), 7.0.into()];
    /// let features: Vec<f64> = space.project_into_features(config);
    /// assert_eq!(features, &[0.25, 0.7]);
    /// ```
    pub fn project_into_features<A: Scalar>(&self, x: impl AsRef<[ParamValue]>) -> Vec<A> {
        let x = x.as_ref();
        assert!(
            x.len() == self.params.len(),
            "the space has {} hyperparameters but got {} values",
            self.params.len(),
            x.len(),
        );
        self.feature_order()
            .into_iter()
            .map(|i| self.params[i].project_into_features(x[i]))
            .collect()
    }

    pub fn project_into_features_array<A: Scalar, Sample: AsRef<[ParamValue]>>(
        &self,
        xs: impl IntoIterator<Item = Sample>,
    ) -> Array2<A> {
        let features = xs
            .into_iter()
            .map(|x| Array1::from(self.project_into_features(x.as_ref())))
            .collect_vec();
        ndarray::stack(
            Axis(0),
            features
                .iter()
                .map(|x| x.view().insert_axis(Axis(0)))
                .collect_vec()
                .as_slice(),
        )
        .unwrap()
    }

    /// Get a configuration back from the feature space.
    ///
    /// ```
    /// # use hpo4dl::{ConfigSpace, ParamValue};
    /// let mut space = ConfigSpace::new();
    /// space.add_log_real("lr", 1e-4, 1e-1);
    /// space.add_int("layers", 1, 8);
    /// let config = [ParamValue::Real(1e-2), ParamValue::Int(4)];
    /// let features: Vec<f64> = space.project_into_features(config.as_ref());
    /// assert_eq!(
    ///     space.project_from_features(features).as_slice(),
    ///     config.as_ref(),
    /// );
    /// ```
    pub fn project_from_features<A: Scalar>(&self, x: impl AsRef<[A]>) -> Vec<ParamValue> {
        let x = x.as_ref();
        let order = self.feature_order();
        assert!(
            x.len() == order.len(),
            "expected {} feature columns but got {}",
            order.len(),
            x.len(),
        );
        let mut sample = vec![ParamValue::Int(0); self.len()];
        for (feature, i) in x.iter().zip(order) {
            sample[i] = self.params[i].project_from_features(*feature);
        }
        sample
    }

    pub fn sample(&self, rng: &mut RNG) -> Vec<ParamValue> {
        self.sample_n(1, rng).into_iter().next().unwrap()
    }

    /// Obtain multiple evenly-distributed random configurations.
    ///
    /// Uses Latin Hypercube Sampling to cover the entire space with even probability.
    pub fn sample_n(&self, n: usize, rng: &mut RNG) -> Vec<Vec<ParamValue>> {
        let choices = self
            .params
            .iter()
            .map(|param| {
                let mut samples = param.sample_n(n, rng);
                assert_eq!(samples.len(), n, "sample must contain n elements");
                samples.shuffle(rng.basic_rng_mut());
                samples
            })
            .collect_vec();
        (0..n)
            .map(|i| choices.iter().map(|samples| samples[i]).collect())
            .collect()
    }

    /// Mutate a configuration in place with a truncated-normal step per dimension.
    /// The relscale entries are normalized standard deviations,
    /// given per hyperparameter in declaration order.
    pub fn mutate_inplace(&self, sample: &mut [ParamValue], relscale: &[f64], rng: &mut RNG) {
        assert_eq!(sample.len(), relscale.len());
        assert_eq!(sample.len(), self.len());

        for (i, x) in sample.iter_mut().enumerate() {
            self.params[i].mutate_inplace(x, relscale[i], rng);
        }
    }
}

fn sample_truncnorm(mu: f64, sigma: f64, a: f64, b: f64, rng: &mut RNG) -> f64 {
    use statrs::distribution::{InverseCDF, Normal, Univariate};

    let normal = Normal::new(0.0, 1.0).unwrap();
    let az = (a - mu) / sigma;
    let bz = (b - mu) / sigma;

    let xz = rng.uniform(normal.cdf(az)..=normal.cdf(bz));

    normal.inverse_cdf(xz) * sigma + mu
}

/// The value of a single hyperparameter.
/// Categorical values are stored as the choice index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Real(f64),
    Int(i64),
    Cat(usize),
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> ParamValue {
        ParamValue::Real(x)
    }
}

impl From<i64> for ParamValue {
    fn from(x: i64) -> ParamValue {
        ParamValue::Int(x)
    }
}

impl ParamValue {
    pub fn to_f64(self) -> f64 {
        match self {
            ParamValue::Real(x) => x,
            ParamValue::Int(x) => x as f64,
            ParamValue::Cat(x) => x as f64,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ParamValue::Real(x) => write!(fmt, "{}", x),
            ParamValue::Int(x) => write!(fmt, "{}", x),
            ParamValue::Cat(x) => write!(fmt, "{}", x),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Hyperparameter {
    Real {
        name: String,
        lo: f64,
        hi: f64,
        log: bool,
    },
    Int {
        name: String,
        lo: i64,
        hi: i64,
        log: bool,
    },
    Categorical {
        name: String,
        choices: Vec<String>,
    },
}

impl Hyperparameter {
    pub fn name(&self) -> &str {
        match self {
            Hyperparameter::Real { name, .. } => name,
            Hyperparameter::Int { name, .. } => name,
            Hyperparameter::Categorical { name, .. } => name,
        }
    }

    pub fn is_log(&self) -> bool {
        match *self {
            Hyperparameter::Real { log, .. } => log,
            Hyperparameter::Int { log, .. } => log,
            Hyperparameter::Categorical { .. } => false,
        }
    }

    pub fn is_categorical(&self) -> bool {
        match self {
            Hyperparameter::Categorical { .. } => true,
            _ => false,
        }
    }

    /// Render a value in its natural units, resolving categorical indices to choice names.
    pub fn format_value(&self, x: ParamValue) -> String {
        match (self, x) {
            (Hyperparameter::Categorical { choices, .. }, ParamValue::Cat(i)) => choices
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("<invalid choice {}>", i)),
            (_, x) => x.to_string(),
        }
    }

    fn validate(&self) {
        match *self {
            Hyperparameter::Real {
                lo, hi, log, ref name,
            } => {
                assert!(lo < hi, "{}: lo {} must be below hi {}", name, lo, hi);
                assert!(
                    !log || lo > 0.0,
                    "{}: log-scaled bounds must be positive, got lo {}",
                    name,
                    lo
                );
            }
            Hyperparameter::Int {
                lo, hi, log, ref name,
            } => {
                assert!(lo < hi, "{}: lo {} must be below hi {}", name, lo, hi);
                assert!(
                    !log || lo > 0,
                    "{}: log-scaled bounds must be positive, got lo {}",
                    name,
                    lo
                );
            }
            Hyperparameter::Categorical {
                ref choices,
                ref name,
            } => {
                assert!(
                    choices.len() >= 2,
                    "{}: categorical needs at least two choices",
                    name
                );
            }
        }
    }

    fn project_into_features<A: Scalar>(&self, x: ParamValue) -> A {
        match *self {
            Hyperparameter::Real {
                lo,
                hi,
                log,
                ref name,
            } => match x {
                ParamValue::Real(x) if log => {
                    A::from_f((x.ln() - lo.ln()) / (hi.ln() - lo.ln()))
                }
                ParamValue::Real(x) => A::from_f((x - lo) / (hi - lo)),
                x @ _ => unreachable!("Real({}): cannot project {:?} into features", name, x),
            },
            Hyperparameter::Int {
                lo,
                hi,
                log,
                ref name,
            } => match x {
                ParamValue::Int(x) if log => A::from_f(
                    ((x as f64).ln() - (lo as f64).ln()) / ((hi as f64).ln() - (lo as f64).ln()),
                ),
                // Why not "... / (hi - lo + 1)"?
                // So that the min/max integers match the min/max feature space bounds.
                // The corresponding rounding areas still match.
                ParamValue::Int(x) => A::from_f(((x - lo) as f64) / (hi - lo) as f64),
                x @ _ => unreachable!("Int({}): cannot project {:?} into features", name, x),
            },
            Hyperparameter::Categorical {
                ref choices,
                ref name,
            } => match x {
                ParamValue::Cat(i) => {
                    assert!(i < choices.len(), "{}: choice {} out of range", name, i);
                    A::from_f(i as f64 / (choices.len() - 1) as f64)
                }
                x @ _ => unreachable!("Categorical({}): cannot project {:?}", name, x),
            },
        }
    }

    fn project_from_features<A: Scalar>(&self, x: A) -> ParamValue {
        match *self {
            Hyperparameter::Real { lo, hi, log, .. } => {
                if log {
                    ParamValue::Real((x.into() * (hi.ln() - lo.ln()) + lo.ln()).exp())
                } else {
                    ParamValue::Real(x.into() * (hi - lo) + lo)
                }
            }
            Hyperparameter::Int { lo, hi, log, .. } => {
                let value = if log {
                    (x.into() * ((hi as f64).ln() - (lo as f64).ln()) + (lo as f64).ln())
                        .exp()
                        .round() as i64
                } else {
                    (x.into() * (hi - lo + 1) as f64).floor() as i64 + lo
                };
                ParamValue::Int(crate::util::clip(value, Some(lo), Some(hi)))
            }
            Hyperparameter::Categorical { ref choices, .. } => {
                let i = (x.into() * (choices.len() - 1) as f64).round() as i64;
                ParamValue::Cat(crate::util::clip(i, Some(0), Some(choices.len() as i64 - 1))
                    as usize)
            }
        }
    }

    fn mutate_inplace(&self, x: &mut ParamValue, relscale: f64, rng: &mut RNG) {
        match *self {
            Hyperparameter::Real {
                lo,
                hi,
                log: false,
                ref name,
            } => match *x {
                ParamValue::Real(ref mut x) => *x = sample_truncnorm(*x, relscale, lo, hi, rng),
                x @ _ => unreachable!("Real({}): cannot mutate {:?}", name, x),
            },
            // log-scaled, integer, and categorical hyperparameters
            // are mutated in feature space
            _ => {
                *x = self.project_from_features(sample_truncnorm(
                    self.project_into_features(*x),
                    relscale,
                    0.0,
                    1.0,
                    rng,
                ))
            }
        }
    }

    /// Obtain random samples of this hyperparameter.
    ///
    /// If multiple samples are requested,
    /// each sample is taken from an equi-distributed band
    /// so that the full range is evenly covered.
    fn sample_n(&self, n: usize, rng: &mut RNG) -> Vec<ParamValue> {
        let out = sample_n_in_unit_range(n, rng)
            .into_iter()
            .map(|x| self.project_from_features(x))
            .collect_vec();
        assert_eq!(out.len(), n, "must have requested size");
        out
    }
}

fn sample_n_in_unit_range(n: usize, rng: &mut RNG) -> Vec<f64> {
    let bounds = (0..n).map(|x| x as f64 / n as f64).collect_vec();

    let last_window = bounds.last().cloned().unwrap_or(0.0)..=1.0;
    assert!(
        last_window.start() < last_window.end(),
        "window for last sample must not be empty: {:?}",
        last_window,
    );
    // select a sample in each window
    let last_item = std::iter::once(rng.uniform(last_window)).take((n > 0) as usize);
    let n_minus_one_items = bounds[..bounds.len()]
        .iter()
        .zip(&bounds[1..])
        .map(|(&window_lo, &window_hi)| rng.uniform(window_lo..window_hi));

    n_minus_one_items.chain(last_item).collect_vec()
}

impl std::str::FromStr for Hyperparameter {
    type Err = failure::Error;

    fn from_str(s: &str) -> Result<Hyperparameter, Self::Err> {
        use failure::ResultExt as _;

        let mut items = s.split_whitespace();
        let name: String = items
            .next()
            .ok_or_else(|| format_err!("too few items, expected: '<name> <type> <...>' but got: {}", s))?
            .to_owned();
        let the_type: &str = items
            .next()
            .ok_or_else(|| format_err!("too few items, expected: '<name> <type> <...>' but got: {}", s))?;

        let parse_bounds = |items: &mut dyn Iterator<Item = &str>,
                            the_type: &str|
         -> Result<(f64, f64), failure::Error> {
            let err_too_few = || {
                format_err!(
                    "too few items, expected: '<name> {} <lo> <hi>' but got: {}",
                    the_type,
                    s
                )
            };
            let lo = items
                .next()
                .ok_or_else(err_too_few)?
                .parse::<f64>()
                .with_context(|err| format!("while parsing <lo>: {}", err))?;
            let hi = items
                .next()
                .ok_or_else(err_too_few)?
                .parse::<f64>()
                .with_context(|err| format!("while parsing <hi>: {}", err))?;
            Ok((lo, hi))
        };

        let param = match the_type {
            "real" | "logreal" => {
                let (lo, hi) = parse_bounds(&mut items, the_type)?;
                ensure!(lo < hi, "<lo> must be below <hi> but got: {}", s);
                let log = the_type == "logreal";
                ensure!(
                    !log || lo > 0.0,
                    "logreal bounds must be positive but got: {}",
                    s
                );
                Hyperparameter::Real { name, lo, hi, log }
            }
            "int" | "logint" => {
                let (lo, hi) = parse_bounds(&mut items, the_type)?;
                ensure!(
                    lo.fract() == 0.0 && hi.fract() == 0.0,
                    "int bounds must be integers but got: {}",
                    s
                );
                let (lo, hi) = (lo as i64, hi as i64);
                ensure!(lo < hi, "<lo> must be below <hi> but got: {}", s);
                let log = the_type == "logint";
                ensure!(
                    !log || lo > 0,
                    "logint bounds must be positive but got: {}",
                    s
                );
                Hyperparameter::Int { name, lo, hi, log }
            }
            "cat" => {
                let choices: Vec<String> = items
                    .next()
                    .ok_or_else(|| {
                        format_err!(
                            "too few items, expected: '<name> cat <a>,<b>,...' but got: {}",
                            s
                        )
                    })?
                    .split(',')
                    .map(str::to_owned)
                    .collect();
                ensure!(
                    choices.len() >= 2,
                    "cat needs at least two choices but got: {}",
                    s
                );
                Hyperparameter::Categorical { name, choices }
            }
            t => bail!("type must be real/logreal/int/logint/cat, was: {}", t),
        };

        ensure!(items.next().is_none(), "too many items in: {}", s);

        Ok(param)
    }
}

#[cfg(test)]
mod test {
    use super::{Hyperparameter, ParamValue, RNG};

    #[test]
    fn project_int() {
        let param = Hyperparameter::Int {
            lo: -2,
            hi: 6,
            log: false,
            name: "foo".to_owned(),
        };

        let feature_min: f64 = param.project_into_features(ParamValue::Int(-2));
        let feature_max: f64 = param.project_into_features(ParamValue::Int(6));

        assert_eq!(
            param.project_from_features(0.0),
            ParamValue::Int(-2),
            "must project lower bound from features",
        );

        assert_eq!(
            param.project_from_features(1.0),
            ParamValue::Int(6),
            "must project upper bound from features",
        );

        assert_eq!(feature_min, 0.0, "feature should reach min bound");
        assert_eq!(feature_max, 1.0, "feature should reach max bound");

        for x in -2..=6 {
            let value = ParamValue::Int(x);
            let feature: f64 = param.project_into_features(value);
            assert_eq!(
                param.project_from_features(feature),
                value,
                "must roundtrip for x={}",
                x
            );
            assert!(
                0.0 <= feature && feature <= 1.0,
                "feature {} must be in unit range (x={})",
                feature,
                x
            );
        }
    }

    #[test]
    fn project_log_real() {
        let param = Hyperparameter::Real {
            lo: 1e-4,
            hi: 1e-1,
            log: true,
            name: "lr".to_owned(),
        };

        let mid: f64 = param.project_into_features(ParamValue::Real(1e-3));
        assert!(
            abs_diff_eq!(mid, 1.0 / 3.0, epsilon = 1e-9),
            "log decades must be equidistant, got {}",
            mid
        );

        match param.project_from_features(1.0 / 3.0) {
            ParamValue::Real(x) => assert!(
                abs_diff_eq!(x, 1e-3, epsilon = 1e-12),
                "inverse projection should restore the decade, got {}",
                x
            ),
            x @ _ => unreachable!("projected value must be real: {:?}", x),
        }
    }

    #[test]
    fn project_log_int_roundtrips() {
        let param = Hyperparameter::Int {
            lo: 1,
            hi: 256,
            log: true,
            name: "batch".to_owned(),
        };
        for &x in &[1i64, 2, 16, 100, 256] {
            let feature: f64 = param.project_into_features(ParamValue::Int(x));
            assert_eq!(
                param.project_from_features(feature),
                ParamValue::Int(x),
                "must roundtrip for x={}",
                x
            );
        }
    }

    #[test]
    fn project_categorical() {
        let param = Hyperparameter::Categorical {
            name: "opt".to_owned(),
            choices: vec!["sgd".to_owned(), "adam".to_owned(), "rmsprop".to_owned()],
        };
        for i in 0..3 {
            let feature: f64 = param.project_into_features(ParamValue::Cat(i));
            assert_eq!(
                param.project_from_features(feature),
                ParamValue::Cat(i),
                "must roundtrip for choice {}",
                i
            );
        }
        assert_eq!(param.format_value(ParamValue::Cat(1)), "adam");
    }

    #[test]
    fn sample_int_is_roughly_uniform() {
        let param = Hyperparameter::Int {
            lo: 1,
            hi: 3,
            log: false,
            name: "whatever".to_owned(),
        };
        let mut rng = RNG::new_with_seed(378);
        let mut counts = [0; 3];
        const EXPECTED_SAMPLES: usize = 20;
        for value in param.sample_n(3 * EXPECTED_SAMPLES, &mut rng) {
            match value {
                ParamValue::Int(x) => {
                    counts[(x - 1) as usize] += 1;
                }
                x @ _ => unreachable!("only Int() should be possible: {:?}", x),
            }
        }
        for &count in &counts {
            assert!(
                (EXPECTED_SAMPLES - 3) <= count && count <= (EXPECTED_SAMPLES + 3),
                "counts must be roughly equal: {:?}",
                counts
            );
        }
    }

    #[test]
    fn feature_order_groups_columns() {
        let mut space = super::ConfigSpace::new();
        space.add_categorical("opt", vec!["sgd", "adam"]);
        space.add_log_real("lr", 1e-4, 1e-1);
        space.add_int("layers", 1, 8);

        assert_eq!(space.feature_order(), vec![1, 2, 0]);
        assert_eq!(space.log_indicator(), vec![true, false, false]);
        assert_eq!(space.categorical_indicator(), vec![false, false, true]);

        let config = [
            ParamValue::Cat(1),
            ParamValue::Real(1e-1),
            ParamValue::Int(1),
        ];
        let features: Vec<f64> = space.project_into_features(config.as_ref());
        assert_eq!(features, vec![1.0, 0.0, 1.0]);
        assert_eq!(space.project_from_features(features), config.to_vec());
    }

    #[test]
    fn parses_parameter_syntax() {
        let param: Hyperparameter = "lr logreal 1e-4 1e-1".parse().unwrap();
        assert!(param.is_log());
        assert_eq!(param.name(), "lr");

        let param: Hyperparameter = "opt cat sgd,adam".parse().unwrap();
        assert!(param.is_categorical());

        assert!("lr real 1 1".parse::<Hyperparameter>().is_err());
        assert!("lr logreal -1 1".parse::<Hyperparameter>().is_err());
        assert!("x int 1.5 3".parse::<Hyperparameter>().is_err());
        assert!("x cat onlyone".parse::<Hyperparameter>().is_err());
        assert!("x wat 1 2".parse::<Hyperparameter>().is_err());
    }
}
