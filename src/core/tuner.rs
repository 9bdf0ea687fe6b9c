use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::core::config_manager::ConfigurationManager;
use crate::core::gp_bandit::GpBanditOptimizer;
use crate::core::graybox::{GrayboxWrapper, TrialObjective};
use crate::core::optimizer::FidelityOptimizer;
use crate::core::outputs::{Output, OutputEventHandler as _};
use crate::core::random_search::RandomSearchOptimizer;
use crate::core::space::{ConfigSpace, ParamValue};
use crate::core::trial::TrialResult;
use crate::gpr::{Projection, Scalar};
use crate::RNG;

type TimeSource = dyn Fn() -> Instant;

/// The outcome of a tuning run.
/// Metrics are reported in their natural orientation,
/// i.e. they are only negated internally when maximizing.
pub struct TuningResult {
    history: Vec<TrialResult>,
    best: TrialResult,
    suggestion: Option<(Vec<ParamValue>, f64)>,
    duration: Duration,
}

impl TuningResult {
    /// Every evaluated (configuration, epoch) result, in evaluation order.
    pub fn history(&self) -> &[TrialResult] {
        self.history.as_slice()
    }

    /// The best observed result.
    pub fn best(&self) -> &TrialResult {
        &self.best
    }

    /// The configuration of the best observed result.
    pub fn best_configuration(&self) -> &[ParamValue] {
        self.best.configuration.as_slice()
    }

    /// The model's suggestion for a full-fidelity configuration
    /// with its predicted metric, if a model was trained.
    pub fn suggestion(&self) -> Option<(&[ParamValue], f64)> {
        self.suggestion
            .as_ref()
            .map(|(config, metric)| (config.as_slice(), *metric))
    }

    /// Total duration of the run.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Whether lower or higher metrics are better.
/// Internally everything minimizes,
/// maximized metrics are negated at the evaluation boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Direction {
    Minimize,
    Maximize,
}

impl std::str::FromStr for Direction {
    type Err = failure::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" | "minimize" => Ok(Direction::Minimize),
            "max" | "maximize" => Ok(Direction::Maximize),
            _ => bail!("expected min/minimize or max/maximize, but got: {:?}", s),
        }
    }
}

/// Which suggestion strategy drives the tuning run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerKind {
    GpBandit,
    RandomSearch,
}

impl std::str::FromStr for OptimizerKind {
    type Err = failure::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gp-bandit" | "bandit" | "gp" => Ok(OptimizerKind::GpBandit),
            "random-search" | "random" => Ok(OptimizerKind::RandomSearch),
            _ => bail!(
                "expected gp-bandit/bandit/gp or random-search/random, but got: {:?}",
                s
            ),
        }
    }
}

/// Configuration for the tuner.
#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab")]
pub struct Tuner {
    /// Total training epoch budget across all configurations.
    /// Replayed results are free.
    #[structopt(long, default_value = "100")]
    pub max_total_epochs: usize,

    /// The maximum number of epochs any single configuration may train for.
    #[structopt(long, default_value = "27")]
    pub max_epochs: u32,

    /// By how many epochs a configuration advances per suggestion.
    #[structopt(long, default_value = "1")]
    pub fidelity_step: u32,

    /// How many candidate configurations are kept in play at once.
    #[structopt(long, default_value = "10")]
    pub pool_size: usize,

    /// How many configurations are evaluated for one fidelity step each
    /// before model-guided suggestions take over.
    #[structopt(long, default_value = "10")]
    pub initial_random: usize,

    /// Whether the metric is minimized or maximized (min/minimize, max/maximize).
    #[structopt(long, default_value = "minimize")]
    pub direction: Direction,

    /// The suggestion strategy (gp-bandit or random-search).
    #[structopt(long, default_value = "gp-bandit")]
    pub optimizer: OptimizerKind,

    /// How the metric should be transformed for the surrogate model
    /// (lin/linear or log/ln/logarithmic).
    #[structopt(long, default_value = "linear")]
    pub transform_metric: Projection,

    /// Standard deviation for incumbent mutations,
    /// as fraction of each hyperparameter's range.
    #[structopt(long, default_value = "0.1")]
    pub mutation_relscale: f64,
}

impl Default for Tuner {
    fn default() -> Self {
        Self {
            max_total_epochs: 100,
            max_epochs: 27,
            fidelity_step: 1,
            pool_size: 10,
            initial_random: 10,
            direction: Direction::Minimize,
            optimizer: OptimizerKind::GpBandit,
            transform_metric: Projection::Linear,
            mutation_relscale: 0.1,
        }
    }
}

pub struct TunerArgs<'life> {
    /// Controls what information is printed during tuning.
    /// Can e.g. be used to save evaluations in a CSV file.
    pub output: Output<'life>,

    /// Where trial checkpoints are stored.
    /// Defaults to a per-process directory under the system temp dir.
    pub checkpoint_root: Option<PathBuf>,

    pub time_source: Option<Box<TimeSource>>,
}

impl Default for TunerArgs<'_> {
    fn default() -> Self {
        Self {
            output: Output::new(),
            checkpoint_root: None,
            time_source: None,
        }
    }
}

impl Tuner {
    /// Run the tuning loop until the epoch budget is exhausted.
    pub fn run<'life, A>(
        self,
        objective: &'life dyn TrialObjective,
        space: ConfigSpace,
        rng: &'life mut RNG,
        args: TunerArgs<'life>,
    ) -> Result<TuningResult, failure::Error>
    where
        A: Scalar,
    {
        let TunerArgs {
            mut output,
            checkpoint_root,
            time_source,
        } = args;

        ensure!(
            !space.is_empty(),
            "the configuration space must contain at least one hyperparameter"
        );
        ensure!(self.max_epochs > 0, "max-epochs must be positive");
        ensure!(self.fidelity_step > 0, "fidelity-step must be positive");
        ensure!(
            self.fidelity_step <= self.max_epochs,
            "fidelity-step {} must not exceed max-epochs {}",
            self.fidelity_step,
            self.max_epochs,
        );
        ensure!(
            self.max_total_epochs >= self.max_epochs as usize,
            "epoch budget {} too small to train any configuration for {} epochs",
            self.max_total_epochs,
            self.max_epochs,
        );
        ensure!(
            self.max_total_epochs >= self.initial_random * self.fidelity_step as usize,
            "epoch budget {} too small for {} initial random evaluations of {} epochs each",
            self.max_total_epochs,
            self.initial_random,
            self.fidelity_step,
        );

        let time_source = time_source.unwrap_or_else(|| Box::new(Instant::now));

        let checkpoint_root = checkpoint_root.unwrap_or_else(|| {
            std::env::temp_dir().join(format!("hpo4dl-{}", std::process::id()))
        });

        let mut optimizer: Box<dyn FidelityOptimizer> = match self.optimizer {
            OptimizerKind::GpBandit => Box::new(
                GpBanditOptimizer::<A>::new(&space, self.max_epochs, self.fidelity_step)
                    .with_pool_size(self.pool_size)
                    .with_initial_random(self.initial_random)
                    .with_metric_projection(self.transform_metric)
                    .with_mutation_relscale(self.mutation_relscale),
            ),
            OptimizerKind::RandomSearch => Box::new(RandomSearchOptimizer::new(self.max_epochs)),
        };

        let mut manager = ConfigurationManager::new(space);
        let mut graybox = GrayboxWrapper::new(objective, checkpoint_root);

        let total_duration = time_source.as_ref()();
        let mut history: Vec<TrialResult> = Vec::new();

        let mut run_loop = || -> Result<(), failure::Error> {
            let mut budget = self.max_total_epochs;
            let mut stalled_rounds = 0;

            while budget > 0 {
                let timer = time_source.as_ref()();
                let suggestions = optimizer.suggest(&mut manager, rng)?;
                output.event_suggestions_completed(suggestions.as_slice(), timer.elapsed());

                let timer = time_source.as_ref()();
                let batch = graybox.evaluate_batch(&manager, suggestions.as_slice(), rng)?;
                output.event_evaluations_completed(batch.results.as_slice(), timer.elapsed());

                let oriented = match self.direction {
                    Direction::Minimize => batch.results.clone(),
                    Direction::Maximize => batch
                        .results
                        .iter()
                        .cloned()
                        .map(|mut result| {
                            result.metric = -result.metric;
                            result
                        })
                        .collect(),
                };
                optimizer.observe(oriented.as_slice(), &manager);
                history.extend(batch.results);

                budget = budget.saturating_sub(batch.fresh_rows);
                if batch.fresh_rows == 0 {
                    stalled_rounds += 1;
                    ensure!(
                        stalled_rounds < 100,
                        "the optimizer made no progress for {} rounds",
                        stalled_rounds,
                    );
                } else {
                    stalled_rounds = 0;
                }
            }
            Ok(())
        };

        // checkpoints must not leak, even when the run fails
        if let Err(err) = run_loop() {
            let _ = graybox.close();
            return Err(err);
        }

        let best = history
            .iter()
            .min_by_key(|result| {
                let metric = match self.direction {
                    Direction::Minimize => result.metric,
                    Direction::Maximize => -result.metric,
                };
                noisy_float::types::n64(metric)
            })
            .cloned()
            .expect("the budget admits at least one evaluation");

        let suggestion = optimizer
            .best_prediction(&manager)
            .map(|(config, metric)| match self.direction {
                Direction::Minimize => (config, metric),
                Direction::Maximize => (config, -metric),
            });

        output.event_tuning_completed(Some(&best));
        graybox.close()?;

        Ok(TuningResult {
            history,
            best,
            suggestion,
            duration: total_duration.elapsed(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_directions_and_optimizers() {
        assert_eq!("min".parse::<Direction>().unwrap(), Direction::Minimize);
        assert_eq!(
            "maximize".parse::<Direction>().unwrap(),
            Direction::Maximize
        );
        assert!("sideways".parse::<Direction>().is_err());

        assert_eq!(
            "gp-bandit".parse::<OptimizerKind>().unwrap(),
            OptimizerKind::GpBandit
        );
        assert_eq!(
            "random".parse::<OptimizerKind>().unwrap(),
            OptimizerKind::RandomSearch
        );
        assert!("hillclimb".parse::<OptimizerKind>().is_err());
    }

    #[test]
    fn rejects_empty_spaces_and_tiny_budgets() {
        let objective = crate::ObjectiveFromFn(|_: &[ParamValue], _| 0.0);
        let mut rng = RNG::new_with_seed(1);

        let empty = Tuner::default().run::<f64>(
            &objective,
            ConfigSpace::new(),
            &mut rng,
            TunerArgs::default(),
        );
        assert!(empty.is_err());

        let mut space = ConfigSpace::new();
        space.add_real("x", 0.0, 1.0);
        let tiny = Tuner {
            max_total_epochs: 5,
            max_epochs: 27,
            ..Tuner::default()
        }
        .run::<f64>(&objective, space.clone(), &mut rng, TunerArgs::default());
        assert!(tiny.is_err());

        // the budget must cover the initial random phase
        let short_of_initial = Tuner {
            max_total_epochs: 30,
            max_epochs: 5,
            initial_random: 50,
            ..Tuner::default()
        }
        .run::<f64>(&objective, space, &mut rng, TunerArgs::default());
        assert!(short_of_initial.is_err());
    }

    #[test]
    fn removes_checkpoints_when_an_objective_fails() {
        struct FailingObjective;

        impl TrialObjective for FailingObjective {
            fn run(
                &self,
                _config: &[ParamValue],
                _epoch: u32,
                _previous_epoch: u32,
                _checkpoint: &std::path::Path,
                _rng: &mut RNG,
            ) -> Result<Vec<crate::EpochMetric>, failure::Error> {
                bail!("training diverged")
            }
        }

        let mut space = ConfigSpace::new();
        space.add_real("x", 0.0, 1.0);
        let mut rng = RNG::new_with_seed(3);
        let checkpoint_root =
            std::env::temp_dir().join(format!("hpo4dl-test-cleanup-{}", std::process::id()));
        let mut args = TunerArgs::default();
        args.checkpoint_root = Some(checkpoint_root.clone());

        let result = Tuner::default().run::<f64>(&FailingObjective, space, &mut rng, args);
        assert!(result.is_err());
        assert!(!checkpoint_root.exists());
    }
}
