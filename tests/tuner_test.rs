#[macro_use]
extern crate ndarray;
extern crate assert_cmd;
extern crate failure;
extern crate hpo4dl;
extern crate itertools;
extern crate noisy_float;
extern crate serde_json;
extern crate tempfile;

use assert_cmd::prelude::*;
use hpo4dl::{ObjectiveFromFn, ParamValue, Tuner, TunerArgs, TuningResult};
use itertools::Itertools as _;
use ndarray::prelude::*;
use serde_json::json;
use std::process::Command;

/// A simulated training run:
/// the benchmark function value is the asymptote of the learning curve.
fn sphere_objective(config: &[ParamValue], epoch: u32) -> f64 {
    let xs = config.iter().map(|x| x.to_f64()).collect_vec();
    let asymptote: f64 = hpo4dl::benchfn::sphere(Array1::from(xs));
    hpo4dl::benchfn::learning_curve(asymptote, 1.0, 1.0, epoch)
}

#[test]
fn gp_bandit_sphere_d2_f64() {
    let result = run_tuner_test::<f64>(582_347, |space, tuner| {
        tuner.max_total_epochs = 150;
        tuner.max_epochs = 5;
        space.add_real("x1", -2.0, 3.0);
        space.add_real("x2", -3.0, 2.0);
    });

    assert_close_to_ideal_points(&result, &[array![0.0, 0.0]], 1.2);
}

#[test]
fn gp_bandit_sphere_d2_f32() {
    let result = run_tuner_test::<f32>(582_347, |space, tuner| {
        tuner.max_total_epochs = 150;
        tuner.max_epochs = 5;
        space.add_real("x1", -2.0, 3.0);
        space.add_real("x2", -3.0, 2.0);
    });

    assert_close_to_ideal_points(&result, &[array![0.0, 0.0]], 1.2);
}

#[test]
fn gp_bandit_sphere_d2_ints() {
    let result = run_tuner_test::<f64>(98_482, |space, tuner| {
        tuner.max_total_epochs = 120;
        tuner.max_epochs = 4;
        tuner.pool_size = 8;
        tuner.initial_random = 8;
        space.add_int("x1", -5, 5);
        space.add_int("x2", -3, 7);
    });

    assert_close_to_ideal_points(&result, &[array![0.0, 0.0]], 1.5);
}

#[test]
fn gp_bandit_spends_most_epochs_on_the_better_candidates() {
    let result = run_tuner_test::<f64>(17_407, |space, tuner| {
        tuner.max_total_epochs = 120;
        tuner.max_epochs = 10;
        space.add_real("x1", -2.0, 2.0);
        space.add_real("x2", -2.0, 2.0);
    });

    // per candidate, how far its training advanced
    let mut deepest_epochs = std::collections::HashMap::new();
    for trial in result.history() {
        let deepest = deepest_epochs.entry(trial.config_id).or_insert(0);
        *deepest = trial.epoch.max(*deepest);
    }

    let uneven = deepest_epochs.values().max() > deepest_epochs.values().min();
    assert!(
        uneven,
        "training depth should differ between candidates: {:?}",
        deepest_epochs,
    );
}

#[test]
fn random_search_exhausts_the_budget_with_full_trainings() {
    let objective = ObjectiveFromFn(sphere_objective);
    let mut rng = hpo4dl::RNG::new_with_seed(203_887);
    let mut space = hpo4dl::ConfigSpace::new();
    space.add_real("x1", -2.0, 2.0);

    let result = Tuner {
        max_total_epochs: 20,
        max_epochs: 5,
        optimizer: "random-search".parse().unwrap(),
        ..Tuner::default()
    }
    .run::<f64>(&objective, space, &mut rng, TunerArgs::default())
    .expect("tuning should proceed successfully");

    assert_eq!(result.history().len(), 20);
    let distinct_configs = result
        .history()
        .iter()
        .map(|trial| trial.config_id)
        .unique()
        .count();
    assert_eq!(distinct_configs, 4);
    assert_eq!(result.best().epoch, 5, "the last epoch is the best epoch");
}

#[test]
fn maximization_reports_the_largest_metric_as_best() {
    let objective = ObjectiveFromFn(|config: &[ParamValue], epoch| {
        10.0 - sphere_objective(config, epoch)
    });
    let mut rng = hpo4dl::RNG::new_with_seed(88_123);
    let mut space = hpo4dl::ConfigSpace::new();
    space.add_real("x1", -2.0, 2.0);

    let result = Tuner {
        max_total_epochs: 40,
        max_epochs: 4,
        direction: "maximize".parse().unwrap(),
        ..Tuner::default()
    }
    .run::<f64>(&objective, space, &mut rng, TunerArgs::default())
    .expect("tuning should proceed successfully");

    let largest = result
        .history()
        .iter()
        .map(|trial| noisy_float::types::n64(trial.metric))
        .max()
        .unwrap();
    assert_eq!(noisy_float::types::n64(result.best().metric), largest);

    if let Some((_, metric)) = result.suggestion() {
        assert!(
            metric > 5.0,
            "the suggestion must predict in natural orientation: {}",
            metric,
        );
    }
}

mod describe_checkpoint_protocol {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every epoch it is asked to train,
    /// so tests can verify that no epoch is ever trained twice.
    struct CountingObjective {
        trained_epochs: AtomicUsize,
        last_epoch: Mutex<HashMap<String, u32>>,
    }

    impl CountingObjective {
        fn new() -> Self {
            Self {
                trained_epochs: AtomicUsize::new(0),
                last_epoch: Mutex::new(HashMap::new()),
            }
        }
    }

    impl hpo4dl::TrialObjective for CountingObjective {
        fn run(
            &self,
            config: &[ParamValue],
            epoch: u32,
            previous_epoch: u32,
            checkpoint: &Path,
            _rng: &mut hpo4dl::RNG,
        ) -> Result<Vec<hpo4dl::EpochMetric>, failure::Error> {
            assert!(checkpoint.is_dir(), "checkpoint directory must exist");

            let key = config.iter().join("/");
            let mut last_epoch = self.last_epoch.lock().unwrap();
            let resumed_from = last_epoch.insert(key.clone(), epoch).unwrap_or(0);
            assert_eq!(
                resumed_from, previous_epoch,
                "training must resume exactly where it stopped ({})",
                key,
            );

            self.trained_epochs
                .fetch_add((epoch - previous_epoch) as usize, Ordering::SeqCst);

            Ok((previous_epoch + 1..=epoch)
                .map(|e| hpo4dl::EpochMetric::new(e, sphere_objective(config, e)))
                .collect())
        }
    }

    #[test]
    fn no_epoch_is_trained_twice() {
        let objective = CountingObjective::new();
        let mut rng = hpo4dl::RNG::new_with_seed(55_019);
        let mut space = hpo4dl::ConfigSpace::new();
        space.add_real("x1", -2.0, 2.0);

        let checkpoint_root = tempfile::tempdir().unwrap();
        let tuner = Tuner {
            max_total_epochs: 60,
            max_epochs: 6,
            pool_size: 5,
            initial_random: 5,
            ..Tuner::default()
        };
        let pool_size = tuner.pool_size;
        let args = TunerArgs {
            checkpoint_root: Some(checkpoint_root.path().to_owned()),
            ..TunerArgs::default()
        };

        let result = tuner
            .run::<f64>(&objective, space, &mut rng, args)
            .expect("tuning should proceed successfully");

        let trained = objective.trained_epochs.load(Ordering::SeqCst);
        assert!(
            trained >= 60 && trained <= 60 + pool_size,
            "the budget controls trained epochs, got {}",
            trained,
        );
        assert_eq!(result.history().len(), trained);
    }
}

#[test]
fn sphere_d2_integration() {
    run_integration_test(&[array![0.0, 0.0]], 1.5, |command| {
        command
            .arg("--quiet")
            .arg("run")
            .arg("--seed=2956349")
            .arg("--max-total-epochs=80")
            .arg("--max-epochs=5")
            .arg("--param=x1 real -2 2")
            .arg("--param=x2 real -2 2")
            .arg("function")
            .arg("sphere");
    });
}

#[test]
fn function_command_prints_epoch_metrics() {
    let output = Command::cargo_bin("hpo4dl")
        .unwrap()
        .arg("function")
        .arg("--epoch=3")
        .arg("sphere")
        .arg("1.0")
        .arg("2.0")
        .output()
        .expect("test command failed to execute");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let items = stdout.split_whitespace().collect_vec();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], "3");
    let metric: f64 = items[1].parse().unwrap();
    // sphere(1, 2) = 5, plus the remaining learning curve gap at epoch 3
    assert!((metric - 5.5).abs() < 1e-6, "got metric {}", metric);
}

fn run_tuner_test<A>(
    rng_seed: usize,
    setup: impl Fn(&mut hpo4dl::ConfigSpace, &mut Tuner),
) -> TuningResult
where
    A: hpo4dl::Scalar,
{
    let objective = ObjectiveFromFn(sphere_objective);
    let mut rng = hpo4dl::RNG::new_with_seed(rng_seed);

    let mut tuner = Tuner::default();
    let mut space = hpo4dl::ConfigSpace::new();
    setup(&mut space, &mut tuner);

    tuner
        .run::<A>(&objective, space, &mut rng, TunerArgs::default())
        .expect("tuning should proceed successfully")
}

fn assert_close_to_ideal_points(
    result: &TuningResult,
    ideal: &[Array1<f64>],
    max_distance: f64,
) {
    let guess: Array1<f64> = result
        .best_configuration()
        .iter()
        .map(|x| x.to_f64())
        .collect();
    let distance = distance_to_ideal_points(&guess, ideal);

    assert!(
        distance < max_distance,
        "optimal configuration was not found\n\
         |     distance: {distance}\n\
         | ideal points: {ideal}\n\
         |        guess: {guess}\n\
         |         best: {best:?}",
        distance = distance,
        ideal = ideal.iter().format(", "),
        guess = guess,
        best = result.best(),
    );
}

fn run_integration_test<Setup>(ideal: &[Array1<f64>], max_distance: f64, setup: Setup)
where
    Setup: Fn(&mut Command) -> (),
{
    let mut command = Command::cargo_bin("hpo4dl").unwrap();
    setup(&mut command);
    let output = command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit())
        .output()
        .expect("test command failed to execute");

    assert!(
        output.status.success(),
        "test command must execute successfully but status was {}",
        output.status
    );

    let stdout = String::from_utf8(output.stdout).expect("test command output must be UTF-8");
    static RESULT_MARKER: &str = "tuning result: ";
    let result_location = stdout
        .find(RESULT_MARKER)
        .expect("output must contain result marker");
    let result_json = &stdout[result_location + RESULT_MARKER.len()..];
    let result: serde_json::Value =
        serde_json::from_str(result_json).expect("tuning result must be JSON");

    let location: &[_] = result["best"]["location"]
        .as_array()
        .expect("best location must be array");
    let distance = distance_to_ideal_points(
        &location
            .iter()
            .map(|x| x["value"].as_f64().expect("value must be a number"))
            .collect_vec()
            .into(),
        ideal,
    );

    if distance > max_distance {
        let mut data = result.clone();
        data["distance"] = json!(distance);
        data["max distance"] = json!(max_distance);
        data["ideal points"] = json!(ideal.iter().map(|x| x.to_vec()).collect_vec());
        panic!("optimal configuration was not found {:#}", data);
    }
}

fn distance_to_ideal_points(actual: &Array1<f64>, ideal_points: &[Array1<f64>]) -> f64 {
    ideal_points
        .iter()
        .map(|ideal| (ideal - actual).mapv(|x| x.powi(2)).sum().sqrt())
        .map(noisy_float::types::n64)
        .min()
        .expect("there should be a minimal distance")
        .into()
}
