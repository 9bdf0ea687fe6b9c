use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::config_manager::{ConfigId, ConfigurationManager};
use crate::core::optimizer::Suggestion;
use crate::core::space::ParamValue;
use crate::core::trial::{EpochMetric, TrialResult};
use crate::RNG;

/// An objective that trains a configuration up to a requested epoch,
/// resuming from a checkpoint of a previous (lower-epoch) evaluation.
///
/// The returned metrics must cover the epochs after `previous_epoch`
/// up to and including `epoch`, in increasing epoch order.
/// Reporting intermediate epochs is encouraged since each one
/// becomes an extra observation for the surrogate model.
pub trait TrialObjective: Sync {
    fn run(
        &self,
        config: &[ParamValue],
        epoch: u32,
        previous_epoch: u32,
        checkpoint: &Path,
        rng: &mut RNG,
    ) -> Result<Vec<EpochMetric>, failure::Error>;
}

/// Adapter for plain functions of (configuration, epoch)
/// that have no checkpoint state of their own.
pub struct ObjectiveFromFn<F>(pub F)
where
    F: Fn(&[ParamValue], u32) -> f64 + Sync;

impl<F> TrialObjective for ObjectiveFromFn<F>
where
    F: Fn(&[ParamValue], u32) -> f64 + Sync,
{
    fn run(
        &self,
        config: &[ParamValue],
        epoch: u32,
        previous_epoch: u32,
        _checkpoint: &Path,
        _rng: &mut RNG,
    ) -> Result<Vec<EpochMetric>, failure::Error> {
        Ok((previous_epoch + 1..=epoch)
            .map(|e| EpochMetric::new(e, (self.0)(config, e)))
            .collect())
    }
}

/// The results of one round of evaluations.
/// Only fresh rows count against the tuning budget,
/// replayed rows were already paid for.
pub struct EvaluatedBatch {
    pub results: Vec<TrialResult>,
    pub fresh_rows: usize,
}

/// Runs the objective for suggested (configuration, epoch) pairs.
///
/// Keeps track of the highest epoch each configuration has reached
/// so that evaluations resume from the right checkpoint,
/// and replays stored results when a suggestion asks for an epoch
/// that was already evaluated.
pub struct GrayboxWrapper<'a> {
    objective: &'a dyn TrialObjective,
    checkpoint_root: PathBuf,
    previous_epochs: HashMap<ConfigId, u32>,
    evaluated: HashMap<ConfigId, Vec<TrialResult>>,
}

impl<'a> GrayboxWrapper<'a> {
    pub fn new(objective: &'a dyn TrialObjective, checkpoint_root: PathBuf) -> Self {
        GrayboxWrapper {
            objective,
            checkpoint_root,
            previous_epochs: HashMap::new(),
            evaluated: HashMap::new(),
        }
    }

    /// The highest epoch this configuration has been evaluated at, 0 if never.
    pub fn previous_epoch(&self, id: ConfigId) -> u32 {
        self.previous_epochs.get(&id).cloned().unwrap_or(0)
    }

    fn checkpoint_path(&self, id: ConfigId) -> PathBuf {
        self.checkpoint_root.join(format!("trial_{}", id))
    }

    /// Evaluate a batch of suggestions, distinct configurations in parallel.
    pub fn evaluate_batch(
        &mut self,
        manager: &ConfigurationManager,
        suggestions: &[Suggestion],
        rng: &mut RNG,
    ) -> Result<EvaluatedBatch, failure::Error> {
        let mut results = Vec::new();
        let mut fresh = Vec::new();
        for &Suggestion { config_id, epoch } in suggestions {
            let previous = self.previous_epoch(config_id);
            if epoch <= previous {
                results.push(self.replay(config_id, epoch)?);
            } else {
                ensure!(
                    fresh.iter().all(|&(id, _, _)| id != config_id),
                    "a batch must not evaluate configuration {} twice",
                    config_id,
                );
                fresh.push((config_id, epoch, previous));
            }
        }

        let items = fresh
            .into_iter()
            .map(|(id, epoch, previous)| {
                let checkpoint = self.checkpoint_path(id);
                std::fs::create_dir_all(&checkpoint)?;
                Ok((id, epoch, previous, checkpoint, rng.fork_random_state()))
            })
            .collect::<Result<Vec<_>, failure::Error>>()?;

        let objective = self.objective;
        let fresh_results = items
            .into_par_iter()
            .map(
                |(id, epoch, previous, checkpoint, mut rng)| -> Result<Vec<TrialResult>, failure::Error> {
                    let config = manager.get(id);
                    let started = Instant::now();
                    let metrics =
                        objective.run(config, epoch, previous, checkpoint.as_path(), &mut rng)?;
                    let elapsed = started.elapsed().as_secs_f64();
                    verify_reported_epochs(id, epoch, previous, &metrics)?;
                    let cost = elapsed / metrics.len() as f64;
                    Ok(metrics
                        .into_iter()
                        .map(|EpochMetric { epoch, metric }| TrialResult {
                            config_id: id,
                            epoch,
                            metric,
                            cost,
                            configuration: config.to_vec(),
                        })
                        .collect())
                },
            )
            .collect::<Result<Vec<_>, _>>()?;

        let mut fresh_rows = 0;
        for rows in fresh_results {
            let id = rows[0].config_id;
            let epoch = rows.last().map(|r| r.epoch).unwrap_or(0);
            self.previous_epochs.insert(id, epoch);
            self.evaluated.entry(id).or_default().extend(rows.iter().cloned());
            fresh_rows += rows.len();
            results.extend(rows);
        }

        Ok(EvaluatedBatch {
            results,
            fresh_rows,
        })
    }

    fn replay(&self, id: ConfigId, epoch: u32) -> Result<TrialResult, failure::Error> {
        self.evaluated
            .get(&id)
            .and_then(|rows| rows.iter().find(|r| r.epoch == epoch))
            .cloned()
            .ok_or_else(|| {
                format_err!(
                    "configuration {} reached epoch {} but no result for epoch {} was stored",
                    id,
                    self.previous_epoch(id),
                    epoch,
                )
            })
    }

    /// Remove all trial checkpoints.
    pub fn close(&mut self) -> Result<(), failure::Error> {
        match std::fs::remove_dir_all(&self.checkpoint_root) {
            Ok(()) => Ok(()),
            Err(ref err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn verify_reported_epochs(
    id: ConfigId,
    epoch: u32,
    previous: u32,
    metrics: &[EpochMetric],
) -> Result<(), failure::Error> {
    ensure!(
        !metrics.is_empty(),
        "objective reported no metrics for configuration {}",
        id,
    );
    for window in metrics.windows(2) {
        ensure!(
            window[0].epoch < window[1].epoch,
            "objective must report epochs in increasing order for configuration {}",
            id,
        );
    }
    ensure!(
        metrics[0].epoch > previous,
        "objective reported epoch {} but configuration {} already reached epoch {}",
        metrics[0].epoch,
        id,
        previous,
    );
    let last = metrics.last().unwrap().epoch;
    ensure!(
        last == epoch,
        "objective reported up to epoch {} but epoch {} was requested for configuration {}",
        last,
        epoch,
        id,
    );
    Ok(())
}
