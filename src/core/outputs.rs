use prettytable::{Cell, Row, Table};
use std::time::Duration;

use crate::core::optimizer::Suggestion;
use crate::core::space::{ConfigSpace, Hyperparameter};
use crate::core::trial::TrialResult;

/// Report progress and save results during a tuning run.
pub trait OutputEventHandler {
    /// Called when the optimizer has proposed the next evaluations.
    fn event_suggestions_completed(&mut self, _suggestions: &[Suggestion], _duration: Duration) {}

    /// Called when a batch of evaluations has completed.
    fn event_evaluations_completed(&mut self, _results: &[TrialResult], _duration: Duration) {}

    /// Called once at the end of the run.
    fn event_tuning_completed(&mut self, _best: Option<&TrialResult>) {}
}

pub struct CompositeOutputEventHandler<'life> {
    subloggers: Vec<Box<dyn OutputEventHandler + 'life>>,
}

impl<'life> CompositeOutputEventHandler<'life> {
    pub fn new() -> Self {
        let subloggers = Vec::new();
        Self { subloggers }
    }

    pub fn add(&mut self, logger: impl OutputEventHandler + 'life) {
        self.subloggers.push(Box::new(logger));
    }
}

impl<'life> Default for CompositeOutputEventHandler<'life> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'life> OutputEventHandler for CompositeOutputEventHandler<'life> {
    fn event_suggestions_completed(&mut self, suggestions: &[Suggestion], duration: Duration) {
        for logger in &mut self.subloggers {
            logger.event_suggestions_completed(suggestions, duration);
        }
    }

    fn event_evaluations_completed(&mut self, results: &[TrialResult], duration: Duration) {
        for logger in &mut self.subloggers {
            logger.event_evaluations_completed(results, duration);
        }
    }

    fn event_tuning_completed(&mut self, best: Option<&TrialResult>) {
        for logger in &mut self.subloggers {
            logger.event_tuning_completed(best);
        }
    }
}

/// The output configuration of a tuning run.
/// Collects timing information and fans events out to registered handlers.
pub struct Output<'life> {
    base: CompositeOutputEventHandler<'life>,
    suggestion_durations: Vec<Duration>,
    evaluation_durations: Vec<Duration>,
}

impl<'life> Output<'life> {
    pub fn new() -> Self {
        Output {
            base: CompositeOutputEventHandler::new(),
            suggestion_durations: Vec::new(),
            evaluation_durations: Vec::new(),
        }
    }

    pub fn add(&mut self, logger: impl OutputEventHandler + 'life) {
        self.base.add(logger);
    }

    /// Print each batch of results as a table, e.g. to stdout.
    pub fn add_human_readable(&mut self, writer: impl std::io::Write + 'life, space: &ConfigSpace) {
        self.add(HumanReadableHandler {
            writer,
            params: space.params().to_vec(),
        });
    }

    /// Write one CSV row per evaluation result. Writes the header immediately.
    pub fn add_csv_writer(
        &mut self,
        writer: impl std::io::Write + 'life,
        space: &ConfigSpace,
    ) -> Result<(), failure::Error> {
        let mut writer = csv::Writer::from_writer(writer);
        let header = ["trial_id", "epoch", "metric", "cost"]
            .iter()
            .map(|&s| s.to_owned())
            .chain(space.params().iter().map(|p| p.name().to_owned()))
            .collect::<Vec<_>>();
        writer.write_record(&header)?;
        writer.flush()?;
        self.add(CsvHandler {
            writer,
            params: space.params().to_vec(),
        });
        Ok(())
    }

    pub fn suggestion_durations(&self) -> &[Duration] {
        &self.suggestion_durations
    }

    pub fn evaluation_durations(&self) -> &[Duration] {
        &self.evaluation_durations
    }
}

impl<'life> Default for Output<'life> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'life> OutputEventHandler for Output<'life> {
    fn event_suggestions_completed(&mut self, suggestions: &[Suggestion], duration: Duration) {
        self.suggestion_durations.push(duration);
        self.base.event_suggestions_completed(suggestions, duration);
    }

    fn event_evaluations_completed(&mut self, results: &[TrialResult], duration: Duration) {
        self.evaluation_durations.push(duration);
        self.base.event_evaluations_completed(results, duration);
    }

    fn event_tuning_completed(&mut self, best: Option<&TrialResult>) {
        self.base.event_tuning_completed(best);
    }
}

struct HumanReadableHandler<W: std::io::Write> {
    writer: W,
    params: Vec<Hyperparameter>,
}

impl<W: std::io::Write> OutputEventHandler for HumanReadableHandler<W> {
    fn event_evaluations_completed(&mut self, results: &[TrialResult], duration: Duration) {
        let mut table = Table::new();
        let mut header = vec![
            Cell::new("trial"),
            Cell::new("epoch"),
            Cell::new("metric"),
            Cell::new("cost"),
        ];
        header.extend(self.params.iter().map(|p| Cell::new(p.name())));
        table.add_row(Row::new(header));

        for result in results {
            let mut row = vec![
                Cell::new(&result.config_id.to_string()),
                Cell::new(&result.epoch.to_string()),
                Cell::new(&format!("{:.5}", result.metric)),
                Cell::new(&format!("{:.3}", result.cost)),
            ];
            row.extend(
                self.params
                    .iter()
                    .zip(&result.configuration)
                    .map(|(param, &value)| Cell::new(&param.format_value(value))),
            );
            table.add_row(Row::new(row));
        }

        let _ = writeln!(self.writer, "evaluations ({:.1?}):", duration);
        let _ = table.print(&mut self.writer);
    }

    fn event_tuning_completed(&mut self, best: Option<&TrialResult>) {
        match best {
            Some(best) => {
                let _ = writeln!(self.writer, "tuning completed, best: {:?}", best);
            }
            None => {
                let _ = writeln!(self.writer, "tuning completed without any results");
            }
        }
    }
}

struct CsvHandler<W: std::io::Write> {
    writer: csv::Writer<W>,
    params: Vec<Hyperparameter>,
}

impl<W: std::io::Write> OutputEventHandler for CsvHandler<W> {
    fn event_evaluations_completed(&mut self, results: &[TrialResult], _duration: Duration) {
        for result in results {
            let record = vec![
                result.config_id.to_string(),
                result.epoch.to_string(),
                result.metric.to_string(),
                result.cost.to_string(),
            ]
            .into_iter()
            .chain(
                self.params
                    .iter()
                    .zip(&result.configuration)
                    .map(|(param, &value)| param.format_value(value)),
            )
            .collect::<Vec<_>>();
            if let Err(err) = self.writer.write_record(&record) {
                eprintln!("could not write CSV record: {}", err);
            }
        }
        if let Err(err) = self.writer.flush() {
            eprintln!("could not flush CSV output: {}", err);
        }
    }
}
