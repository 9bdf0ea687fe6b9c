use failure::ResultExt as _;
use hpo4dl::{ConfigSpace, EpochMetric, ParamValue, TrialObjective, RNG};
use itertools::Itertools as _;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};

/// Runs an external program as the training objective.
///
/// The command template can substitute hyperparameter values by name,
/// plus `{epoch}`, `{prev_epoch}`, `{checkpoint}`, and `{SEED}`.
/// The program must print one `<epoch> <metric>` line
/// for each epoch after `{prev_epoch}` up to `{epoch}`,
/// and may use the checkpoint directory to resume training.
pub struct RunCommandAsObjective {
    cli_template: Vec<String>,
    space: ConfigSpace,
}

impl RunCommandAsObjective {
    pub fn new(cli_template: Vec<String>, space: ConfigSpace) -> Self {
        Self {
            cli_template,
            space,
        }
    }
}

impl TrialObjective for RunCommandAsObjective {
    fn run(
        &self,
        config: &[ParamValue],
        epoch: u32,
        previous_epoch: u32,
        checkpoint: &Path,
        rng: &mut RNG,
    ) -> Result<Vec<EpochMetric>, failure::Error> {
        let seed = rng.uniform(0..=u32::max_value());

        let mut args = collect_config_as_hash(&self.space, config);
        args.insert("epoch".to_owned(), epoch.to_string());
        args.insert("prev_epoch".to_owned(), previous_epoch.to_string());
        args.insert("checkpoint".to_owned(), checkpoint.display().to_string());
        args.insert("SEED".to_owned(), seed.to_string());

        let cmd_args = apply_template(&self.cli_template, &args)
            .with_context(|err| format!("while filling in command placeholders: {}", err))?;
        let mut cmd_args = cmd_args.iter().map(AsRef::<OsStr>::as_ref);

        let output = Command::new(
            cmd_args
                .next()
                .ok_or_else(|| format_err!("objective command needs a command name"))?,
        )
        .args(cmd_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .with_context(|err| format!("objective command failed to execute: {}", err))?;

        ensure!(
            output.status.success(),
            "objective command failed with status: {}",
            output.status
        );

        let output = String::from_utf8(output.stdout)
            .map_err(|_| format_err!("objective command output must be UTF-8"))?;

        Ok(parse_command_output(&output)
            .with_context(|err| format!("while parsing command output: {}", err))?)
    }
}

fn collect_config_as_hash(space: &ConfigSpace, config: &[ParamValue]) -> HashMap<String, String> {
    space
        .params()
        .iter()
        .zip_eq(config)
        .map(|(param, &value)| (param.name().to_owned(), param.format_value(value)))
        .collect()
}

fn apply_template(
    template: &[String],
    args: &HashMap<String, String>,
) -> Result<Vec<String>, strfmt::FmtError> {
    template
        .iter()
        .map(|template| strfmt::strfmt(template, args))
        .collect()
}

fn parse_command_output(output: &str) -> Result<Vec<EpochMetric>, failure::Error> {
    let metrics = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_metric_line)
        .collect::<Result<Vec<_>, _>>()?;

    ensure!(
        !metrics.is_empty(),
        "at least one `<epoch> <metric>` line is required"
    );

    Ok(metrics)
}

fn parse_metric_line(line: &str) -> Result<EpochMetric, failure::Error> {
    let mut items = line.split_whitespace();

    let raw_epoch = items
        .next()
        .ok_or_else(|| format_err!("must contain epoch: {:?}", line))?;
    let epoch = raw_epoch
        .parse::<u32>()
        .map_err(|_| format_err!("epoch `{}` must parse as an integer", raw_epoch))?;

    let raw_metric = items
        .next()
        .ok_or_else(|| format_err!("must contain metric: {:?}", line))?;
    let metric = raw_metric
        .parse::<f64>()
        .map_err(|_| format_err!("metric `{}` must parse as a number", raw_metric))?;

    ensure!(
        items.next().is_none(),
        "output lines can only contain two items `<epoch> <metric>`: {}",
        line
    );

    Ok(EpochMetric::new(epoch, metric))
}

#[cfg(test)]
macro_rules! assert_err {
    ($expr:expr, $msg:expr $(, $($other:tt)* )?) => {
        assert_eq!(
            $expr.map_err(|err| err.to_string()),
            Err($msg.to_string()),
            $($($other)*)?
        )
    }
}

#[cfg(test)]
macro_rules! assert_ok {
    ($expr:expr, $value:expr $(, $($other:tt)*)?) => {
        assert_eq!(
            $expr.map_err(|err| err.to_string()),
            Ok($value),
            $($($other)*)?
        )
    }
}

#[test]
fn test_parse_command_output() {
    assert_err!(
        parse_command_output(""),
        "at least one `<epoch> <metric>` line is required",
    );

    assert_err!(
        parse_command_output("garbage\n"),
        "metric `garbage` must parse as a number",
    );

    assert_err!(
        parse_command_output("1.5 0.25"),
        "epoch `1.5` must parse as an integer",
    );

    assert_err!(
        parse_command_output("3"),
        r#"must contain metric: "3""#,
    );

    assert_err!(
        parse_command_output("3 0.25 extra"),
        "output lines can only contain two items `<epoch> <metric>`: 3 0.25 extra",
    );

    // success case: empty lines are ignored
    assert_ok!(
        parse_command_output("1 0.9\n\n 2 0.5 \n"),
        vec![EpochMetric::new(1, 0.9), EpochMetric::new(2, 0.5)],
    );
}

#[test]
fn test_apply_template() {
    let mut args = HashMap::new();
    args.insert("lr".to_owned(), "0.01".to_owned());
    args.insert("epoch".to_owned(), "3".to_owned());
    let template = vec!["train.sh".to_owned(), "--lr={lr}".to_owned(), "{epoch}".to_owned()];
    assert_eq!(
        apply_template(&template, &args).unwrap(),
        vec!["train.sh", "--lr=0.01", "3"],
    );
}
