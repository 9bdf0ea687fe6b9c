extern crate hpo4dl;
extern crate strfmt;
#[macro_use]
extern crate structopt;
extern crate itertools;
extern crate ndarray;
#[macro_use]
extern crate failure;
extern crate serde_json;

use itertools::Itertools as _;
use serde_json::json;
use structopt::StructOpt as _;

mod objective_shell;

#[derive(Debug, StructOpt)]
struct CliApp {
    /// enable verbose output
    #[structopt(long)]
    verbose: bool,

    /// Output less information
    #[structopt(long)]
    quiet: bool,

    #[structopt(subcommand)]
    command: CliCommand,
}

#[derive(Debug, StructOpt)]
enum CliCommand {
    /// Run the hpo4dl tuner.
    #[structopt(name = "run")]
    Run(CliCommandRun),

    /// Evaluate a benchmark objective at a single epoch.
    ///
    /// This is intended for integration with external tools.
    #[structopt(name = "function")]
    Function(CliCommandFunction),
}

#[derive(Debug, StructOpt)]
struct CliCommandRun {
    /// Hyperparameters of the search space.
    /// Should have form '<name> real <lo> <hi>', '<name> logreal <lo> <hi>',
    /// '<name> int <lo> <hi>', '<name> logint <lo> <hi>',
    /// or '<name> cat <choice>,<choice>,...'.
    #[structopt(long, min_values = 1, number_of_values = 1)]
    param: Vec<hpo4dl::Hyperparameter>,

    /// Random number generator seed for reproducible runs.
    #[structopt(long, default_value = "7861")]
    seed: usize,

    #[structopt(flatten)]
    tuner: hpo4dl::Tuner,

    /// Where trial checkpoints are stored.
    /// Defaults to a fresh directory under the system temp dir.
    #[structopt(long)]
    checkpoint_dir: Option<std::path::PathBuf>,

    /// Whether 32-bit numbers should be used for the surrogate model.
    /// Faster, but has numeric stability problems.
    #[structopt(long)]
    use_32: bool,

    /// A CSV into which evaluation results are written.
    /// Overwrites the file contents!
    #[structopt(long)]
    write_csv: Option<std::path::PathBuf>,

    #[structopt(subcommand)]
    objective: CliObjective,
}

#[derive(Debug, StructOpt)]
struct CliCommandFunction {
    /// Random number generator seed for reproducible runs.
    #[structopt(long, default_value = "7861")]
    seed: usize,

    /// Epoch at which the learning curve shall be evaluated.
    #[structopt(long, default_value = "1")]
    epoch: u32,

    #[structopt(flatten)]
    function: CliBenchFunction,

    /// Sample at which the function shall be evaluated.
    args: Vec<f64>,
}

#[derive(Debug, StructOpt)]
enum CliObjective {
    /// As the training objective, execute an external program.
    #[structopt(name = "command")]
    Command {
        /// The shell command to invoke for each trial.
        /// Can substitute hyperparameter values by name,
        /// plus {epoch}, {prev_epoch}, {checkpoint}, and {SEED}.
        /// E.g. `./train "{lr}" --epochs={epoch} --resume={checkpoint}`
        #[structopt(name = "objective-command", min_values = 1)]
        objective_command: Vec<String>,
    },

    /// As the training objective, use a built-in benchmark function
    /// wrapped in a simulated learning curve.
    #[structopt(name = "function")]
    Function(CliBenchFunction),
}

#[derive(Debug, StructOpt)]
struct CliBenchFunction {
    /// Standard deviation of test function noise.
    #[structopt(long, default_value = "0.0")]
    noise: f64,

    /// Gap between the epoch-0 metric and the converged metric.
    #[structopt(long, default_value = "1.0")]
    gap: f64,

    /// Convergence rate of the simulated learning curve.
    #[structopt(long, default_value = "0.5")]
    rate: f64,

    /// Name of the function.
    /// (sphere, rastrigin, rosenbrock)
    function: BenchFn,
}

impl CliObjective {
    fn into_objective(self, space: &hpo4dl::ConfigSpace) -> Box<dyn hpo4dl::TrialObjective> {
        match self {
            CliObjective::Command { objective_command } => Box::new(
                objective_shell::RunCommandAsObjective::new(objective_command, space.clone()),
            ),
            CliObjective::Function(f) => Box::new(f),
        }
    }
}

#[derive(Debug)]
enum BenchFn {
    Sphere,
    Rastrigin { amplitude: f64 },
    Rosenbrock,
}

impl std::str::FromStr for BenchFn {
    type Err = failure::Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(match name.to_ascii_lowercase().as_ref() {
            "sphere" => BenchFn::Sphere,
            "rastrigin" => BenchFn::Rastrigin { amplitude: 10.0 },
            "rosenbrock" => BenchFn::Rosenbrock,
            _ => bail!("expected a benchmark function name, got: {:?}", name),
        })
    }
}

impl hpo4dl::TrialObjective for CliBenchFunction {
    fn run(
        &self,
        config: &[hpo4dl::ParamValue],
        epoch: u32,
        previous_epoch: u32,
        _checkpoint: &std::path::Path,
        rng: &mut hpo4dl::RNG,
    ) -> Result<Vec<hpo4dl::EpochMetric>, failure::Error> {
        use hpo4dl::benchfn;
        use ndarray::Array;

        let xs = config.iter().map(|x| x.to_f64()).collect_vec();
        if let BenchFn::Rosenbrock = self.function {
            ensure!(
                xs.len() >= 2,
                "objective function requires at least two dimensions"
            );
        }
        let asymptote: f64 = match self.function {
            BenchFn::Sphere => benchfn::sphere(Array::from(xs)),
            BenchFn::Rastrigin { amplitude } => benchfn::rastrigin(Array::from(xs), amplitude),
            BenchFn::Rosenbrock => benchfn::rosenbrock(Array::from(xs)),
        };

        Ok((previous_epoch + 1..=epoch)
            .map(|e| {
                let value = benchfn::learning_curve(asymptote, self.gap, self.rate, e);
                hpo4dl::EpochMetric::new(e, rng.normal(value, self.noise))
            })
            .collect())
    }
}

fn main() {
    let args = CliApp::from_args();
    if args.verbose {
        println!("args: {:#?}", args);
    }
    let result: Result<(), _> = match args.command {
        CliCommand::Run(run) => {
            if run.use_32 {
                command_run::<f32>(run, args.quiet)
            } else {
                command_run::<f64>(run, args.quiet)
            }
        }
        CliCommand::Function(function) => command_function(function),
    };

    if let Err(err) = result {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}

fn value_as_json(param: &hpo4dl::Hyperparameter, value: hpo4dl::ParamValue) -> serde_json::Value {
    match value {
        hpo4dl::ParamValue::Real(x) => json!(x),
        hpo4dl::ParamValue::Int(x) => json!(x),
        hpo4dl::ParamValue::Cat(_) => json!(param.format_value(value)),
    }
}

fn location_as_json(
    space: &hpo4dl::ConfigSpace,
    config: &[hpo4dl::ParamValue],
) -> Vec<serde_json::Value> {
    space
        .params()
        .iter()
        .zip_eq(config)
        .map(|(param, &value)| {
            json!({
                "name": param.name(),
                "type": match value {
                    hpo4dl::ParamValue::Real(_) => "real",
                    hpo4dl::ParamValue::Int(_) => "int",
                    hpo4dl::ParamValue::Cat(_) => "cat",
                },
                "value": value_as_json(param, value),
            })
        })
        .collect_vec()
}

fn command_run<A>(cfg: CliCommandRun, quiet: bool) -> Result<(), failure::Error>
where
    A: hpo4dl::Scalar,
{
    let CliCommandRun {
        param: params,
        seed,
        tuner,
        checkpoint_dir,
        use_32: _use_32,
        write_csv,
        objective,
    } = cfg;

    ensure!(
        !params.is_empty(),
        "Option --param must be provided at least once"
    );

    let mut space = hpo4dl::ConfigSpace::new();
    for param in params {
        space.add_parameter(param.clone());
    }

    let mut rng = hpo4dl::RNG::new_with_seed(seed);

    let objective: Box<dyn hpo4dl::TrialObjective> = objective.into_objective(&space);

    let mut opened_csv_file = None;
    let mut args = hpo4dl::TunerArgs::default();
    args.checkpoint_root = checkpoint_dir;

    if !quiet {
        args.output.add_human_readable(std::io::stdout(), &space);
    }

    if let Some(file) = write_csv {
        opened_csv_file.replace(
            std::fs::File::create(file)
                .map_err(|err| format_err!("cannot open CSV file: {}", err))?,
        );
        args.output
            .add_csv_writer(opened_csv_file.as_mut().unwrap(), &space)?;
    }

    let result = tuner
        .run::<A>(objective.as_ref(), space.clone(), &mut rng, args)
        .map_err(|err| format_err!("error during tuning: {}", err))?;

    let best = result.best();
    println!(
        "tuning result: {:#}",
        json!({
            "best": {
                "location": location_as_json(&space, result.best_configuration()),
                "metric": best.metric,
                "epoch": best.epoch,
                "trial_id": best.config_id,
            },
            "suggestion": result.suggestion().map(|(config, metric)| json!({
                "location": location_as_json(&space, config),
                "metric": metric,
            })),
            "total_epochs": result.history().len(),
        })
    );

    Ok(())
}

fn command_function(function: CliCommandFunction) -> Result<(), failure::Error> {
    let CliCommandFunction {
        seed,
        epoch,
        function,
        args,
    } = function;

    ensure!(epoch > 0, "epoch must be positive");

    let sample = args
        .into_iter()
        .map(hpo4dl::ParamValue::Real)
        .collect_vec();
    let mut rng = hpo4dl::RNG::new_with_seed(seed);

    let metrics = hpo4dl::TrialObjective::run(
        &function,
        sample.as_slice(),
        epoch,
        epoch - 1,
        &std::env::temp_dir(),
        &mut rng,
    )?;

    for metric in metrics {
        println!("{} {}", metric.epoch, metric.metric);
    }

    Ok(())
}
