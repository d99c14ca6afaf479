use std::{fs, path::PathBuf};

use candle_core::{Device, Tensor};
use clap::Parser;
use evaluation::{
    run_evaluation, BatchOutputs, EvaluationConfig, EvaluationError, LanguageModelEvaluation,
};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

fn main() {
    // `log` records from the library are bridged into the subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("eval-report failed: {}", err);
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay recorded evaluation losses and report dev metrics", long_about = None)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "JSON array of batches, each mapping tensor names to per-replica values"
    )]
    input: PathBuf,

    #[arg(short, long, value_name = "PATH", help = "Path to evaluation config file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Write dev scalars to a TensorBoard event file")]
    tensorboard_dir: Option<PathBuf>,
}

fn run() -> Result<(), EvaluationError> {
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => EvaluationConfig::from_path(path)?,
        None => EvaluationConfig::default(),
    };
    if let Some(dir) = args.tensorboard_dir {
        config.logging.tensorboard_dir = Some(dir);
    }

    let batches = parse_batches(&fs::read_to_string(&args.input)?)?;
    log::debug!("loaded {} evaluation batches from {}", batches.len(), args.input.display());

    let mut evaluation = LanguageModelEvaluation::new(&config)?;
    let results = run_evaluation(&mut evaluation, batches)?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

/// Tensor names keep the order they appear in within each batch object.
fn parse_batches(contents: &str) -> Result<Vec<BatchOutputs>, EvaluationError> {
    let raw: Vec<Map<String, Value>> = serde_json::from_str(contents)?;

    raw.into_iter()
        .map(|batch| -> Result<BatchOutputs, EvaluationError> {
            let mut outputs = BatchOutputs::new();
            for (name, values) in batch {
                let values: Vec<f64> = serde_json::from_value(values)?;
                let tensors = values
                    .into_iter()
                    .map(|value| Tensor::new(value, &Device::Cpu))
                    .collect::<Result<Vec<_>, _>>()?;
                outputs.insert(name, tensors);
            }
            Ok(outputs)
        })
        .collect()
}
