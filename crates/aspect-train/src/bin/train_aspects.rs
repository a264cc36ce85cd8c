//! CLI entry point for per-aspect linear classifier training.
//!
//! Trains one classifier per aspect column, in schema order, and writes
//! `<model-dir>/<aspect>/word_weights.txt` for each.
//!
//! Usage:
//!   cargo run --bin train-aspects -- --data-dir data --model-dir experiments/linear
//!   cargo run --bin train-aspects -- --train false --predict true

use anyhow::Context;
use aspect_core::{LoggingConfig, RunConfig};
use aspect_train::driver;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "train-aspects",
    about = "Train one linear classifier per review aspect"
)]
struct Cli {
    /// Directory containing words.txt, train.csv, valid.csv and dataset_params.json.
    #[arg(long, default_value = "../data")]
    data_dir: PathBuf,

    /// Base directory for the model; holds params.json and one subdirectory per aspect.
    #[arg(long, default_value = "../experiments/linear")]
    model_dir: PathBuf,

    /// Which device to use: a GPU ordinal or `cpu`.
    #[arg(long, default_value = "0")]
    gpu: String,

    /// Save checkpoints every this many steps.
    #[arg(long, default_value = "1000")]
    save_checkpoints_steps: u64,

    /// Minimum seconds between evaluations during training.
    #[arg(long, default_value = "240")]
    throttle_secs: u64,

    /// Whether to train and evaluate.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    train: bool,

    /// Whether to write evaluation predictions.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    predict: bool,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format: text or json.
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            data_dir: self.data_dir.clone(),
            model_dir: self.model_dir.clone(),
            device: self.gpu.clone(),
            save_checkpoints_steps: self.save_checkpoints_steps,
            throttle_secs: self.throttle_secs,
            train: self.train,
            predict: self.predict,
        }
    }

    fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format.clone(),
        }
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.is_json() {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.run_config();
    let summaries = driver::run(&config)
        .with_context(|| format!("training run under {} failed", config.model_dir.display()))?;

    for summary in &summaries {
        println!(
            "{:<42} steps={:<6} eval_loss={:.4} | {}",
            summary.target.name(),
            summary.steps,
            summary.eval_loss,
            summary.eval_metrics,
        );
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.logging());

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
