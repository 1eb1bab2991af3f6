mod compare;
mod display;
mod predict;
mod serve;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ratetag_core::Settings;
use ratetag_store::OutputFormat;
use tracing::{Level, debug};

/// Hotel rate name classification.
#[derive(Parser)]
#[command(name = "ratetag", version)]
struct Cli {
    /// Path to the YAML settings file
    #[arg(long, global = true, env = "RATETAG_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Predict categories for a rate name or a CSV file of rate names
    Predict {
        /// A rate name, or a path ending in .csv
        input: String,

        /// Restrict to these categories (repeatable)
        #[arg(short = 'c', long = "category")]
        categories: Vec<String>,

        /// Write results to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: csv, tsv, json, yaml, or parquet
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Fail instead of emitting fallback records when retries run out
        #[arg(long)]
        strict: bool,
    },

    /// Serve predictions over HTTP
    Serve {
        /// Port to bind (overrides the settings file)
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
    },

    /// Compare a predictions CSV against an expected CSV
    Compare {
        predicted: PathBuf,
        expected: PathBuf,

        /// Minimum similarity for two values to count as equal
        #[arg(long, default_value_t = 0.8)]
        threshold: f64,

        /// Where to write the mismatch report
        #[arg(long, default_value = "mismatches.json")]
        mismatches: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
    debug!("ratetag v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::from_file(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;

    match cli.command {
        Command::Predict {
            input,
            categories,
            output,
            format,
            strict,
        } => {
            let args = predict::PredictArgs {
                input,
                categories,
                output,
                format,
                strict,
            };
            let stats = predict::run(&settings, &args)?;
            display::print_predict_stats(&stats);
        }
        Command::Serve { port } => {
            let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
            runtime.block_on(serve::run(settings, port))?;
        }
        Command::Compare {
            predicted,
            expected,
            threshold,
            mismatches,
        } => {
            let report = compare::run(&settings, &predicted, &expected, threshold, &mismatches)?;
            display::print_compare_report(&report, &mismatches);
        }
    }
    Ok(())
}
