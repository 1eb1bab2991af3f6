//! Batch prediction: read inputs, run the retrying registry, write results.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use ratetag_ai::{ExhaustionPolicy, Registry, RegistryOptions, RetryExecutor};
use ratetag_core::{INPUT_FIELD, Record, Settings};
use ratetag_store::{OutputFormat, Sink};
use tracing::info;

use crate::display;

pub struct PredictArgs {
    pub input: String,
    pub categories: Vec<String>,
    pub output: Option<PathBuf>,
    pub format: Option<OutputFormat>,
    pub strict: bool,
}

#[derive(Debug)]
pub struct PredictStats {
    pub rows: usize,
    pub fallbacks: usize,
    pub output: Option<PathBuf>,
    pub elapsed_secs: f64,
}

pub fn run(settings: &Settings, args: &PredictArgs) -> anyhow::Result<PredictStats> {
    let start = Instant::now();

    let file_input = is_csv_path(&args.input);
    let inputs = read_inputs(&args.input, &settings.input_col)?;
    info!(rows = inputs.len(), "read inputs");

    // Resolve the format before loading models so a bad combination fails fast.
    let format = resolve_format(args.format, args.output.as_deref(), file_input);
    if args.output.is_none() && args.format.is_some() && !format.is_text() {
        anyhow::bail!("{format} output requires --output");
    }

    let registry = Registry::load(
        &settings.models_dir,
        &settings.categories,
        RegistryOptions {
            max_workers: settings.max_workers,
        },
    )
    .context("loading models")?;

    let policy = if args.strict {
        ExhaustionPolicy::Raise
    } else {
        ExhaustionPolicy::Degrade
    };
    let categories = (!args.categories.is_empty()).then_some(args.categories.as_slice());
    let records =
        RetryExecutor::predict_with_retry(&registry, &inputs, categories, &settings.retry, policy)
            .context("prediction failed after retries")?;

    write_results(&records, format, args, &settings.input_col)?;

    Ok(PredictStats {
        rows: records.len(),
        fallbacks: records.iter().filter(|r| r.is_fallback()).count(),
        output: args.output.clone(),
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}

fn is_csv_path(input: &str) -> bool {
    Path::new(input)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// A `.csv` path yields its `input_col` column; anything else is one rate name.
fn read_inputs(input: &str, input_col: &str) -> anyhow::Result<Vec<String>> {
    if is_csv_path(input) {
        let path = Path::new(input);
        ratetag_store::read_column(path, input_col)
            .with_context(|| format!("reading column '{input_col}' from {}", path.display()))
    } else {
        Ok(vec![input.trim().to_string()])
    }
}

/// Explicit format, else the output extension, else csv for file input and
/// json for a single string.
fn resolve_format(
    explicit: Option<OutputFormat>,
    output: Option<&Path>,
    file_input: bool,
) -> OutputFormat {
    explicit
        .or_else(|| output.and_then(OutputFormat::from_path))
        .unwrap_or(if file_input {
            OutputFormat::Csv
        } else {
            OutputFormat::Json
        })
}

/// Files and streams carry `input_col` as the input header, matching what
/// the input CSV used; the terminal cards keep the plain records.
fn write_results(
    records: &[Record],
    format: OutputFormat,
    args: &PredictArgs,
    input_col: &str,
) -> anyhow::Result<()> {
    if args.output.is_none() && args.format.is_none() {
        display::print_results(records);
        return Ok(());
    }

    let records = with_input_header(records, input_col);
    match &args.output {
        Some(path) => {
            ratetag_store::serialize(&records, format, Sink::Path(path))
                .with_context(|| format!("writing {}", path.display()))?;
        }
        None => {
            let mut stdout = std::io::stdout();
            ratetag_store::serialize(&records, format, Sink::Stream(&mut stdout))
                .context("writing results to stdout")?;
        }
    }
    Ok(())
}

fn with_input_header(records: &[Record], input_col: &str) -> Vec<Record> {
    records
        .iter()
        .cloned()
        .map(|mut record| {
            record.rename(INPUT_FIELD, input_col);
            record
        })
        .collect()
}
