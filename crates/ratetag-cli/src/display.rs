//! Human-readable terminal output for prediction results and reports.

use std::fmt::Write as _;
use std::path::Path;

use ratetag_core::{CONFIDENCE_FIELD, INPUT_FIELD, Record};

use crate::compare::CompareReport;
use crate::predict::PredictStats;

const MAX_MISMATCH_ROWS: usize = 10;

// ── Prediction results ──

/// Print every record as a vertical card.
pub fn print_results(records: &[Record]) {
    println!("Prediction Results:");
    println!();
    for record in records {
        print!("{}", render_card(record));
        println!();
    }
}

/// One card: the input as a header, then one line per category.
pub fn render_card(record: &Record) -> String {
    let mut out = String::new();
    let input = record.input().unwrap_or_default();
    let _ = writeln!(out, "=== {} ===", input);
    if record.is_fallback() {
        let _ = writeln!(out, "  (fallback: prediction failed)");
    }
    for (key, value) in record.iter() {
        if key == INPUT_FIELD || key == CONFIDENCE_FIELD {
            continue;
        }
        let _ = writeln!(out, "  {:<26} {}", key, value.to_text());
    }
    out
}

pub fn print_predict_stats(stats: &PredictStats) {
    eprintln!();
    eprintln!("Predicted {} rows in {:.2}s", stats.rows, stats.elapsed_secs);
    if stats.fallbacks > 0 {
        eprintln!("  {:<26} {}", "fallback rows", stats.fallbacks);
    }
    if let Some(path) = &stats.output {
        eprintln!("  {:<26} {}", "written to", path.display());
    }
}

// ── Compare report ──

pub fn print_compare_report(report: &CompareReport, mismatches_path: &Path) {
    println!("=== Comparison ===");
    println!("  {:<26} {}", "rows compared", report.total_rows);
    println!("  {:<26} {}", "rows with errors", report.error_rows);
    println!(
        "  {:<26} {:.2}%",
        "overall error rate",
        report.error_rate() * 100.0
    );
    println!();

    if !report.column_errors.is_empty() {
        println!("Error rate by column");
        for (column, errors) in &report.column_errors {
            println!(
                "  {:<26} {:.2}% ({} rows)",
                column,
                report.column_error_rate(*errors) * 100.0,
                errors
            );
        }
        println!();
    }

    if !report.mismatches.is_empty() {
        println!("Mismatches ({}):", report.mismatches.len());
        for mismatch in report.mismatches.iter().take(MAX_MISMATCH_ROWS) {
            println!("    row {:<6} {}", mismatch.row, mismatch.rate_name);
            for (column, pair) in &mismatch.mismatches {
                println!(
                    "      {:<20} expected '{}', received '{}'",
                    column, pair.expected, pair.received
                );
            }
        }
        if report.mismatches.len() > MAX_MISMATCH_ROWS {
            println!(
                "    ... and {} more",
                report.mismatches.len() - MAX_MISMATCH_ROWS
            );
        }
        println!();
    }
    println!("Mismatch report written to {}", mismatches_path.display());
}
