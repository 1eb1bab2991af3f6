//! Accuracy check: compare a predictions CSV against an expected CSV.
//!
//! Rows of both files are sorted by the input column and paired by position.
//! Two values match when their normalized Levenshtein similarity reaches the
//! threshold.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;
use ratetag_core::{Record, Settings};
use serde::Serialize;
use tracing::warn;

/// Placeholder values that count as empty.
const EMPTY_MARKERS: &[&str] = &["undefined", "nan", "None"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuePair {
    pub expected: String,
    pub received: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowMismatch {
    /// 1-based position after sorting.
    pub row: usize,
    pub rate_name: String,
    pub mismatches: BTreeMap<String, ValuePair>,
}

#[derive(Debug, Default)]
pub struct CompareReport {
    pub total_rows: usize,
    pub error_rows: usize,
    /// Categories with at least one mismatch, in configured order.
    pub column_errors: Vec<(String, usize)>,
    pub mismatches: Vec<RowMismatch>,
}

impl CompareReport {
    pub fn error_rate(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            self.error_rows as f64 / self.total_rows as f64
        }
    }

    pub fn column_error_rate(&self, errors: usize) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            errors as f64 / self.total_rows as f64
        }
    }
}

pub fn run(
    settings: &Settings,
    predicted: &Path,
    expected: &Path,
    threshold: f64,
    mismatches_path: &Path,
) -> anyhow::Result<CompareReport> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&threshold),
        "threshold must be within 0.0..=1.0, got {threshold}"
    );
    let predicted_rows = ratetag_store::read_path(predicted)
        .with_context(|| format!("reading {}", predicted.display()))?;
    let expected_rows = ratetag_store::read_path(expected)
        .with_context(|| format!("reading {}", expected.display()))?;

    let report = compare(
        predicted_rows,
        expected_rows,
        &settings.input_col,
        &settings.categories,
        threshold,
    );

    let file = File::create(mismatches_path)
        .with_context(|| format!("creating {}", mismatches_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &report.mismatches)
        .context("writing mismatch report")?;
    Ok(report)
}

pub fn compare(
    mut predicted: Vec<Record>,
    mut expected: Vec<Record>,
    key: &str,
    categories: &[String],
    threshold: f64,
) -> CompareReport {
    if predicted.len() != expected.len() {
        warn!(
            predicted = predicted.len(),
            expected = expected.len(),
            "row counts differ, comparing the common prefix"
        );
    }
    predicted.sort_by(|a, b| text(a, key).cmp(&text(b, key)));
    expected.sort_by(|a, b| text(a, key).cmp(&text(b, key)));

    // Only categories present in both files are compared.
    let shared: Vec<&String> = categories
        .iter()
        .filter(|c| has_column(&predicted, c) && has_column(&expected, c))
        .collect();

    let mut report = CompareReport {
        total_rows: predicted.len().min(expected.len()),
        ..CompareReport::default()
    };
    let mut column_errors: BTreeMap<&str, usize> = BTreeMap::new();

    for (index, (got, want)) in predicted.iter().zip(&expected).enumerate() {
        let mut row_mismatches = BTreeMap::new();
        for category in &shared {
            let received = clean(&text(got, category));
            let expected = clean(&text(want, category));
            if similarity(&received, &expected) < threshold {
                *column_errors.entry(category.as_str()).or_insert(0) += 1;
                row_mismatches.insert(
                    category.to_string(),
                    ValuePair { expected, received },
                );
            }
        }
        if !row_mismatches.is_empty() {
            report.error_rows += 1;
            report.mismatches.push(RowMismatch {
                row: index + 1,
                rate_name: got
                    .get(key)
                    .map(|v| v.to_text().into_owned())
                    .unwrap_or_else(|| "N/A".to_string()),
                mismatches: row_mismatches,
            });
        }
    }

    report.column_errors = shared
        .iter()
        .filter_map(|c| column_errors.get(c.as_str()).map(|&n| (c.to_string(), n)))
        .collect();
    report
}

/// `1 - distance / max_len`; two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / max_len as f64
}

/// Edit distance over chars, two-row dynamic programming.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn text(record: &Record, key: &str) -> String {
    record
        .get(key)
        .map(|v| v.to_text().into_owned())
        .unwrap_or_default()
}

fn clean(value: &str) -> String {
    if EMPTY_MARKERS.contains(&value) {
        String::new()
    } else {
        value.to_string()
    }
}

fn has_column(records: &[Record], column: &str) -> bool {
    records.first().is_some_and(|r| r.get(column).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, pairs: &[(&str, &str)]) -> Record {
        let mut r = Record::new();
        r.push("rate_name", name);
        for (k, v) in pairs {
            r.push(*k, *v);
        }
        r
    }

    fn cats(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("über", "uber"), 1);
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("sea", "sea"), 1.0);
        assert_eq!(similarity("sea", ""), 0.0);
        assert!((similarity("ocean view", "ocean views") - 10.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn rows_paired_after_sorting() {
        let predicted = vec![
            row("b room", &[("view", "garden")]),
            row("a room", &[("view", "sea")]),
        ];
        let expected = vec![
            row("a room", &[("view", "sea")]),
            row("b room", &[("view", "city")]),
        ];
        let report = compare(predicted, expected, "rate_name", &cats(&["view"]), 0.8);
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.error_rows, 1);
        assert_eq!(report.column_errors, vec![("view".to_string(), 1)]);

        let m = &report.mismatches[0];
        assert_eq!(m.row, 2);
        assert_eq!(m.rate_name, "b room");
        assert_eq!(
            m.mismatches["view"],
            ValuePair {
                expected: "city".into(),
                received: "garden".into()
            }
        );
        assert!((report.error_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_markers_match_empty() {
        let predicted = vec![row("a", &[("view", "nan"), ("bedding", "None")])];
        let expected = vec![row("a", &[("view", ""), ("bedding", "undefined")])];
        let report = compare(
            predicted,
            expected,
            "rate_name",
            &cats(&["view", "bedding"]),
            0.8,
        );
        assert_eq!(report.error_rows, 0);
        assert!(report.mismatches.is_empty());
    }

    #[test]
    fn categories_missing_from_either_side_are_skipped() {
        let predicted = vec![row("a", &[("view", "sea"), ("floor", "high")])];
        let expected = vec![row("a", &[("view", "sea")])];
        let report = compare(
            predicted,
            expected,
            "rate_name",
            &cats(&["view", "floor"]),
            0.8,
        );
        assert_eq!(report.error_rows, 0);
    }

    #[test]
    fn run_writes_mismatch_report() {
        let dir = tempfile::tempdir().unwrap();
        let predicted = dir.path().join("predictions.csv");
        let expected = dir.path().join("expected.csv");
        let out = dir.path().join("mismatches.json");
        std::fs::write(&predicted, "rate_name,view\nSuite,garden\n").unwrap();
        std::fs::write(&expected, "rate_name,view\nSuite,sea\n").unwrap();

        let settings = Settings::from_yaml_str("categories: [view]\n").unwrap();
        let report = run(&settings, &predicted, &expected, 0.8, &out).unwrap();
        assert_eq!(report.error_rows, 1);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written[0]["rate_name"], "Suite");
        assert_eq!(written[0]["mismatches"]["view"]["expected"], "sea");
        assert_eq!(written[0]["mismatches"]["view"]["received"], "garden");
    }
}
