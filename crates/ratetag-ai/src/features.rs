//! Feature extraction: raw rate names to a dense `f32` matrix.
//!
//! The only production extractor is a character n-gram TF-IDF vectorizer
//! exported as JSON (`vocabulary` + `idf_values`). Words are padded with one
//! space on each side before n-grams are taken, so the feature space matches
//! a word-boundary-aware char vectorizer.

use std::collections::HashMap;
use std::path::Path;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::info;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Turns a batch of strings into one fixed-width row per input.
pub trait FeatureExtractor: Send + Sync {
    fn width(&self) -> usize;

    fn transform(&self, inputs: &[String]) -> anyhow::Result<FeatureMatrix>;
}

/// Row-major dense matrix; row `i` belongs to input `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    rows: usize,
    width: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn new(rows: usize, width: usize, data: Vec<f32>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            data.len() == rows * width,
            "feature data has {} values, expected {rows} x {width}",
            data.len()
        );
        Ok(Self { rows, width, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.width..(i + 1) * self.width]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

#[derive(Debug, Deserialize)]
struct TfidfFile {
    vocabulary: HashMap<String, usize>,
    idf_values: Vec<f32>,
    #[serde(default = "default_ngram_range")]
    ngram_range: (usize, usize),
    #[serde(default = "default_true")]
    lowercase: bool,
    #[serde(default = "default_true")]
    strip_accents: bool,
    #[serde(default = "default_true")]
    sublinear_tf: bool,
}

fn default_ngram_range() -> (usize, usize) {
    (1, 3)
}

fn default_true() -> bool {
    true
}

/// Character n-gram TF-IDF vectorizer with L2-normalized rows.
#[derive(Debug)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    ngram_range: (usize, usize),
    lowercase: bool,
    strip_accents: bool,
    sublinear_tf: bool,
}

impl TfidfVectorizer {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        anyhow::ensure!(path.exists(), "{} not found", path.display());
        let text = std::fs::read_to_string(path)?;
        let vectorizer = Self::from_json_str(&text)?;
        info!(
            width = vectorizer.width(),
            vocabulary = vectorizer.vocabulary.len(),
            path = %path.display(),
            "loaded tf-idf vectorizer"
        );
        Ok(vectorizer)
    }

    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        let file: TfidfFile = serde_json::from_str(text)?;
        let (min_n, max_n) = file.ngram_range;
        anyhow::ensure!(
            min_n >= 1 && min_n <= max_n,
            "invalid ngram_range [{min_n}, {max_n}]"
        );
        anyhow::ensure!(!file.idf_values.is_empty(), "idf_values is empty");
        if let Some((term, &index)) = file
            .vocabulary
            .iter()
            .find(|(_, index)| **index >= file.idf_values.len())
        {
            anyhow::bail!(
                "vocabulary term {term:?} has index {index}, but only {} idf values",
                file.idf_values.len()
            );
        }
        Ok(Self {
            vocabulary: file.vocabulary,
            idf: file.idf_values,
            ngram_range: file.ngram_range,
            lowercase: file.lowercase,
            strip_accents: file.strip_accents,
            sublinear_tf: file.sublinear_tf,
        })
    }

    fn preprocess(&self, text: &str) -> String {
        let text = if self.strip_accents {
            strip_accents(text)
        } else {
            text.to_string()
        };
        if self.lowercase {
            text.to_lowercase()
        } else {
            text
        }
    }

    /// Vector for one input, written into `out` (length == width).
    fn vectorize_into(&self, text: &str, out: &mut [f32]) {
        let text = self.preprocess(text);
        let mut counts: HashMap<usize, u32> = HashMap::new();
        for gram in char_ngrams(&text, self.ngram_range) {
            if let Some(&index) = self.vocabulary.get(&gram) {
                *counts.entry(index).or_insert(0) += 1;
            }
        }

        for (index, count) in counts {
            let tf = if self.sublinear_tf {
                1.0 + (count as f32).ln()
            } else {
                count as f32
            };
            out[index] = tf * self.idf[index];
        }
        normalize(out);
    }
}

impl FeatureExtractor for TfidfVectorizer {
    fn width(&self) -> usize {
        self.idf.len()
    }

    fn transform(&self, inputs: &[String]) -> anyhow::Result<FeatureMatrix> {
        let width = self.width();
        let mut data = vec![0.0f32; inputs.len() * width];
        data.par_chunks_mut(width)
            .zip(inputs.par_iter())
            .for_each(|(row, text)| self.vectorize_into(text, row));
        FeatureMatrix::new(inputs.len(), width, data)
    }
}

/// NFD, drop combining marks, recompose.
fn strip_accents(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
}

/// Character n-grams within word boundaries: each whitespace-separated word is
/// padded with a single space on both sides.
fn char_ngrams(text: &str, (min_n, max_n): (usize, usize)) -> Vec<String> {
    let mut grams = Vec::new();
    for word in text.split_whitespace() {
        let padded: Vec<char> = std::iter::once(' ')
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for n in min_n..=max_n {
            if padded.len() < n {
                continue;
            }
            for window in padded.windows(n) {
                grams.push(window.iter().collect());
            }
        }
    }
    grams
}

/// L2-normalize a vector in place.
fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectorizer(vocab: &[&str]) -> TfidfVectorizer {
        let vocabulary: HashMap<&str, usize> =
            vocab.iter().enumerate().map(|(i, t)| (*t, i)).collect();
        let json = serde_json::json!({
            "vocabulary": vocabulary,
            "idf_values": vec![1.0f32; vocab.len()],
        });
        TfidfVectorizer::from_json_str(&json.to_string()).unwrap()
    }

    #[test]
    fn ngrams_are_word_padded() {
        let grams = char_ngrams("ab", (1, 3));
        assert_eq!(
            grams,
            vec![" ", "a", "b", " ", " a", "ab", "b ", " ab", "ab "]
        );
    }

    #[test]
    fn ngrams_skip_short_words() {
        // " a " has 3 chars: no 4-grams.
        let grams = char_ngrams("a", (4, 4));
        assert!(grams.is_empty());
    }

    #[test]
    fn accents_and_case_folded() {
        let v = vectorizer(&["e"]);
        assert_eq!(v.preprocess("CAFÉ"), "cafe");
        assert_eq!(v.preprocess("Am\u{0065}\u{0301}lie"), "amelie");
    }

    #[test]
    fn rows_are_unit_norm() {
        let v = vectorizer(&["s", "se", "sea", "v", "vi"]);
        let m = v
            .transform(&["Sea View".to_string(), "".to_string()])
            .unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.width(), 5);

        let norm: f32 = m.row(0).iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
        // Empty input stays the zero vector.
        assert!(m.row(1).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn sublinear_tf_weights() {
        // " aa " holds "a" twice and " " twice.
        let json = r#"{"vocabulary": {"a": 0, " ": 1}, "idf_values": [2.0, 1.0], "ngram_range": [1, 1]}"#;
        let v = TfidfVectorizer::from_json_str(json).unwrap();
        let m = v.transform(&["aa".to_string()]).unwrap();
        let a = 2.0 * (1.0 + 2f32.ln());
        let space = 1.0 + 2f32.ln();
        let norm = (a * a + space * space).sqrt();
        assert!((m.row(0)[0] - a / norm).abs() < 1e-5);
        assert!((m.row(0)[1] - space / norm).abs() < 1e-5);
    }

    #[test]
    fn row_order_matches_input_order() {
        let v = vectorizer(&["x", "y"]);
        let inputs: Vec<String> = (0..64)
            .map(|i| if i % 2 == 0 { "x" } else { "y" }.to_string())
            .collect();
        let m = v.transform(&inputs).unwrap();
        for i in 0..64 {
            let expected = if i % 2 == 0 { 0 } else { 1 };
            assert!(m.row(i)[expected] > 0.99, "row {i} out of order");
        }
    }

    #[test]
    fn rejects_out_of_range_vocabulary() {
        let json = r#"{"vocabulary": {"a": 3}, "idf_values": [1.0]}"#;
        let err = TfidfVectorizer::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("index 3"));
    }

    #[test]
    fn rejects_bad_ngram_range() {
        let json = r#"{"vocabulary": {}, "idf_values": [1.0], "ngram_range": [3, 1]}"#;
        assert!(TfidfVectorizer::from_json_str(json).is_err());
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TfidfVectorizer::load(&dir.path().join("tfidf_vectorizer.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
