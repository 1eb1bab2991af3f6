//! Label codec: class id to label string, one file per category.
//!
//! `label_encoder_<category>.json` is a JSON array of strings; the array index
//! is the class id the classifier emits.

use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct LabelCodec {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelCodec {
    pub fn new(labels: Vec<String>) -> anyhow::Result<Self> {
        anyhow::ensure!(!labels.is_empty(), "label list is empty");
        let index = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        Ok(Self { labels, index })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        anyhow::ensure!(path.exists(), "{} not found", path.display());
        let text = std::fs::read_to_string(path)?;
        let labels: Vec<String> = serde_json::from_str(&text)?;
        Self::new(labels)
    }

    pub fn decode(&self, id: usize) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    pub fn encode(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}
