//! Per-category classifiers.
//!
//! A [`Classifier`] maps a feature matrix to one class id per row; a
//! [`CategoryModel`] pairs it with the [`LabelCodec`] that turns ids into
//! label strings. The built-in backend evaluates CatBoost oblivious-tree
//! models from their JSON export.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::features::FeatureMatrix;
use crate::labels::LabelCodec;

/// Class-id predictor for one category.
pub trait Classifier: Send + Sync {
    fn predict_classes(&self, features: &FeatureMatrix) -> anyhow::Result<Vec<usize>>;
}

/// A loaded category: classifier plus label codec. Immutable after load.
pub struct CategoryModel {
    classifier: Box<dyn Classifier>,
    labels: LabelCodec,
}

impl CategoryModel {
    pub fn new(classifier: Box<dyn Classifier>, labels: LabelCodec) -> Self {
        Self { classifier, labels }
    }

    pub fn labels(&self) -> &LabelCodec {
        &self.labels
    }

    /// Decoded label per row, in row order.
    pub fn predict_labels(&self, features: &FeatureMatrix) -> anyhow::Result<Vec<String>> {
        let ids = self.classifier.predict_classes(features)?;
        anyhow::ensure!(
            ids.len() == features.rows(),
            "classifier returned {} predictions for {} rows",
            ids.len(),
            features.rows()
        );
        ids.into_iter()
            .map(|id| {
                self.labels.decode(id).map(str::to_string).ok_or_else(|| {
                    anyhow::anyhow!(
                        "class id {id} outside label codec of {} labels",
                        self.labels.len()
                    )
                })
            })
            .collect()
    }
}

// ── CatBoost JSON ──

#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    features_info: Option<FeaturesInfo>,
    oblivious_trees: Vec<TreeFile>,
    #[serde(default)]
    scale_and_bias: Option<ScaleAndBias>,
}

#[derive(Debug, Deserialize)]
struct FeaturesInfo {
    #[serde(default)]
    float_features: Vec<FloatFeatureInfo>,
}

#[derive(Debug, Deserialize)]
struct FloatFeatureInfo {
    feature_index: usize,
    flat_feature_index: usize,
}

#[derive(Debug, Deserialize)]
struct TreeFile {
    #[serde(default)]
    splits: Vec<SplitFile>,
    leaf_values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct SplitFile {
    #[serde(default)]
    split_type: Option<String>,
    float_feature_index: Option<usize>,
    border: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Bias {
    Scalar(f64),
    PerDimension(Vec<f64>),
}

#[derive(Debug, Deserialize)]
struct ScaleAndBias(f64, Bias);

#[derive(Debug, Clone)]
struct Split {
    feature: usize,
    border: f32,
}

#[derive(Debug, Clone)]
struct Tree {
    splits: Vec<Split>,
    leaf_values: Vec<f64>,
}

/// Oblivious-tree ensemble evaluated on dense features.
///
/// Dimension 1 is a binary logit (`sigmoid >= 0.5` picks class 1); higher
/// dimensions are multiclass logits decoded with softmax + argmax.
#[derive(Debug, Clone)]
pub struct CatBoostModel {
    trees: Vec<Tree>,
    dimension: usize,
    scale: f64,
    bias: Vec<f64>,
}

impl CatBoostModel {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        anyhow::ensure!(path.exists(), "{} not found", path.display());
        let text = std::fs::read_to_string(path)?;
        let model = Self::from_json_str(&text)?;
        info!(
            trees = model.trees.len(),
            dimension = model.dimension,
            model = %path.display(),
            "loaded catboost model"
        );
        Ok(model)
    }

    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        let file: ModelFile = serde_json::from_str(text)?;
        anyhow::ensure!(!file.oblivious_trees.is_empty(), "model has no trees");

        // float_feature_index -> column in the dense feature row.
        let flat: HashMap<usize, usize> = file
            .features_info
            .map(|info| {
                info.float_features
                    .into_iter()
                    .map(|f| (f.feature_index, f.flat_feature_index))
                    .collect()
            })
            .unwrap_or_default();

        let mut dimension = None;
        let mut trees = Vec::with_capacity(file.oblivious_trees.len());
        for (t, tree) in file.oblivious_trees.into_iter().enumerate() {
            let leaves = 1usize
                .checked_shl(tree.splits.len() as u32)
                .ok_or_else(|| anyhow::anyhow!("tree {t} is too deep"))?;
            anyhow::ensure!(
                !tree.leaf_values.is_empty() && tree.leaf_values.len() % leaves == 0,
                "tree {t} has {} leaf values for {leaves} leaves",
                tree.leaf_values.len()
            );
            let dim = tree.leaf_values.len() / leaves;
            match dimension {
                None => dimension = Some(dim),
                Some(d) => anyhow::ensure!(
                    d == dim,
                    "tree {t} has dimension {dim}, expected {d}"
                ),
            }

            let splits = tree
                .splits
                .into_iter()
                .map(|s| parse_split(s, &flat))
                .collect::<anyhow::Result<Vec<_>>>()
                .map_err(|e| e.context(format!("tree {t}")))?;
            trees.push(Tree {
                splits,
                leaf_values: tree.leaf_values,
            });
        }
        let dimension = dimension.unwrap_or(1);

        let (scale, bias) = match file.scale_and_bias {
            None => (1.0, vec![0.0; dimension]),
            Some(ScaleAndBias(scale, Bias::Scalar(b))) => (scale, vec![b; dimension]),
            Some(ScaleAndBias(scale, Bias::PerDimension(b))) if b.is_empty() => {
                (scale, vec![0.0; dimension])
            }
            Some(ScaleAndBias(scale, Bias::PerDimension(b))) => {
                anyhow::ensure!(
                    b.len() == dimension,
                    "bias has {} values, model dimension is {dimension}",
                    b.len()
                );
                (scale, b)
            }
        };

        Ok(Self {
            trees,
            dimension,
            scale,
            bias,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Raw scores for one row: `scale * sum(leaf values) + bias`.
    fn raw_scores(&self, row: &[f32]) -> anyhow::Result<Vec<f64>> {
        let mut scores = vec![0.0f64; self.dimension];
        for tree in &self.trees {
            let mut leaf = 0usize;
            for (bit, split) in tree.splits.iter().enumerate() {
                let value = row.get(split.feature).ok_or_else(|| {
                    anyhow::anyhow!(
                        "split on feature {} but rows have width {}",
                        split.feature,
                        row.len()
                    )
                })?;
                if *value > split.border {
                    leaf |= 1 << bit;
                }
            }
            let offset = leaf * self.dimension;
            for (score, value) in scores
                .iter_mut()
                .zip(&tree.leaf_values[offset..offset + self.dimension])
            {
                *score += value;
            }
        }
        for (score, bias) in scores.iter_mut().zip(&self.bias) {
            *score = self.scale * *score + bias;
        }
        Ok(scores)
    }
}

impl Classifier for CatBoostModel {
    fn predict_classes(&self, features: &FeatureMatrix) -> anyhow::Result<Vec<usize>> {
        (0..features.rows())
            .map(|i| self.raw_scores(features.row(i)).map(|s| decode_scores(&s)))
            .collect()
    }
}

fn parse_split(split: SplitFile, flat: &HashMap<usize, usize>) -> anyhow::Result<Split> {
    if let Some(kind) = split.split_type.as_deref() {
        anyhow::ensure!(kind == "FloatFeature", "unsupported split type {kind:?}");
    }
    let index = split
        .float_feature_index
        .ok_or_else(|| anyhow::anyhow!("split without float_feature_index"))?;
    let border = split
        .border
        .ok_or_else(|| anyhow::anyhow!("split without border"))?;
    Ok(Split {
        feature: flat.get(&index).copied().unwrap_or(index),
        border: border as f32,
    })
}

/// Class id from raw scores: binary logit for one score, argmax otherwise.
pub(crate) fn decode_scores(scores: &[f64]) -> usize {
    match scores {
        [] => 0,
        [logit] => usize::from(sigmoid(*logit) >= 0.5),
        _ => argmax(&softmax(scores)),
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// First index of the maximum value.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matrix(rows: &[&[f32]]) -> FeatureMatrix {
        let width = rows[0].len();
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        FeatureMatrix::new(rows.len(), width, data).unwrap()
    }

    /// One depth-1 tree on feature 0: right leaf is positive.
    fn binary_model() -> CatBoostModel {
        let model = json!({
            "oblivious_trees": [{
                "splits": [{"split_type": "FloatFeature", "float_feature_index": 0, "border": 0.5}],
                "leaf_values": [-2.0, 3.0]
            }],
            "scale_and_bias": [1.0, [0.0]]
        });
        CatBoostModel::from_json_str(&model.to_string()).unwrap()
    }

    /// Depth-2 tree over features 0 and 1, three classes.
    fn multiclass_model() -> CatBoostModel {
        let model = json!({
            "oblivious_trees": [{
                "splits": [
                    {"float_feature_index": 0, "border": 0.5},
                    {"float_feature_index": 1, "border": 0.5}
                ],
                // leaf-major: leaf 0..3, each with 3 class scores
                "leaf_values": [
                    1.0, 0.0, 0.0,
                    0.0, 1.0, 0.0,
                    0.0, 0.0, 1.0,
                    0.0, 0.0, 0.0
                ]
            }],
            "scale_and_bias": [2.0, 0.0]
        });
        CatBoostModel::from_json_str(&model.to_string()).unwrap()
    }

    #[test]
    fn binary_decoding() {
        let model = binary_model();
        assert_eq!(model.dimension(), 1);
        let ids = model
            .predict_classes(&matrix(&[&[0.9], &[0.1]]))
            .unwrap();
        assert_eq!(ids, vec![1, 0]);
    }

    #[test]
    fn multiclass_decoding() {
        let model = multiclass_model();
        assert_eq!(model.dimension(), 3);
        let ids = model
            .predict_classes(&matrix(&[&[0.0, 0.0], &[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]]))
            .unwrap();
        // Leaf 3 is all zeros: ties go to the first class.
        assert_eq!(ids, vec![0, 1, 2, 0]);
    }

    #[test]
    fn bias_shifts_binary_decision() {
        let model = json!({
            "oblivious_trees": [{"splits": [], "leaf_values": [0.1]}],
            "scale_and_bias": [1.0, [-1.0]]
        });
        let model = CatBoostModel::from_json_str(&model.to_string()).unwrap();
        assert_eq!(model.predict_classes(&matrix(&[&[0.0]])).unwrap(), vec![0]);
    }

    #[test]
    fn feature_index_remapped_through_features_info() {
        let model = json!({
            "features_info": {"float_features": [{"feature_index": 0, "flat_feature_index": 1}]},
            "oblivious_trees": [{
                "splits": [{"float_feature_index": 0, "border": 0.5}],
                "leaf_values": [-1.0, 1.0]
            }]
        });
        let model = CatBoostModel::from_json_str(&model.to_string()).unwrap();
        let ids = model
            .predict_classes(&matrix(&[&[0.0, 0.9], &[0.9, 0.0]]))
            .unwrap();
        assert_eq!(ids, vec![1, 0]);
    }

    #[test]
    fn rejects_bad_leaf_count() {
        let model = json!({
            "oblivious_trees": [{
                "splits": [{"float_feature_index": 0, "border": 0.5}],
                "leaf_values": [1.0, 2.0, 3.0]
            }]
        });
        let err = CatBoostModel::from_json_str(&model.to_string()).unwrap_err();
        assert!(err.to_string().contains("leaf values"));
    }

    #[test]
    fn rejects_categorical_splits() {
        let model = json!({
            "oblivious_trees": [{
                "splits": [{"split_type": "OneHotFeature", "cat_feature_index": 0, "value": 1}],
                "leaf_values": [1.0, 2.0]
            }]
        });
        let err = CatBoostModel::from_json_str(&model.to_string()).unwrap_err();
        assert!(format!("{err:#}").contains("OneHotFeature"));
    }

    #[test]
    fn rejects_empty_model() {
        let err = CatBoostModel::from_json_str(r#"{"oblivious_trees": []}"#).unwrap_err();
        assert!(err.to_string().contains("no trees"));
    }

    #[test]
    fn feature_out_of_range_is_error() {
        let model = binary_model();
        let empty_row = FeatureMatrix::new(1, 0, Vec::new()).unwrap();
        assert!(model.predict_classes(&empty_row).is_err());
    }

    #[test]
    fn category_model_decodes_labels() {
        let labels = LabelCodec::new(vec!["no".into(), "yes".into()]).unwrap();
        let model = CategoryModel::new(Box::new(binary_model()), labels);
        let out = model.predict_labels(&matrix(&[&[0.1], &[0.7]])).unwrap();
        assert_eq!(out, vec!["no", "yes"]);
    }

    #[test]
    fn category_model_rejects_unknown_class() {
        let labels = LabelCodec::new(vec!["only".into()]).unwrap();
        let model = CategoryModel::new(Box::new(binary_model()), labels);
        let err = model.predict_labels(&matrix(&[&[0.9]])).unwrap_err();
        assert!(err.to_string().contains("class id 1"));
    }
}
