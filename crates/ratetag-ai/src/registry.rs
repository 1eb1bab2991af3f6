//! Model registry: one shared feature extractor plus one model per category.
//!
//! Loading and prediction both fan out across categories on a bounded rayon
//! pool owned by the registry. Per-category results are joined by category
//! name and projected back to input order, so completion order never leaks
//! into the output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use ratetag_core::Record;
use tracing::{debug, info, warn};

use crate::classifier::{CatBoostModel, CategoryModel, Classifier};
use crate::error::{LoadError, PredictError};
use crate::features::{FeatureExtractor, TfidfVectorizer};
use crate::labels::LabelCodec;

/// Anything that can turn a batch of inputs into prediction records.
///
/// The retry executor and the HTTP service depend on this rather than on
/// [`Registry`] directly.
pub trait Predictor: Send + Sync {
    /// Configured categories, in projection order.
    fn categories(&self) -> &[String];

    fn predict(
        &self,
        inputs: &[String],
        categories: Option<&[String]>,
    ) -> Result<Vec<Record>, PredictError>;

    fn resolve_categories(&self, requested: Option<&[String]>) -> Vec<String> {
        normalize_categories(self.categories(), requested)
    }
}

/// Requested categories filtered to the configured set, in configured order.
///
/// `None`, an empty request, or a request with no known names all resolve
/// to the full configured list.
pub fn normalize_categories(configured: &[String], requested: Option<&[String]>) -> Vec<String> {
    let Some(requested) = requested.filter(|r| !r.is_empty()) else {
        return configured.to_vec();
    };
    let selected: Vec<String> = configured
        .iter()
        .filter(|c| requested.contains(c))
        .cloned()
        .collect();
    if selected.is_empty() {
        warn!(requested = ?requested, "no requested category is configured, using all");
        return configured.to_vec();
    }
    if selected.len() < requested.len() {
        debug!(requested = ?requested, kept = ?selected, "dropped unknown categories");
    }
    selected
}

/// Replace missing inputs with the empty string.
pub fn sanitize_inputs<I, S>(inputs: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<S>>,
    S: Into<String>,
{
    inputs
        .into_iter()
        .map(|input| input.map(Into::into).unwrap_or_default())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Worker pool size; defaults to the number of CPUs.
    pub max_workers: Option<usize>,
}

pub struct Registry {
    categories: Vec<String>,
    extractor: Box<dyn FeatureExtractor>,
    models: HashMap<String, CategoryModel>,
    pool: ThreadPool,
}

impl Registry {
    /// Load the extractor and every category's model from `models_dir`.
    ///
    /// Any single category failing fails the whole load.
    pub fn load(
        models_dir: &Path,
        categories: &[String],
        options: RegistryOptions,
    ) -> Result<Self, LoadError> {
        if categories.is_empty() {
            return Err(LoadError::NoCategories);
        }
        let start = Instant::now();
        let pool = build_pool(&options)?;

        let extractor_path = extractor_path(models_dir);
        let extractor =
            TfidfVectorizer::load(&extractor_path).map_err(|source| LoadError::Extractor {
                path: extractor_path.clone(),
                source,
            })?;

        let models = pool.install(|| {
            categories
                .par_iter()
                .map(|category| {
                    load_category(models_dir, category)
                        .map(|model| (category.clone(), model))
                        .map_err(|source| LoadError::Category {
                            category: category.clone(),
                            source,
                        })
                })
                .collect::<Result<HashMap<_, _>, _>>()
        })?;

        info!(
            categories = models.len(),
            workers = pool.current_num_threads(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            models_dir = %models_dir.display(),
            "model registry loaded"
        );
        Ok(Self {
            categories: categories.to_vec(),
            extractor: Box::new(extractor),
            models,
            pool,
        })
    }

    /// Assemble a registry from already-built parts.
    pub fn from_parts(
        categories: Vec<String>,
        extractor: Box<dyn FeatureExtractor>,
        models: HashMap<String, CategoryModel>,
        options: RegistryOptions,
    ) -> Result<Self, LoadError> {
        if categories.is_empty() {
            return Err(LoadError::NoCategories);
        }
        if let Some(missing) = categories.iter().find(|c| !models.contains_key(*c)) {
            return Err(LoadError::Category {
                category: missing.clone(),
                source: anyhow::anyhow!("no model provided"),
            });
        }
        Ok(Self {
            categories,
            extractor,
            models,
            pool: build_pool(&options)?,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Predictor for Registry {
    fn categories(&self) -> &[String] {
        &self.categories
    }

    fn predict(
        &self,
        inputs: &[String],
        categories: Option<&[String]>,
    ) -> Result<Vec<Record>, PredictError> {
        let categories = self.resolve_categories(categories);
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();

        let features = self
            .pool
            .install(|| self.extractor.transform(inputs))
            .map_err(PredictError::Features)?;

        let mut columns: HashMap<&str, Vec<String>> = self.pool.install(|| {
            categories
                .par_iter()
                .map(|category| {
                    self.models
                        .get(category)
                        .ok_or_else(|| anyhow::anyhow!("no model loaded"))
                        .and_then(|model| model.predict_labels(&features))
                        .map(|labels| (category.as_str(), labels))
                        .map_err(|source| PredictError::Category {
                            category: category.clone(),
                            source,
                        })
                })
                .collect::<Result<HashMap<_, _>, PredictError>>()
        })?;

        let mut records: Vec<Record> = inputs
            .iter()
            .map(|input| Record::with_input(input.as_str()))
            .collect();
        for category in &categories {
            let labels = columns.remove(category.as_str()).unwrap_or_default();
            for (record, label) in records.iter_mut().zip(labels) {
                record.push(category.as_str(), label);
            }
        }

        debug!(
            rows = records.len(),
            categories = categories.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "prediction complete"
        );
        Ok(records)
    }
}

fn build_pool(options: &RegistryOptions) -> Result<ThreadPool, LoadError> {
    let workers = options.max_workers.unwrap_or_else(num_cpus::get).max(1);
    Ok(ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("ratetag-worker-{i}"))
        .build()?)
}

// ── Artifact layout ──

pub fn extractor_path(models_dir: &Path) -> PathBuf {
    models_dir.join("tfidf_vectorizer.json")
}

pub fn classifier_path(models_dir: &Path, category: &str) -> PathBuf {
    models_dir
        .join("cbm")
        .join(format!("catboost_model_{category}.json"))
}

pub fn labels_path(models_dir: &Path, category: &str) -> PathBuf {
    models_dir
        .join("label_text")
        .join(format!("label_encoder_{category}.json"))
}

fn load_category(models_dir: &Path, category: &str) -> anyhow::Result<CategoryModel> {
    let classifier = load_classifier(models_dir, category)?;
    let labels = LabelCodec::load(&labels_path(models_dir, category))?;
    debug!(category, labels = labels.len(), "category model ready");
    Ok(CategoryModel::new(classifier, labels))
}

fn load_classifier(models_dir: &Path, category: &str) -> anyhow::Result<Box<dyn Classifier>> {
    let json = classifier_path(models_dir, category);
    #[cfg(feature = "onnx")]
    {
        let onnx = json.with_extension("onnx");
        if !json.exists() && onnx.exists() {
            return Ok(Box::new(crate::onnx::OnnxClassifier::load(&onnx)?));
        }
    }
    Ok(Box::new(CatBoostModel::load(&json)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureMatrix;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// One feature per row: the input's char count.
    struct LengthExtractor;

    impl FeatureExtractor for LengthExtractor {
        fn width(&self) -> usize {
            1
        }

        fn transform(&self, inputs: &[String]) -> anyhow::Result<FeatureMatrix> {
            let data = inputs.iter().map(|s| s.chars().count() as f32).collect();
            FeatureMatrix::new(inputs.len(), 1, data)
        }
    }

    /// Emits `length % classes`, after an optional delay.
    struct ModClassifier {
        classes: usize,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl Classifier for ModClassifier {
        fn predict_classes(&self, features: &FeatureMatrix) -> anyhow::Result<Vec<usize>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok((0..features.rows())
                .map(|i| features.row(i)[0] as usize % self.classes)
                .collect())
        }
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn predict_classes(&self, _: &FeatureMatrix) -> anyhow::Result<Vec<usize>> {
            anyhow::bail!("inference backend unavailable")
        }
    }

    /// Labels `<category>-<id>` for two classes.
    fn mod_model(category: &str, delay_ms: u64) -> CategoryModel {
        let labels = LabelCodec::new(vec![format!("{category}-0"), format!("{category}-1")]).unwrap();
        CategoryModel::new(
            Box::new(ModClassifier {
                classes: 2,
                delay: Duration::from_millis(delay_ms),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            labels,
        )
    }

    fn fake_registry(categories: &[&str]) -> Registry {
        // Earlier categories are slower, so they finish last.
        let n = categories.len() as u64;
        let models = categories
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_string(), mod_model(c, (n - i as u64) * 20)))
            .collect();
        Registry::from_parts(
            names(categories),
            Box::new(LengthExtractor),
            models,
            RegistryOptions {
                max_workers: Some(4),
            },
        )
        .unwrap()
    }

    /// Write a one-feature tf-idf and, per category, a single-split model
    /// that fires on the trigram "oce".
    fn write_artifacts(dir: &Path, categories: &[&str]) {
        std::fs::create_dir_all(dir.join("cbm")).unwrap();
        std::fs::create_dir_all(dir.join("label_text")).unwrap();
        let tfidf = json!({"vocabulary": {"oce": 0, "roo": 1}, "idf_values": [1.0, 1.0]});
        std::fs::write(extractor_path(dir), tfidf.to_string()).unwrap();

        for category in categories {
            let model = json!({
                "oblivious_trees": [{
                    "splits": [{"float_feature_index": 0, "border": 0.0}],
                    "leaf_values": [-4.0, 4.0]
                }],
                "scale_and_bias": [1.0, [0.0]]
            });
            std::fs::write(classifier_path(dir, category), model.to_string()).unwrap();
            let labels = json!([format!("no {category}"), format!("ocean {category}")]);
            std::fs::write(labels_path(dir, category), labels.to_string()).unwrap();
        }
    }

    #[test]
    fn normalize_defaults_to_configured() {
        let configured = names(&["capacity", "view", "bedding"]);
        assert_eq!(normalize_categories(&configured, None), configured);
        assert_eq!(normalize_categories(&configured, Some(&[])), configured);
    }

    #[test]
    fn normalize_keeps_configured_order_and_drops_unknown() {
        let configured = names(&["capacity", "view", "bedding"]);
        let requested = names(&["bedding", "nonsense", "capacity"]);
        assert_eq!(
            normalize_categories(&configured, Some(&requested)),
            names(&["capacity", "bedding"])
        );
    }

    #[test]
    fn normalize_all_unknown_falls_back() {
        let configured = names(&["capacity", "view"]);
        let requested = names(&["nonsense"]);
        assert_eq!(normalize_categories(&configured, Some(&requested)), configured);
    }

    #[test]
    fn sanitize_replaces_missing() {
        let inputs = sanitize_inputs(vec![Some("Suite"), None, Some("")]);
        assert_eq!(inputs, vec!["Suite", "", ""]);
    }

    #[test]
    fn load_and_predict_scenario() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), &["view", "bedding"]);
        let registry = Registry::load(
            dir.path(),
            &names(&["view", "bedding"]),
            RegistryOptions::default(),
        )
        .unwrap();

        let inputs = names(&["Deluxe Ocean View", "Standard Room"]);
        let records = registry.predict(&inputs, Some(&names(&["view"]))).unwrap();
        assert_eq!(records.len(), 2);
        for (record, input) in records.iter().zip(&inputs) {
            let keys: Vec<_> = record.keys().collect();
            assert_eq!(keys, vec!["input", "view"]);
            assert_eq!(record.input(), Some(input.as_str()));
        }
        assert_eq!(records[0].get("view").and_then(|v| v.as_str()), Some("ocean view"));
        assert_eq!(records[1].get("view").and_then(|v| v.as_str()), Some("no view"));
    }

    #[test]
    fn load_reports_failing_category() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), &["view"]);
        let err = Registry::load(
            dir.path(),
            &names(&["view", "floor"]),
            RegistryOptions::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err.category(), Some("floor"));
    }

    #[test]
    fn load_missing_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let err = Registry::load(dir.path(), &names(&["view"]), RegistryOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Extractor { .. }));
    }

    #[test]
    fn load_requires_categories() {
        let dir = tempfile::tempdir().unwrap();
        let err = Registry::load(dir.path(), &[], RegistryOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::NoCategories));
    }

    #[test]
    fn row_order_independent_of_category_latency() {
        let registry = fake_registry(&["capacity", "view", "bedding", "floor"]);
        let inputs: Vec<String> = (0..50).map(|i| "x".repeat(i)).collect();
        let records = registry.predict(&inputs, None).unwrap();

        assert_eq!(records.len(), inputs.len());
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.input(), Some(inputs[i].as_str()));
            let keys: Vec<_> = record.keys().collect();
            assert_eq!(keys, vec!["input", "capacity", "view", "bedding", "floor"]);
            let expected = format!("view-{}", i % 2);
            assert_eq!(record.get("view").and_then(|v| v.as_str()), Some(expected.as_str()));
        }
    }

    #[test]
    fn unknown_categories_use_full_set() {
        let registry = fake_registry(&["capacity", "view"]);
        let records = registry
            .predict(&names(&["Suite"]), Some(&names(&["nonsense"])))
            .unwrap();
        let keys: Vec<_> = records[0].keys().collect();
        assert_eq!(keys, vec!["input", "capacity", "view"]);
    }

    #[test]
    fn empty_batch_is_empty() {
        let registry = fake_registry(&["view"]);
        assert!(registry.predict(&[], None).unwrap().is_empty());
    }

    #[test]
    fn failing_category_is_attributed() {
        let mut models = HashMap::new();
        models.insert("view".to_string(), mod_model("view", 0));
        models.insert(
            "bedding".to_string(),
            CategoryModel::new(
                Box::new(FailingClassifier),
                LabelCodec::new(vec!["king".into()]).unwrap(),
            ),
        );
        let registry = Registry::from_parts(
            names(&["view", "bedding"]),
            Box::new(LengthExtractor),
            models,
            RegistryOptions::default(),
        )
        .unwrap();

        let err = registry.predict(&names(&["Suite"]), None).unwrap_err();
        assert_eq!(err.category(), Some("bedding"));
        assert!(err.to_string().contains("inference backend unavailable"));
    }

    #[test]
    fn from_parts_requires_every_model() {
        let err = Registry::from_parts(
            names(&["view", "floor"]),
            Box::new(LengthExtractor),
            HashMap::from([("view".to_string(), mod_model("view", 0))]),
            RegistryOptions::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err.category(), Some("floor"));
    }

    #[test]
    fn pool_size_follows_options() {
        let registry = fake_registry(&["view"]);
        assert_eq!(registry.workers(), 4);
    }
}
