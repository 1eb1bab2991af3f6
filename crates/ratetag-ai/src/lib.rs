//! Inference layer: TF-IDF feature extraction, per-category classifiers, a
//! concurrent model registry, and a retrying executor around it.

pub mod classifier;
pub mod error;
pub mod features;
pub mod labels;
#[cfg(feature = "onnx")]
mod onnx;
pub mod registry;
pub mod retry;

pub use classifier::{CatBoostModel, CategoryModel, Classifier};
pub use error::{LoadError, PredictError};
pub use features::{FeatureExtractor, FeatureMatrix, TfidfVectorizer};
pub use labels::LabelCodec;
#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;
pub use registry::{Predictor, Registry, RegistryOptions, normalize_categories, sanitize_inputs};
pub use retry::{BackoffCalculator, ExhaustionPolicy, MaxRetriesExceeded, RetryExecutor};
