use std::path::PathBuf;

use thiserror::Error;

/// Fatal failure while building a [`Registry`](crate::Registry). Never retried.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load feature extractor {path}: {source:#}")]
    Extractor {
        path: PathBuf,
        source: anyhow::Error,
    },

    #[error("failed to load model for category '{category}': {source:#}")]
    Category {
        category: String,
        source: anyhow::Error,
    },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("no categories configured")]
    NoCategories,
}

impl LoadError {
    pub fn category(&self) -> Option<&str> {
        match self {
            Self::Category { category, .. } => Some(category),
            _ => None,
        }
    }
}

/// Failure of a single `predict` call. The retry executor retries these.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("feature extraction failed: {0:#}")]
    Features(anyhow::Error),

    #[error("prediction failed for category '{category}': {source:#}")]
    Category {
        category: String,
        source: anyhow::Error,
    },
}

impl PredictError {
    pub fn category(&self) -> Option<&str> {
        match self {
            Self::Category { category, .. } => Some(category),
            Self::Features(_) => None,
        }
    }
}
