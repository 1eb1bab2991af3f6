use ratetag_core::RecordError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Schema(#[from] RecordError),

    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("{0}")]
    Other(String),
}
