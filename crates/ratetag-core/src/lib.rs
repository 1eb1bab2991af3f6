pub mod config;
pub mod record;
pub mod schema;

pub use config::{ConfigError, RetryConfig, Settings};
pub use record::{CONFIDENCE_FIELD, FALLBACK_LABEL, INPUT_FIELD, Record, Value};
pub use schema::{Column, ColumnKind, RecordError, columns_of, to_arrow_schema};
