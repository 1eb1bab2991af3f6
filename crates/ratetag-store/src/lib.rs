//! Result serialization: records to csv, tsv, json, yaml, or parquet, and back.

mod error;
pub use error::SerializeError;

mod format;
pub use format::OutputFormat;

mod writer;
pub use writer::{Sink, serialize, to_bytes};

mod reader;
pub use reader::{deserialize, read_column, read_path};
