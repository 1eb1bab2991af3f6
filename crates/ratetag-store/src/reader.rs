//! Parsing serialized results back into records, and reading input columns.
//!
//! Delimited formats carry no types, so their values come back as text.

use std::path::Path;

use arrow::array::{Array, Float64Array, LargeStringArray, StringArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use ratetag_core::{Record, Value};

use crate::error::SerializeError;
use crate::format::OutputFormat;

/// Parse `bytes` written in `format`.
pub fn deserialize(bytes: &[u8], format: OutputFormat) -> Result<Vec<Record>, SerializeError> {
    match format {
        OutputFormat::Csv | OutputFormat::Tsv => {
            read_delimited(bytes, format.delimiter().unwrap_or(b','))
        }
        OutputFormat::Json => Ok(serde_json::from_slice(bytes)?),
        OutputFormat::Yaml => Ok(serde_yaml::from_slice(bytes)?),
        OutputFormat::Parquet => read_parquet(Bytes::copy_from_slice(bytes)),
    }
}

/// Read a results file, taking the format from its extension.
pub fn read_path(path: &Path) -> Result<Vec<Record>, SerializeError> {
    let format = OutputFormat::from_path(path)
        .ok_or_else(|| SerializeError::UnsupportedFormat(path.display().to_string()))?;
    let bytes = std::fs::read(path)?;
    deserialize(&bytes, format)
}

/// All values of `column` from a CSV file; missing cells become empty strings.
pub fn read_column(path: &Path, column: &str) -> Result<Vec<String>, SerializeError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let index = reader
        .headers()?
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| SerializeError::MissingColumn(column.to_string()))?;

    let mut values = Vec::new();
    for row in reader.records() {
        let row = row?;
        values.push(row.get(index).unwrap_or_default().to_string());
    }
    Ok(values)
}

fn read_delimited(bytes: &[u8], delimiter: u8) -> Result<Vec<Record>, SerializeError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut record = Record::new();
        for (key, value) in headers.iter().zip(row.iter()) {
            record.push(key, value);
        }
        records.push(record);
    }
    Ok(records)
}

fn read_parquet(bytes: Bytes) -> Result<Vec<Record>, SerializeError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();

    let mut records = Vec::new();
    for batch in batches? {
        let schema = batch.schema();
        for row in 0..batch.num_rows() {
            let mut record = Record::new();
            for (field, col) in schema.fields().iter().zip(batch.columns()) {
                record.push(field.name().as_str(), cell(col.as_ref(), row)?);
            }
            records.push(record);
        }
    }
    Ok(records)
}

fn cell(col: &dyn Array, row: usize) -> Result<Value, SerializeError> {
    let any = col.as_any();
    let value = match col.data_type() {
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map(|arr| Value::Text(arr.value(row).to_string())),
        DataType::LargeUtf8 => any
            .downcast_ref::<LargeStringArray>()
            .map(|arr| Value::Text(arr.value(row).to_string())),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map(|arr| Value::Number(arr.value(row))),
        other => {
            return Err(SerializeError::Other(format!(
                "unsupported parquet column type {other}"
            )));
        }
    };
    value.ok_or_else(|| SerializeError::Other("column type mismatch".into()))
}
