//! Record serialization.
//!
//! Every format takes its column contract from [`columns_of`]: key order from
//! the first record, and every record must share that key set.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use ratetag_core::{Column, ColumnKind, INPUT_FIELD, Record, columns_of, to_arrow_schema};
use tracing::debug;

use crate::error::SerializeError;
use crate::format::OutputFormat;

/// Where serialized output goes.
pub enum Sink<'a> {
    Path(&'a Path),
    Stream(&'a mut (dyn Write + Send)),
}

/// Serialize `records` in `format` to `sink`.
pub fn serialize(
    records: &[Record],
    format: OutputFormat,
    sink: Sink<'_>,
) -> Result<(), SerializeError> {
    match sink {
        Sink::Path(path) => {
            let file = File::create(path)?;
            let mut out = BufWriter::new(file);
            write_records(records, format, &mut out)?;
            out.flush()?;
            debug!(rows = records.len(), %format, path = %path.display(), "wrote results");
        }
        Sink::Stream(stream) => {
            write_records(records, format, &mut *stream)?;
            stream.flush()?;
        }
    }
    Ok(())
}

/// Serialize into an in-memory buffer.
pub fn to_bytes(records: &[Record], format: OutputFormat) -> Result<Vec<u8>, SerializeError> {
    let mut buf = Vec::new();
    write_records(records, format, &mut buf)?;
    Ok(buf)
}

fn write_records<W: Write + Send>(
    records: &[Record],
    format: OutputFormat,
    out: W,
) -> Result<(), SerializeError> {
    let columns = columns_of(records)?;
    match format {
        OutputFormat::Csv | OutputFormat::Tsv => {
            let delimiter = format.delimiter().unwrap_or(b',');
            write_delimited(records, &columns, delimiter, out)
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(out, &in_column_order(records, &columns))?;
            Ok(())
        }
        OutputFormat::Yaml => {
            serde_yaml::to_writer(out, &in_column_order(records, &columns))?;
            Ok(())
        }
        OutputFormat::Parquet => write_parquet(records, &columns, out),
    }
}

/// Rebuild every record with its fields in column order.
fn in_column_order(records: &[Record], columns: &[Column]) -> Vec<Record> {
    records
        .iter()
        .map(|record| {
            let mut ordered = Record::new();
            for column in columns {
                if let Some(value) = record.get(&column.name) {
                    ordered.push(column.name.as_str(), value.clone());
                }
            }
            ordered
        })
        .collect()
}

fn write_delimited<W: Write>(
    records: &[Record],
    columns: &[Column],
    delimiter: u8,
    out: W,
) -> Result<(), SerializeError> {
    if records.is_empty() {
        return Ok(());
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(out);
    writer.write_record(columns.iter().map(|c| c.name.as_str()))?;
    for record in records {
        writer.write_record(columns.iter().map(|c| {
            record
                .get(&c.name)
                .map(|v| v.to_text().into_owned())
                .unwrap_or_default()
        }))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_parquet<W: Write + Send>(
    records: &[Record],
    columns: &[Column],
    out: W,
) -> Result<(), SerializeError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    if records.is_empty() {
        // Keep the file readable: a lone input column, no rows.
        let schema = Arc::new(Schema::new(vec![Field::new(
            INPUT_FIELD,
            DataType::Utf8,
            false,
        )]));
        let writer = ArrowWriter::try_new(out, schema, Some(props))?;
        writer.close()?;
        return Ok(());
    }

    let schema = Arc::new(to_arrow_schema(columns));
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|c| column_array(records, c))
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let mut writer = ArrowWriter::try_new(out, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn column_array(records: &[Record], column: &Column) -> ArrayRef {
    match column.kind {
        ColumnKind::Number => Arc::new(Float64Array::from(
            records
                .iter()
                .map(|r| r.get(&column.name).and_then(|v| v.as_f64()).unwrap_or(0.0))
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Text => Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| {
                    r.get(&column.name)
                        .map(|v| v.to_text().into_owned())
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>(),
        )),
    }
}
