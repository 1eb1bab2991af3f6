//! Column contract for a batch of records.
//!
//! The first record fixes the key order; every other record must carry the
//! same key set. A column is numeric only when every value in it is a number.

use std::collections::HashSet;

use arrow::datatypes::{DataType, Field, Schema};

use crate::record::{Record, Value};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record {row} has keys {found:?}, expected {expected:?}")]
    SchemaMismatch {
        row: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Number,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

/// Derive the column list for `records`, or fail on the first record whose
/// key set differs from the first one.
pub fn columns_of(records: &[Record]) -> Result<Vec<Column>, RecordError> {
    let Some(first) = records.first() else {
        return Ok(Vec::new());
    };
    let names: Vec<String> = first.keys().map(str::to_string).collect();
    let expected: HashSet<&str> = first.keys().collect();

    for (row, record) in records.iter().enumerate().skip(1) {
        let found: HashSet<&str> = record.keys().collect();
        if found != expected || record.len() != first.len() {
            return Err(RecordError::SchemaMismatch {
                row,
                expected: names.clone(),
                found: record.keys().map(str::to_string).collect(),
            });
        }
    }

    let columns = names
        .into_iter()
        .map(|name| {
            let numeric = records
                .iter()
                .all(|r| matches!(r.get(&name), Some(Value::Number(_))));
            let kind = if numeric {
                ColumnKind::Number
            } else {
                ColumnKind::Text
            };
            Column { name, kind }
        })
        .collect();
    Ok(columns)
}

/// Arrow schema for a column list: text as `Utf8`, numbers as `Float64`.
pub fn to_arrow_schema(columns: &[Column]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|c| {
                let data_type = match c.kind {
                    ColumnKind::Text => DataType::Utf8,
                    ColumnKind::Number => DataType::Float64,
                };
                Field::new(&c.name, data_type, false)
            })
            .collect::<Vec<_>>(),
    )
}
