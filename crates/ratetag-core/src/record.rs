//! Flat, ordered prediction records.
//!
//! A [`Record`] is an ordered list of `(key, value)` pairs. Field order is
//! insertion order and is preserved by every serializer, so the first record
//! of a batch defines the column contract for the whole output.

use std::borrow::Cow;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Key holding the original input string on every record.
pub const INPUT_FIELD: &str = "input";

/// Label written for every category of a fallback record.
pub const FALLBACK_LABEL: &str = "UNKNOWN";

/// Trailing field that marks fallback records (always `0`).
pub const CONFIDENCE_FIELD: &str = "confidence";

/// A scalar record value: decoded labels are text, markers are numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    /// Text rendering used by the delimited formats.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s),
            Self::Number(n) => Cow::Owned(n.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// One flat output row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a record whose first field is [`INPUT_FIELD`].
    pub fn with_input(input: impl Into<String>) -> Self {
        let mut record = Self::new();
        record.push(INPUT_FIELD, Value::Text(input.into()));
        record
    }

    /// Degraded placeholder for an input whose prediction failed.
    ///
    /// Every category gets [`FALLBACK_LABEL`], followed by a zero
    /// [`CONFIDENCE_FIELD`] so consumers can tell it apart from a real row.
    pub fn fallback<S: AsRef<str>>(input: impl Into<String>, categories: &[S]) -> Self {
        let mut record = Self::with_input(input);
        for category in categories {
            record.push(category.as_ref(), FALLBACK_LABEL);
        }
        record.push(CONFIDENCE_FIELD, 0.0);
        record
    }

    /// Append a field, or overwrite it in place if the key already exists.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn input(&self) -> Option<&str> {
        self.get(INPUT_FIELD).and_then(Value::as_str)
    }

    /// Rename a field, keeping its position. Returns false if `from` is absent.
    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> bool {
        match self.fields.iter_mut().find(|(k, _)| k == from) {
            Some(slot) => {
                slot.0 = to.into();
                true
            }
            None => false,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.get(CONFIDENCE_FIELD).and_then(Value::as_f64) == Some(0.0)
            && self
                .fields
                .iter()
                .filter(|(k, _)| k != INPUT_FIELD && k != CONFIDENCE_FIELD)
                .all(|(_, v)| v.as_str() == Some(FALLBACK_LABEL))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = Record;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a flat map of string keys to string or number values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
        let mut record = Record::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            record.push(key, value);
        }
        Ok(record)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}
