// src/table/record.rs

//! Record model for the table store.
//!
//! Records are identified by a two-part primary key and carry a flat map of
//! named field values. Typed records implement [`TableRecord`] to convert to
//! and from the generic form; the conditional update loop works entirely in
//! terms of that codec.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{Result, StoreError};

/// Two-part primary key: partition (hash) key plus sort (range) key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub hash_key: String,
    pub range_key: String,
}

impl TableKey {
    pub fn new(hash_key: impl Into<String>, range_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            range_key: range_key.into(),
        }
    }
}

impl std::fmt::Display for TableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.hash_key, self.range_key)
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    S(String),
    N(i64),
    F(f64),
    Bool(bool),
    B(Bytes),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::S(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::N(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A stored record: key plus named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: TableKey,
    pub fields: HashMap<String, FieldValue>,
}

impl Record {
    pub fn new(key: TableKey) -> Self {
        Self {
            key,
            fields: HashMap::new(),
        }
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    // Boundary accessors; each returns None when the field is missing or
    // of a different shape.

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::S(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.fields.get(name) {
            Some(FieldValue::N(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.fields.get(name) {
            Some(FieldValue::F(f)) => Some(*f),
            Some(FieldValue::N(n)) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.fields.get(name) {
            Some(FieldValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_bytes(&self, name: &str) -> Option<&Bytes> {
        match self.fields.get(name) {
            Some(FieldValue::B(b)) => Some(b),
            _ => None,
        }
    }

    /// Accessor for codec implementations that treat a missing field as a
    /// malformed record.
    pub fn require(&self, name: &str) -> Result<&FieldValue> {
        self.fields.get(name).ok_or_else(|| {
            StoreError::table_store(
                "record",
                format!("missing field '{}' on {}", name, self.key),
            )
        })
    }

    pub fn require_i64(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            FieldValue::N(n) => Ok(*n),
            other => Err(StoreError::table_store(
                "record",
                format!("field '{}' on {} is not numeric: {:?}", name, self.key, other),
            )),
        }
    }

    pub fn require_str(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            FieldValue::S(s) => Ok(s),
            other => Err(StoreError::table_store(
                "record",
                format!("field '{}' on {} is not a string: {:?}", name, self.key, other),
            )),
        }
    }
}

/// Codec between a typed record and the generic stored form.
///
/// Selected by ordinary trait dispatch; record types opt in explicitly
/// rather than through marshalling helpers on the stored form.
pub trait TableRecord: Sized {
    /// Primary key of this record.
    fn key(&self) -> TableKey;

    /// Converts to the generic stored form.
    fn to_record(&self) -> Record;

    /// Reconstructs the typed record.
    ///
    /// # Errors
    ///
    /// Returns an error for missing or mistyped fields.
    fn from_record(record: &Record) -> Result<Self>;
}

// The generic form trivially round-trips through itself, so callers can
// drive the update loop without defining a typed record.
impl TableRecord for Record {
    fn key(&self) -> TableKey {
        self.key.clone()
    }

    fn to_record(&self) -> Record {
        self.clone()
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let record = Record::new(TableKey::new("job-1", "task-2"))
            .with_field("name", "reduce")
            .with_field("attempt", 3i64)
            .with_field("done", false);

        assert_eq!(record.get_str("name"), Some("reduce"));
        assert_eq!(record.get_i64("attempt"), Some(3));
        assert_eq!(record.get_bool("done"), Some(false));
        assert_eq!(record.get_str("missing"), None);
        assert_eq!(record.get_i64("name"), None);
    }

    #[test]
    fn test_require_reports_missing_field() {
        let record = Record::new(TableKey::new("job-1", "task-2"));
        let err = record.require_i64("attempt").unwrap_err();
        assert!(err.to_string().contains("missing field 'attempt'"));
    }

    #[test]
    fn test_require_reports_wrong_shape() {
        let record =
            Record::new(TableKey::new("job-1", "task-2")).with_field("attempt", "three");
        let err = record.require_i64("attempt").unwrap_err();
        assert!(err.to_string().contains("not numeric"));
    }

    #[test]
    fn test_record_codec_roundtrip() {
        let record = Record::new(TableKey::new("h", "r")).with_field("count", 7i64);
        let generic = record.to_record();
        let back = Record::from_record(&generic).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.key(), TableKey::new("h", "r"));
    }
}
