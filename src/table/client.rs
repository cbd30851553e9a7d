// src/table/client.rs

//! Table store client capability.
//!
//! The conditional update loop consumes this interface; implementations can
//! target DynamoDB-style services or the in-memory store used in tests.

use async_trait::async_trait;

use super::record::{FieldValue, Record, TableKey};
use crate::error::Result;

/// Attribute-level write precondition.
///
/// A conditional write compares one named field, not a whole-record version
/// number: either the field still holds its last-observed value, or it still
/// does not exist.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    FieldEquals { field: String, value: FieldValue },
    FieldAbsent { field: String },
}

impl Precondition {
    pub fn field_equals(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn field_absent(field: impl Into<String>) -> Self {
        Self::FieldAbsent {
            field: field.into(),
        }
    }

    /// Evaluates the precondition against the committed record, if any.
    /// A missing record counts as every field being absent.
    pub fn holds_for(&self, committed: Option<&Record>) -> bool {
        match self {
            Self::FieldEquals { field, value } => {
                committed.and_then(|r| r.get(field)) == Some(value)
            }
            Self::FieldAbsent { field } => {
                committed.and_then(|r| r.get(field)).is_none()
            }
        }
    }
}

/// Result of a conditional write. A failed precondition is an expected
/// outcome under contention, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    ConditionFailed,
}

/// Key attribute names for a table (bootstrap only).
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub hash_attr: String,
    pub range_attr: String,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            hash_attr: "pk".to_string(),
            range_attr: "sk".to_string(),
        }
    }
}

/// One page of a keyed query.
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<Record>,
    /// Opaque token for the next page; `None` on the last page.
    pub next_token: Option<String>,
}

/// The table store operations the update loop is built on.
#[async_trait]
pub trait TableStoreClient: Send + Sync {
    /// Reads the current committed record, or `None` when absent.
    async fn get_item(&self, table: &str, key: &TableKey) -> Result<Option<Record>>;

    /// Writes the record, replacing any committed version, subject to the
    /// optional precondition.
    ///
    /// # Errors
    ///
    /// A failed precondition is reported as `WriteOutcome::ConditionFailed`,
    /// not as an error; errors are reserved for store failures.
    async fn update_item(
        &self,
        table: &str,
        record: Record,
        precondition: Option<&Precondition>,
    ) -> Result<WriteOutcome>;

    /// Returns one page of the records sharing a hash key, ordered by range
    /// key. Pass the previous page's token to continue.
    async fn query(
        &self,
        table: &str,
        hash_key: &str,
        start_token: Option<&str>,
    ) -> Result<Page>;

    /// Creates a table (bootstrap only).
    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_equals_holds() {
        let record = Record::new(TableKey::new("h", "r")).with_field("count", 3i64);
        let precondition = Precondition::field_equals("count", 3i64);
        assert!(precondition.holds_for(Some(&record)));

        let changed = Record::new(TableKey::new("h", "r")).with_field("count", 4i64);
        assert!(!precondition.holds_for(Some(&changed)));
        assert!(!precondition.holds_for(None));
    }

    #[test]
    fn test_field_absent_holds() {
        let precondition = Precondition::field_absent("count");
        assert!(precondition.holds_for(None));

        let without = Record::new(TableKey::new("h", "r")).with_field("other", 1i64);
        assert!(precondition.holds_for(Some(&without)));

        let with = Record::new(TableKey::new("h", "r")).with_field("count", 0i64);
        assert!(!precondition.holds_for(Some(&with)));
    }
}
