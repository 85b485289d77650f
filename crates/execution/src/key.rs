//! Join key extraction.

use bsj_common::{BsjError, Result};
use bsj_storage::{Record, Value};

/// Maps a record to its join key.
///
/// Implementations must be pure: the same record always yields the same key,
/// on every call and in every process, because both inputs of a join are
/// partitioned independently by it.
pub trait KeyExtractor: Send + Sync {
    /// Returns the record's key, or [`BsjError::MissingKeyField`].
    fn key(&self, record: &Record) -> Result<Value>;
}

/// Key taken verbatim from one named field.
///
/// A field that is present but `Null` yields [`Value::Null`]; such keys are
/// valid but never match anything in the join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKey {
    field: String,
}

impl FieldKey {
    /// Key extractor over `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// Name of the key field.
    pub fn field(&self) -> &str {
        &self.field
    }
}

impl KeyExtractor for FieldKey {
    fn key(&self, record: &Record) -> Result<Value> {
        record
            .get(&self.field)
            .cloned()
            .ok_or_else(|| BsjError::MissingKeyField {
                field: self.field.clone(),
            })
    }
}

impl<F> KeyExtractor for F
where
    F: Fn(&Record) -> Result<Value> + Send + Sync,
{
    fn key(&self, record: &Record) -> Result<Value> {
        self(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsj_common::ErrorKind;

    #[test]
    fn field_key_reads_the_named_field() {
        let extractor = FieldKey::new("accession");
        let record = Record::new()
            .with("accession", "Q8WZ42")
            .with("num_members", 1336_i64);
        assert_eq!(extractor.key(&record).expect("key"), Value::from("Q8WZ42"));
        assert_eq!(extractor.key(&record).expect("key"), extractor.key(&record.clone()).expect("key"));
    }

    #[test]
    fn absent_field_is_missing_key_field() {
        let err = FieldKey::new("uniprot_acc")
            .key(&Record::new().with("pfam_acc", "PF00001"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKeyField);
        assert!(err.to_string().contains("uniprot_acc"));
    }

    #[test]
    fn null_field_is_a_null_key() {
        let record = Record::new().with("k", Value::Null);
        assert!(FieldKey::new("k").key(&record).expect("key").is_null());
    }

    #[test]
    fn closures_are_extractors() {
        let upper = |r: &Record| -> Result<Value> {
            let v = FieldKey::new("id").key(r)?;
            Ok(Value::from(v.as_str().unwrap_or_default().to_ascii_uppercase()))
        };
        let key = upper.key(&Record::new().with("id", "p12345")).expect("key");
        assert_eq!(key, Value::from("P12345"));
    }
}
