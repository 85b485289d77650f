//! Flattening of joined pairs into output records.

use bsj_common::{JoinMode, Result};
use bsj_storage::{FieldDef, Record, RecordSchema, Value};

/// One left record and the matching right record, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRecord {
    /// Record from the left input.
    pub left: Record,
    /// Matching record from the right input; `None` for an unmatched left
    /// record in left-outer mode.
    pub right: Option<Record>,
}

/// Output layout of a join: all left fields, then the right fields minus the
/// right key.
///
/// A right field whose name is already taken is renamed with the configured
/// prefix. In left-outer mode every right field becomes nullable.
#[derive(Debug, Clone)]
pub struct JoinSchema {
    output: RecordSchema,
    left_fields: Vec<String>,
    /// `(right field name, output field name)`.
    right_fields: Vec<(String, String)>,
}

impl JoinSchema {
    /// Builds the output schema of joining `left` with `right`.
    pub fn new(
        left: &RecordSchema,
        right: &RecordSchema,
        right_key: &str,
        right_field_prefix: &str,
        mode: JoinMode,
    ) -> Result<Self> {
        let mut fields = left.fields().to_vec();
        let left_fields = left.fields().iter().map(|f| f.name.clone()).collect();
        let mut right_fields = Vec::new();
        for field in right.fields() {
            if field.name == right_key {
                continue;
            }
            let mut name = field.name.clone();
            if fields.iter().any(|f| f.name == name) {
                name = format!("{right_field_prefix}{name}");
            }
            fields.push(FieldDef::new(
                name.clone(),
                field.data_type,
                field.nullable || mode == JoinMode::LeftOuter,
            ));
            right_fields.push((field.name.clone(), name));
        }
        Ok(Self {
            output: RecordSchema::new(fields)?,
            left_fields,
            right_fields,
        })
    }

    /// Schema of the projected records.
    pub fn output(&self) -> &RecordSchema {
        &self.output
    }

    /// Flattens a joined pair in output field order. Fields absent from a
    /// record, and all right fields of an unmatched left record, are `Null`.
    pub fn project(&self, joined: &JoinedRecord) -> Record {
        let left = self
            .left_fields
            .iter()
            .map(|name| (name.clone(), field_or_null(Some(&joined.left), name)));
        let right = self.right_fields.iter().map(|(source, output)| {
            (output.clone(), field_or_null(joined.right.as_ref(), source))
        });
        left.chain(right).collect()
    }
}

fn field_or_null(record: Option<&Record>, name: &str) -> Value {
    record
        .and_then(|r| r.get(name))
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsj_common::ErrorKind;
    use bsj_storage::ValueType;

    fn schema(fields: &[(&str, ValueType, bool)]) -> RecordSchema {
        RecordSchema::new(
            fields
                .iter()
                .map(|(n, t, null)| FieldDef::new(*n, *t, *null))
                .collect(),
        )
        .expect("schema")
    }

    #[test]
    fn drops_right_key_and_prefixes_collisions() {
        let left = schema(&[("key", ValueType::Int64, false), ("val", ValueType::Utf8, false)]);
        let right = schema(&[("key", ValueType::Int64, false), ("val", ValueType::Utf8, false), ("r", ValueType::Utf8, false)]);
        let js = JoinSchema::new(&left, &right, "key", "right_", JoinMode::Inner).expect("join schema");
        let names = js.output().fields().iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["key", "val", "right_val", "r"]);
        assert!(!js.output().field("r").expect("r").nullable);

        let joined = JoinedRecord {
            left: Record::new().with("key", 1_i64).with("val", "a"),
            right: Some(Record::new().with("key", 1_i64).with("val", "z").with("r", "x")),
        };
        let out = js.project(&joined);
        assert_eq!(out.get("right_val"), Some(&Value::from("z")));
        assert_eq!(out.get("r"), Some(&Value::from("x")));
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn left_outer_makes_right_fields_nullable_and_null() {
        let left = schema(&[("key", ValueType::Int64, false), ("val", ValueType::Utf8, false)]);
        let right = schema(&[("key", ValueType::Int64, false), ("r", ValueType::Utf8, false)]);
        let js = JoinSchema::new(&left, &right, "key", "right_", JoinMode::LeftOuter).expect("join schema");
        assert!(js.output().field("r").expect("r").nullable);
        let out = js.project(&JoinedRecord {
            left: Record::new().with("key", 2_i64).with("val", "b"),
            right: None,
        });
        assert_eq!(out, Record::new().with("key", 2_i64).with("val", "b").with("r", Value::Null));
    }

    #[test]
    fn prefixed_name_that_still_collides_is_rejected() {
        let left = schema(&[("id", ValueType::Utf8, false), ("right_x", ValueType::Utf8, false), ("x", ValueType::Utf8, false)]);
        let right = schema(&[("id", ValueType::Utf8, false), ("x", ValueType::Utf8, false)]);
        let err = JoinSchema::new(&left, &right, "id", "right_", JoinMode::Inner).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }
}
