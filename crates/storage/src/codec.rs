//! Conversion between [`Record`] rows and Arrow record batches.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BinaryBuilder, Float64Array, Float64Builder, Int64Array,
    Int64Builder, StringArray, StringBuilder,
};
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use bsj_common::{BsjError, Result};

use crate::record::Record;
use crate::schema::{RecordSchema, ValueType};
use crate::value::Value;

pub fn records_to_batch(
    schema: &RecordSchema,
    arrow_schema: &SchemaRef,
    records: &[Record],
) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.len());
    for field in schema.fields() {
        let values = records.iter().map(|r| {
            let v = r.get(&field.name).unwrap_or(&Value::Null);
            if v.is_null() {
                if !field.nullable {
                    return Err(BsjError::Execution(format!(
                        "non-nullable field '{}' is missing or null",
                        field.name
                    )));
                }
            } else if !field.data_type.accepts(v) {
                return Err(BsjError::Execution(format!(
                    "field '{}' expects {:?}, got {v}",
                    field.name, field.data_type
                )));
            }
            Ok(v)
        });
        let col: ArrayRef = match field.data_type {
            ValueType::Utf8 => {
                let mut b = StringBuilder::new();
                for v in values {
                    b.append_option(v?.as_str());
                }
                Arc::new(b.finish())
            }
            ValueType::Int64 => {
                let mut b = Int64Builder::new();
                for v in values {
                    b.append_option(v?.as_i64());
                }
                Arc::new(b.finish())
            }
            ValueType::Float64 => {
                let mut b = Float64Builder::new();
                for v in values {
                    b.append_option(v?.as_f64());
                }
                Arc::new(b.finish())
            }
            ValueType::Binary => {
                let mut b = BinaryBuilder::new();
                for v in values {
                    match v? {
                        Value::Binary(bytes) => b.append_value(bytes),
                        _ => b.append_null(),
                    }
                }
                Arc::new(b.finish())
            }
        };
        columns.push(col);
    }
    RecordBatch::try_new(arrow_schema.clone(), columns)
        .map_err(|e| BsjError::Execution(format!("record batch build failed: {e}")))
}

/// Decodes every row of `batch`. Errors are plain strings so callers can
/// attach the shard path.
pub fn batch_to_records(
    schema: &RecordSchema,
    batch: &RecordBatch,
) -> std::result::Result<Vec<Record>, String> {
    if batch.num_columns() != schema.len() {
        return Err(format!(
            "batch has {} columns, schema has {}",
            batch.num_columns(),
            schema.len()
        ));
    }
    let mut out = (0..batch.num_rows())
        .map(|_| Record::with_capacity(schema.len()))
        .collect::<Vec<_>>();
    for (idx, field) in schema.fields().iter().enumerate() {
        let col = batch.column(idx);
        for (row, record) in out.iter_mut().enumerate() {
            let value = if col.is_null(row) {
                Value::Null
            } else {
                match field.data_type {
                    ValueType::Utf8 => Value::Utf8(downcast::<StringArray>(col, &field.name)?
                        .value(row)
                        .to_string()),
                    ValueType::Int64 => {
                        Value::Int64(downcast::<Int64Array>(col, &field.name)?.value(row))
                    }
                    ValueType::Float64 => {
                        Value::Float64(downcast::<Float64Array>(col, &field.name)?.value(row))
                    }
                    ValueType::Binary => Value::Binary(
                        downcast::<BinaryArray>(col, &field.name)?
                            .value(row)
                            .to_vec(),
                    ),
                }
            };
            record.push(field.name.clone(), value);
        }
    }
    Ok(out)
}

fn downcast<'a, T: 'static>(col: &'a ArrayRef, name: &str) -> std::result::Result<&'a T, String> {
    col.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| format!("column '{name}' has unexpected type {}", col.data_type()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    fn schema() -> RecordSchema {
        RecordSchema::new(vec![
            FieldDef::new("key", ValueType::Int64, false),
            FieldDef::new("val", ValueType::Utf8, true),
            FieldDef::new("blob", ValueType::Binary, true),
        ])
        .expect("schema")
    }

    #[test]
    fn converts_rows_with_nulls() {
        let schema = schema();
        let records = vec![
            Record::new()
                .with("key", 1_i64)
                .with("val", "a")
                .with("blob", vec![1_u8, 2]),
            Record::new().with("key", 2_i64),
        ];
        let batch = records_to_batch(&schema, &schema.to_arrow(), &records).expect("encode");
        assert_eq!(batch.num_rows(), 2);
        let back = batch_to_records(&schema, &batch).expect("decode");
        assert_eq!(back[0], records[0]);
        assert_eq!(back[1].get("val"), Some(&Value::Null));
        assert_eq!(back[1].get("blob"), Some(&Value::Null));
    }

    #[test]
    fn rejects_type_mismatch_and_missing_required_field() {
        let schema = schema();
        let bad_type = vec![Record::new().with("key", "one")];
        assert!(records_to_batch(&schema, &schema.to_arrow(), &bad_type).is_err());

        let missing = vec![Record::new().with("val", "a")];
        let err = records_to_batch(&schema, &schema.to_arrow(), &missing).unwrap_err();
        assert!(err.to_string().contains("non-nullable field 'key'"));
    }
}
