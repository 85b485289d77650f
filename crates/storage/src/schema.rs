use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use bsj_common::{BsjError, Result};
use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Utf8,
    Int64,
    Float64,
    Binary,
}

impl ValueType {
    pub fn to_arrow(self) -> DataType {
        match self {
            ValueType::Utf8 => DataType::Utf8,
            ValueType::Int64 => DataType::Int64,
            ValueType::Float64 => DataType::Float64,
            ValueType::Binary => DataType::Binary,
        }
    }

    pub fn from_arrow(dt: &DataType) -> Option<Self> {
        match dt {
            DataType::Utf8 => Some(ValueType::Utf8),
            DataType::Int64 => Some(ValueType::Int64),
            DataType::Float64 => Some(ValueType::Float64),
            DataType::Binary => Some(ValueType::Binary),
            _ => None,
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ValueType::Utf8, Value::Utf8(_))
                | (ValueType::Int64, Value::Int64(_))
                | (ValueType::Float64, Value::Float64(_))
                | (ValueType::Binary, Value::Binary(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub data_type: ValueType,
    pub nullable: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, data_type: ValueType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Ordered field list shared by every shard of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordSchema {
    fields: Vec<FieldDef>,
}

impl RecordSchema {
    pub fn new(fields: Vec<FieldDef>) -> Result<Self> {
        for (i, f) in fields.iter().enumerate() {
            if fields[..i].iter().any(|g| g.name == f.name) {
                return Err(BsjError::InvalidConfig(format!(
                    "duplicate field '{}' in schema",
                    f.name
                )));
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_arrow(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.fields
                .iter()
                .map(|f| Field::new(&f.name, f.data_type.to_arrow(), f.nullable))
                .collect::<Vec<_>>(),
        ))
    }

    pub fn from_arrow(schema: &Schema) -> Result<Self> {
        let fields = schema
            .fields()
            .iter()
            .map(|f| {
                let data_type = ValueType::from_arrow(f.data_type()).ok_or_else(|| {
                    BsjError::InvalidConfig(format!(
                        "unsupported column type {} for field '{}'",
                        f.data_type(),
                        f.name()
                    ))
                })?;
                Ok(FieldDef::new(f.name().clone(), data_type, f.is_nullable()))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(fields)
    }
}
