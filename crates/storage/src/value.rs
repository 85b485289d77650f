//! Dynamically typed field values.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// One field value of a [`Record`](crate::Record).
///
/// Values have a total order so any field can serve as a join key:
/// `Null < Int64 < Float64 < Utf8 < Binary`, natural order within a type
/// (floats by [`f64::total_cmp`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int64(i64),
    /// Serialized as its IEEE-754 bit pattern so NaN, infinities and every
    /// finite value survive a spill unchanged.
    #[serde(with = "f64_bits")]
    Float64(f64),
    Utf8(String),
    /// Serialized as a lowercase hex string.
    #[serde(with = "hex_bytes")]
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int64(_) => 1,
            Value::Float64(_) => 2,
            Value::Utf8(_) => 3,
            Value::Binary(_) => 4,
        }
    }

    /// Stable, platform-independent byte encoding used for hash partitioning.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        out.push(self.type_rank());
        match self {
            Value::Null => {}
            Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Float64(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
            Value::Utf8(s) => out.extend_from_slice(s.as_bytes()),
            Value::Binary(b) => out.extend_from_slice(b),
        }
        out
    }

    /// Rough in-memory footprint, used for sort buffer accounting.
    pub fn estimated_bytes(&self) -> usize {
        std::mem::size_of::<Value>()
            + match self {
                Value::Utf8(s) => s.len(),
                Value::Binary(b) => b.len(),
                _ => 0,
            }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Utf8(a), Value::Utf8(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Utf8(s) => s.hash(state),
            Value::Binary(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Utf8(s) => write!(f, "{s:?}"),
            Value::Binary(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Utf8(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

mod f64_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(v.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(f64::from_bits(u64::deserialize(d)?))
    }
}

mod hex_bytes {
    use std::fmt::Write;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        let mut hex = String::with_capacity(v.len() * 2);
        for byte in v {
            let _ = write!(hex, "{byte:02x}");
        }
        s.serialize_str(&hex)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let hex = String::deserialize(d)?;
        if hex.len() % 2 != 0 {
            return Err(D::Error::custom("odd-length hex string"));
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| {
                hex.get(i..i + 2)
                    .filter(|pair| pair.bytes().all(|b| b.is_ascii_hexdigit()))
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| D::Error::custom(format!("invalid hex at offset {i}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Value;

    #[test]
    fn orders_across_and_within_types() {
        let mut values = vec![
            Value::from("b"),
            Value::from(3_i64),
            Value::Null,
            Value::from(1.5_f64),
            Value::from("a"),
            Value::from(-2_i64),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::from(-2_i64),
                Value::from(3_i64),
                Value::from(1.5_f64),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn canonical_bytes_distinguish_types() {
        assert_ne!(
            Value::from(1_i64).canonical_bytes(),
            Value::from(1.0_f64).canonical_bytes()
        );
        assert_eq!(
            Value::from("Q8WZ42").canonical_bytes(),
            Value::from("Q8WZ42".to_string()).canonical_bytes()
        );
    }

    #[test]
    fn displays_for_error_messages() {
        assert_eq!(Value::from("x").to_string(), "\"x\"");
        assert_eq!(Value::Binary(vec![0xab, 0x01]).to_string(), "0xab01");
        assert_eq!(Value::from(Option::<i64>::None).to_string(), "null");
    }

    #[test]
    fn floats_serialize_bit_exact() {
        let values = [
            f64::NAN,
            -f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
            -0.0,
            1.0715660391465826e-75,
            f64::MIN_POSITIVE / 3.0,
        ];
        for v in values {
            let json = serde_json::to_string(&Value::Float64(v)).expect("encode");
            let back: Value = serde_json::from_str(&json).expect("decode");
            let Value::Float64(back) = back else {
                panic!("expected float, got {back:?}");
            };
            assert_eq!(back.to_bits(), v.to_bits(), "{json}");
        }
    }

    #[test]
    fn binary_serializes_as_hex() {
        let value = Value::Binary(vec![0x00, 0xab, 0xff, 0x10]);
        let json = serde_json::to_string(&value).expect("encode");
        assert_eq!(json, r#"{"Binary":"00abff10"}"#);
        let back: Value = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, value);

        assert!(serde_json::from_str::<Value>(r#"{"Binary":"abc"}"#).is_err());
        assert!(serde_json::from_str::<Value>(r#"{"Binary":"+a"}"#).is_err());
        assert!(serde_json::from_str::<Value>(r#"{"Binary":"zz"}"#).is_err());
    }
}
